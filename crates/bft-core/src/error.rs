//! Error kinds for the aggregation protocol.

use thiserror::Error;

/// Errors produced anywhere in the coordinator/worker step loops.
#[derive(Debug, Error)]
pub enum Error {
    /// The underlying messaging layer returned an error. Fatal to the process.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// A gradient receive did not complete within `timeout_threshold`.
    #[error("worker {rank} timed out waiting for layer {layer}")]
    WorkerTimeout { rank: u32, layer: usize },

    /// A received gradient's shape did not match the layer's configured shape.
    #[error("layer {layer} shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        layer: usize,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    /// The majority-vote aggregator found no quorum in a group.
    #[error("no majority in group {group} for layer {layer}")]
    NoMajority { group: usize, layer: usize },

    /// The cyclic decoder could not find a consistent subset of rows.
    #[error("cyclic decode failed for layer {layer}")]
    DecodeFailure { layer: usize },

    /// A configuration constraint was violated at startup.
    #[error("invalid configuration: {0}")]
    BadConfig(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
