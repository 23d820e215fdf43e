//! Core data model, transport, codec, and aggregation strategies for the
//! Byzantine-fault-tolerant synchronous gradient aggregation protocol.
//!
//! This crate is the leaf of the dependency order described in the protocol
//! overview: transport adapter, wire codec, per-layer tensor descriptor,
//! gradient accumulator, aggregation strategies. `bft-coordinator` and
//! `bft-worker` build the step loops on top of it.

pub mod accumulator;
pub mod aggregate;
pub mod checkpoint;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod protocol;
pub mod state;
pub mod tensor;
pub mod transport;

pub use error::{Error, Result};
