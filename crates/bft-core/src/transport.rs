//! Abstract transport primitives (§6): the core requires only these five
//! operations, mapping to any RDMA-capable or TCP-capable messaging layer.
//! The transport library itself is out of scope; `channel` ships the one
//! concrete implementation used for local simulation and tests.

pub mod channel;

use crate::error::Result;
use async_trait::async_trait;

/// Rank of a participant: 0 is the coordinator, 1..W are workers.
pub type Rank = u32;
pub type Tag = u32;

/// Metadata about a completed receive, as derived from the transport
/// envelope rather than the payload — the cyclic decoder relies on
/// `status.source` to know which worker's row of `W_enc` applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub source: Rank,
    pub tag: Tag,
    pub size: usize,
}

/// Opaque completion handle returned by non-blocking posts.
pub struct Handle {
    pub(crate) inner: HandleInner,
}

pub(crate) enum HandleInner {
    Channel(channel::ChannelHandle),
}

/// The five primitives required by the protocol. All send/recv variants are
/// non-blocking: they return a `Handle` that must be passed to `wait` or
/// `wait_any`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, dest: Rank, tag: Tag, bytes: Vec<u8>) -> Result<Handle>;

    async fn recv(&self, source: Rank, tag: Tag) -> Result<Handle>;

    /// Collective: all ranks must call this with the same `root` and `tag`.
    /// On `root`, `bytes` is the data to distribute; elsewhere it is ignored.
    async fn broadcast(&self, root: Rank, tag: Tag, bytes: Vec<u8>) -> Result<Handle>;

    async fn wait(&self, handle: Handle) -> Result<Vec<u8>>;

    async fn wait_any(&self, handles: Vec<Handle>) -> Result<(usize, Status, Vec<u8>)>;
}
