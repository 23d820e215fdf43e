//! In-process transport: one `tokio::sync::mpsc` channel per `(dest,
//! source, tag)` triple, shared via a `Hub`. This realizes "parallel
//! processes across ranks" as concurrent tasks within one process, and is
//! the transport used by `bft-cli`'s local simulation mode and by the
//! scenario tests. It is not a network transport — the transport library
//! itself is out of scope (§1).

use crate::error::{Error, Result};
use crate::transport::{Handle, HandleInner, Rank, Status, Tag, Transport};
use async_trait::async_trait;
use futures::future::{self, BoxFuture};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, Mutex as AsyncMutex};

struct ChannelPair {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: AsyncMutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl ChannelPair {
    fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            tx,
            rx: AsyncMutex::new(rx),
        })
    }
}

/// Shared switchboard for a fixed set of ranks. Every rank's
/// [`ChannelTransport`] clones the same `Hub`.
pub struct Hub {
    ranks: Vec<Rank>,
    channels: StdMutex<HashMap<(Rank, Rank, Tag), Arc<ChannelPair>>>,
}

impl Hub {
    pub fn new(ranks: Vec<Rank>) -> Arc<Self> {
        Arc::new(Self {
            ranks,
            channels: StdMutex::new(HashMap::new()),
        })
    }

    fn pair(&self, dest: Rank, source: Rank, tag: Tag) -> Arc<ChannelPair> {
        self.channels
            .lock()
            .expect("hub mutex poisoned")
            .entry((dest, source, tag))
            .or_insert_with(ChannelPair::new)
            .clone()
    }
}

/// One rank's handle onto a [`Hub`].
pub struct ChannelTransport {
    hub: Arc<Hub>,
    my_rank: Rank,
}

impl ChannelTransport {
    pub fn new(hub: Arc<Hub>, my_rank: Rank) -> Self {
        Self { hub, my_rank }
    }
}

pub enum ChannelHandle {
    /// A completed send; nothing further to wait for.
    SendDone,
    /// A posted, not-yet-awaited receive.
    Recv {
        source: Rank,
        tag: Tag,
        pair: Arc<ChannelPair>,
    },
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, dest: Rank, tag: Tag, bytes: Vec<u8>) -> Result<Handle> {
        let pair = self.hub.pair(dest, self.my_rank, tag);
        pair.tx
            .send(bytes)
            .map_err(|_| Error::TransportFailure(format!("rank {dest} channel closed")))?;
        Ok(Handle {
            inner: HandleInner::Channel(ChannelHandle::SendDone),
        })
    }

    async fn recv(&self, source: Rank, tag: Tag) -> Result<Handle> {
        let pair = self.hub.pair(self.my_rank, source, tag);
        Ok(Handle {
            inner: HandleInner::Channel(ChannelHandle::Recv { source, tag, pair }),
        })
    }

    async fn broadcast(&self, root: Rank, tag: Tag, bytes: Vec<u8>) -> Result<Handle> {
        if self.my_rank == root {
            for &dest in &self.hub.ranks {
                if dest == root {
                    continue;
                }
                let pair = self.hub.pair(dest, root, tag);
                pair.tx
                    .send(bytes.clone())
                    .map_err(|_| Error::TransportFailure(format!("rank {dest} channel closed")))?;
            }
            Ok(Handle {
                inner: HandleInner::Channel(ChannelHandle::SendDone),
            })
        } else {
            let pair = self.hub.pair(self.my_rank, root, tag);
            Ok(Handle {
                inner: HandleInner::Channel(ChannelHandle::Recv {
                    source: root,
                    tag,
                    pair,
                }),
            })
        }
    }

    async fn wait(&self, handle: Handle) -> Result<Vec<u8>> {
        let HandleInner::Channel(inner) = handle.inner;
        match inner {
            ChannelHandle::SendDone => Ok(Vec::new()),
            ChannelHandle::Recv { source, pair, .. } => {
                let mut rx = pair.rx.lock().await;
                rx.recv()
                    .await
                    .ok_or_else(|| Error::TransportFailure(format!("rank {source} channel closed")))
            }
        }
    }

    async fn wait_any(&self, handles: Vec<Handle>) -> Result<(usize, Status, Vec<u8>)> {
        if handles.is_empty() {
            return Err(Error::TransportFailure("wait_any called with no handles".into()));
        }

        let futs: Vec<BoxFuture<'_, Result<(Status, Vec<u8>)>>> = handles
            .into_iter()
            .map(|handle| -> BoxFuture<'_, Result<(Status, Vec<u8>)>> {
                let HandleInner::Channel(inner) = handle.inner;
                match inner {
                    ChannelHandle::SendDone => Box::pin(future::ready(Ok((
                        Status {
                            source: self.my_rank,
                            tag: 0,
                            size: 0,
                        },
                        Vec::new(),
                    )))),
                    ChannelHandle::Recv { source, tag, pair } => Box::pin(async move {
                        let mut rx = pair.rx.lock().await;
                        let bytes = rx.recv().await.ok_or_else(|| {
                            Error::TransportFailure(format!("rank {source} channel closed"))
                        })?;
                        let size = bytes.len();
                        Ok((Status { source, tag, size }, bytes))
                    }),
                }
            })
            .collect();

        let (result, index, _remaining) = future::select_all(futs).await;
        let (status, bytes) = result?;
        Ok((index, status, bytes))
    }
}
