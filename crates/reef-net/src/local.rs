//! In-process transport.
//!
//! [`LocalTransport`] runs a [`NodeService`] per node and connects each
//! transfer to it through an in-memory duplex pipe, exercising the same
//! framing and node logic as the QUIC path without any sockets. A failed or
//! abandoned upload resets its pipe, as the QUIC path resets its stream.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll, ready};

use reef_store::ChunkStore;
use reef_types::{FileKey, NodeIndex};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::{ChunkReceipt, receive_chunk, send_chunk};
use crate::error::NetError;
use crate::service::NodeService;
use crate::Transport;

/// Buffer size of each in-memory pipe.
const PIPE_CAPACITY: usize = 64 * 1024;

struct LocalNode {
    service: Arc<NodeService>,
    up: AtomicBool,
}

/// Transport to storage nodes living in the same process.
pub struct LocalTransport {
    nodes: Vec<LocalNode>,
}

impl LocalTransport {
    /// Create a transport with one node per store; `stores[i]` is `NodeIndex(i)`.
    pub fn new(stores: Vec<Arc<dyn ChunkStore>>) -> Self {
        let nodes = stores
            .into_iter()
            .map(|store| LocalNode {
                service: Arc::new(NodeService::new(store)),
                up: AtomicBool::new(true),
            })
            .collect();
        Self { nodes }
    }

    /// Make `node` refuse connections until [`set_up`](Self::set_up).
    pub fn set_down(&self, node: NodeIndex) {
        if let Some(n) = self.nodes.get(node.0) {
            n.up.store(false, Ordering::SeqCst);
        }
    }

    /// Make `node` accept connections again.
    pub fn set_up(&self, node: NodeIndex) {
        if let Some(n) = self.nodes.get(node.0) {
            n.up.store(true, Ordering::SeqCst);
        }
    }

    /// The chunk store behind `node`.
    pub fn store(&self, node: NodeIndex) -> Option<&Arc<dyn ChunkStore>> {
        self.nodes.get(node.0).map(|n| n.service.store())
    }

    /// Open a pipe to `node` and start serving its far end.
    ///
    /// Cancelling the returned token aborts the node side without letting
    /// it commit.
    fn dial(&self, node: NodeIndex) -> Result<(DuplexStream, CancellationToken), NetError> {
        let target = self.nodes.get(node.0).ok_or(NetError::UnknownNode(node))?;
        if !target.up.load(Ordering::SeqCst) {
            return Err(NetError::Connect(format!("node {node} is down")));
        }

        let (client, server) = tokio::io::duplex(PIPE_CAPACITY);
        let reset = CancellationToken::new();
        let service = Arc::clone(&target.service);
        let server_reset = reset.clone();
        tokio::spawn(async move {
            let (recv, send) = tokio::io::split(server);
            let recv = ResetAwareReader::new(recv, server_reset.clone());
            tokio::select! {
                biased;
                _ = server_reset.cancelled() => debug!(%node, "local stream reset by client"),
                res = service.handle_stream(recv, send) => {
                    if let Err(e) = res {
                        debug!(%node, error = %e, "local stream ended with error");
                    }
                }
            }
        });
        Ok((client, reset))
    }
}

#[async_trait::async_trait]
impl Transport for LocalTransport {
    fn node_count(&self) -> usize {
        self.nodes.len()
    }

    async fn put_chunk(
        &self,
        node: NodeIndex,
        key: &FileKey,
        size: u64,
        source: &mut (dyn AsyncRead + Send + Unpin),
        cancel: &CancellationToken,
    ) -> Result<ChunkReceipt, NetError> {
        let (stream, reset) = self.dial(node)?;
        let (mut recv, mut send) = tokio::io::split(stream);
        // Declared after the pipe halves so it drops, and resets, first.
        let abort = reset.clone().drop_guard();
        match send_chunk(key, size, source, &mut send, &mut recv, cancel).await {
            Ok(receipt) => {
                abort.disarm();
                Ok(receipt)
            }
            Err(e) => {
                reset.cancel();
                Err(e)
            }
        }
    }

    async fn get_chunk(
        &self,
        node: NodeIndex,
        key: &FileKey,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
        cancel: &CancellationToken,
    ) -> Result<ChunkReceipt, NetError> {
        let (stream, _) = self.dial(node)?;
        let (mut recv, mut send) = tokio::io::split(stream);
        receive_chunk(key, &mut send, &mut recv, sink, cancel).await
    }
}

/// Node-side read half of a local pipe.
///
/// The client resets before it drops its end, so an end-of-stream observed
/// after the reset is reported as [`io::ErrorKind::ConnectionReset`] rather
/// than a clean close the node could commit on.
struct ResetAwareReader<R> {
    inner: R,
    reset: CancellationToken,
}

impl<R> ResetAwareReader<R> {
    fn new(inner: R, reset: CancellationToken) -> Self {
        Self { inner, reset }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ResetAwareReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        if buf.filled().len() == before && buf.remaining() > 0 && this.reset.is_cancelled() {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "stream reset by client",
            )));
        }
        Poll::Ready(Ok(()))
    }
}
