//! QUIC transport built on iroh.
//!
//! [`QuicTransport`] owns an iroh [`Endpoint`] and one connection slot per
//! configured node. The node list is fixed at construction; a slot is
//! (re)connected lazily when its connection is missing or closed. Every
//! chunk transfer runs on its own bidirectional stream, so many chunk tasks
//! share a node's connection concurrently.

use std::ops::{Deref, DerefMut};
use std::time::Duration;

use iroh::endpoint::{Connection, RecvStream, SendStream};
use iroh::{Endpoint, EndpointAddr};
use reef_types::{FileKey, NodeIndex};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{ChunkReceipt, receive_chunk, send_chunk};
use crate::error::NetError;
use crate::{REEF_ALPN, Transport};

struct NodeSlot {
    addr: EndpointAddr,
    conn: RwLock<Option<Connection>>,
}

/// Network transport from the gateway to its storage nodes.
pub struct QuicTransport {
    endpoint: Endpoint,
    alpn: Vec<u8>,
    nodes: Vec<NodeSlot>,
    connect_timeout: Duration,
}

impl QuicTransport {
    /// Create a transport over `endpoint` for the given node list.
    ///
    /// `nodes[i]` is addressed as `NodeIndex(i)` for the transport's lifetime.
    pub fn new(endpoint: Endpoint, nodes: Vec<EndpointAddr>, connect_timeout: Duration) -> Self {
        Self::with_alpn(endpoint, REEF_ALPN.to_vec(), nodes, connect_timeout)
    }

    /// Create a transport that dials nodes with a cluster-specific ALPN.
    ///
    /// Use [`crate::cluster_alpn`] to derive the ALPN from a shared secret.
    pub fn with_alpn(
        endpoint: Endpoint,
        alpn: Vec<u8>,
        nodes: Vec<EndpointAddr>,
        connect_timeout: Duration,
    ) -> Self {
        let nodes = nodes
            .into_iter()
            .map(|addr| NodeSlot {
                addr,
                conn: RwLock::new(None),
            })
            .collect();
        Self {
            endpoint,
            alpn,
            nodes,
            connect_timeout,
        }
    }

    /// Return a reference to the underlying iroh endpoint.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Try to connect to every node up front.
    ///
    /// Failures are logged, not returned: an unreachable node only fails the
    /// transfers that are placed on it. Returns the number of nodes reached.
    pub async fn connect_all(&self) -> usize {
        let mut reached = 0;
        for i in 0..self.nodes.len() {
            match self.connection(NodeIndex(i)).await {
                Ok(_) => reached += 1,
                Err(e) => warn!(node = i, error = %e, "storage node unreachable at startup"),
            }
        }
        info!(reached, total = self.nodes.len(), "connected to storage nodes");
        reached
    }

    // -------------------------------------------------------------------
    // Connection management
    // -------------------------------------------------------------------

    /// Get the live connection to `node`, reconnecting if needed.
    ///
    /// Concurrent callers share the read lock; only a reconnect takes the
    /// slot's write lock, and it re-checks so a single dial wins.
    async fn connection(&self, node: NodeIndex) -> Result<Connection, NetError> {
        let slot = self.nodes.get(node.0).ok_or(NetError::UnknownNode(node))?;

        if let Some(conn) = slot.conn.read().await.as_ref()
            && conn.close_reason().is_none()
        {
            return Ok(conn.clone());
        }

        let mut guard = slot.conn.write().await;
        if let Some(conn) = guard.as_ref()
            && conn.close_reason().is_none()
        {
            return Ok(conn.clone());
        }

        debug!(%node, remote = %slot.addr.id.fmt_short(), "connecting to storage node");
        let conn = tokio::time::timeout(
            self.connect_timeout,
            self.endpoint.connect(slot.addr.clone(), &self.alpn),
        )
        .await
        .map_err(|_| NetError::TimedOut)?
        .map_err(|e| NetError::Connect(e.to_string()))?;

        *guard = Some(conn.clone());
        Ok(conn)
    }

    /// Gracefully close the transport.
    pub async fn close(&self) {
        self.endpoint.close().await;
    }
}

/// Resets the send stream when dropped unless disarmed, so a failed or
/// abandoned upload is never seen by the node as a clean half-close.
struct ResetOnDrop(Option<SendStream>);

impl ResetOnDrop {
    fn disarm(mut self) {
        self.0.take();
    }
}

impl Deref for ResetOnDrop {
    type Target = SendStream;

    fn deref(&self) -> &SendStream {
        self.0.as_ref().expect("stream present until drop")
    }
}

impl DerefMut for ResetOnDrop {
    fn deref_mut(&mut self) -> &mut SendStream {
        self.0.as_mut().expect("stream present until drop")
    }
}

impl Drop for ResetOnDrop {
    fn drop(&mut self) {
        if let Some(mut send) = self.0.take() {
            let _ = send.reset(0u32.into());
        }
    }
}

/// Upload one chunk over an already opened bidirectional stream.
///
/// The send half is reset, not finished, unless the node acknowledged the
/// chunk, including when this future is dropped mid-transfer.
pub(crate) async fn put_on_stream(
    key: &FileKey,
    size: u64,
    source: &mut (dyn AsyncRead + Send + Unpin),
    send: SendStream,
    recv: &mut RecvStream,
    cancel: &CancellationToken,
) -> Result<ChunkReceipt, NetError> {
    let mut send = ResetOnDrop(Some(send));
    let receipt = send_chunk(key, size, source, &mut *send, recv, cancel).await?;
    send.disarm();
    Ok(receipt)
}

#[async_trait::async_trait]
impl Transport for QuicTransport {
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
        let conn = self.connection(node).await?;
        let (send, mut recv) = conn
            .open_bi()
            .await
            .map_err(|e| NetError::StreamOpen(e.to_string()))?;

        put_on_stream(key, size, source, send, &mut recv, cancel).await
    }

    async fn get_chunk(
        &self,
        node: NodeIndex,
        key: &FileKey,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
        cancel: &CancellationToken,
    ) -> Result<ChunkReceipt, NetError> {
        let conn = self.connection(node).await?;
        let (mut send, mut recv) = conn
            .open_bi()
            .await
            .map_err(|e| NetError::StreamOpen(e.to_string()))?;

        receive_chunk(key, &mut send, &mut recv, sink, cancel).await
    }
}
