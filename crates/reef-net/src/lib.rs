//! Chunk streaming protocol for reef.
//!
//! One chunk moves over one bidirectional stream:
//!
//! - **upload**: the gateway sends [`NodeMessage::Upload`] frames carrying the
//!   key and at most [`FRAME_SIZE`] payload bytes, then half-closes. The node
//!   commits the chunk and answers with a single [`NodeMessage::UploadAck`],
//!   or [`NodeMessage::Rejected`].
//! - **download**: the gateway sends [`NodeMessage::Download`] and half-closes.
//!   The node streams [`NodeMessage::Data`] frames and finishes the stream.
//!
//! The gateway side lives in [`send_chunk`] / [`receive_chunk`], the node side
//! in [`NodeService`]. [`Transport`] addresses nodes by [`NodeIndex`];
//! [`QuicTransport`] implements it over iroh, [`LocalTransport`] in-process.

mod client;
mod error;
mod local;
mod message;
mod service;
mod transport;

pub use client::{ChunkReceipt, receive_chunk, send_chunk};
pub use error::NetError;
pub use local::LocalTransport;
pub use message::{FRAME_SIZE, Frame, NodeMessage, RejectCode, read_message, write_message};
pub use service::NodeService;
pub use transport::QuicTransport;

use reef_types::{FileKey, NodeIndex};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

/// Trait abstracting chunk transfer to the configured storage nodes.
///
/// This allows substituting a mock transport in tests (avoiding the need
/// for real iroh QUIC endpoints and network access).
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Number of nodes addressable by [`NodeIndex`].
    fn node_count(&self) -> usize;

    /// Stream exactly `size` bytes from `source` to `node` as the chunk for `key`.
    ///
    /// Returns once the node has acknowledged the committed chunk.
    async fn put_chunk(
        &self,
        node: NodeIndex,
        key: &FileKey,
        size: u64,
        source: &mut (dyn AsyncRead + Send + Unpin),
        cancel: &CancellationToken,
    ) -> Result<ChunkReceipt, NetError>;

    /// Stream the chunk for `key` from `node` into `sink`.
    async fn get_chunk(
        &self,
        node: NodeIndex,
        key: &FileKey,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
        cancel: &CancellationToken,
    ) -> Result<ChunkReceipt, NetError>;
}

/// Default ALPN protocol identifier (no cluster secret).
pub const REEF_ALPN: &[u8] = b"reef/0";

/// Derive a cluster-specific ALPN from a shared secret.
///
/// The ALPN is `reef/0/<first 16 hex chars of blake3(secret)>`. A gateway and
/// a node configured with different secrets fail the QUIC handshake.
pub fn cluster_alpn(secret: &[u8]) -> Vec<u8> {
    let hash = blake3::hash(secret);
    let hex = hash.to_hex();
    format!("reef/0/{}", &hex[..16]).into_bytes()
}
