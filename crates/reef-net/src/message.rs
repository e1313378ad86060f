//! Protocol messages and their length-prefixed framing.
//!
//! Every message is postcard-encoded and preceded by its length as a 4-byte
//! big-endian integer.

use reef_types::{Checksum, FileKey};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::NetError;

/// Payload bytes carried by one frame.
pub const FRAME_SIZE: usize = 4096;

/// Maximum encoded message size: 16 MiB.
const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// One wire-level unit of a streamed transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Key of the chunk the payload belongs to.
    pub key: FileKey,
    /// At most [`FRAME_SIZE`] bytes of chunk data.
    pub payload: Vec<u8>,
}

/// Why a node refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectCode {
    /// The requested chunk does not exist on this node.
    NotFound,
    /// The node failed while handling the request.
    Internal,
}

/// Messages exchanged between the gateway and a storage node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeMessage {
    /// Gateway → node: chunk bytes for an upload.
    Upload(Frame),

    /// Node → gateway: the uploaded chunk was committed.
    UploadAck {
        /// Key of the committed chunk.
        key: FileKey,
        /// Bytes the node persisted.
        size: u64,
        /// Digest of the bytes the node persisted.
        checksum: Checksum,
    },

    /// Gateway → node: stream back the chunk for `key`.
    Download {
        /// Key of the requested chunk.
        key: FileKey,
    },

    /// Node → gateway: chunk bytes for a download.
    Data(Frame),

    /// Node → gateway: the request failed.
    Rejected {
        /// Failure class.
        code: RejectCode,
        /// Human-readable detail.
        reason: String,
    },
}

/// Write one length-prefixed message.
pub async fn write_message<W>(writer: &mut W, message: &NodeMessage) -> Result<(), NetError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let payload =
        postcard::to_allocvec(message).map_err(|e| NetError::Serialization(e.to_string()))?;
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(NetError::Serialization(format!(
            "message too large: {} bytes (max {MAX_MESSAGE_SIZE})",
            payload.len()
        )));
    }

    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(&payload);
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed message.
///
/// Returns `None` when the peer closed the stream cleanly at a message
/// boundary. A stream that ends mid-message is [`NetError::StreamClosed`].
pub async fn read_message<R>(reader: &mut R) -> Result<Option<NodeMessage>, NetError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut len_buf = [0u8; 4];
    if reader.read(&mut len_buf[..1]).await? == 0 {
        return Ok(None);
    }
    read_exact(reader, &mut len_buf[1..]).await?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > MAX_MESSAGE_SIZE {
        return Err(NetError::Serialization(format!(
            "message too large: {len} bytes (max {MAX_MESSAGE_SIZE})"
        )));
    }

    let mut payload = vec![0u8; len];
    read_exact(reader, &mut payload).await?;
    let message =
        postcard::from_bytes(&payload).map_err(|e| NetError::Serialization(e.to_string()))?;
    Ok(Some(message))
}

async fn read_exact<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), NetError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(NetError::StreamClosed),
        Err(e) => Err(NetError::Io(e)),
    }
}
