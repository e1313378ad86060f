//! Gateway side of the chunk streaming protocol.
//!
//! Both functions observe `cancel` at frame granularity: every read from the
//! source, send, receive and sink write races the token, so a stalled peer
//! or source never blocks a cancelled transfer.

use std::future::Future;

use reef_types::{Checksum, FileKey};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::NetError;
use crate::message::{FRAME_SIZE, Frame, NodeMessage, read_message, write_message};

/// Outcome of one chunk transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkReceipt {
    /// Bytes transferred.
    pub bytes: u64,
    /// Digest of the transferred bytes.
    pub checksum: Checksum,
}

async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, NetError>
where
    F: Future<Output = Result<T, NetError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(NetError::Cancelled),
        res = fut => res,
    }
}

/// Read until `buf` is full or the source ends. Returns the bytes read.
async fn fill<S>(source: &mut S, buf: &mut [u8]) -> Result<usize, NetError>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Upload exactly `size` bytes from `source` as the chunk for `key`.
///
/// Frames are read from the source in [`FRAME_SIZE`] slices no matter how the
/// source partitions its data; bytes past `size` are left unread. At least
/// one frame is always sent so the node learns the key. After the last frame
/// the send side is half-closed and the node's acknowledgement is checked
/// against the local size and digest.
pub async fn send_chunk<S, W, R>(
    key: &FileKey,
    size: u64,
    source: &mut S,
    send: &mut W,
    recv: &mut R,
    cancel: &CancellationToken,
) -> Result<ChunkReceipt, NetError>
where
    S: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
    R: AsyncRead + Unpin + ?Sized,
{
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; FRAME_SIZE];
    let mut sent = 0u64;

    loop {
        let want = (size - sent).min(FRAME_SIZE as u64) as usize;
        let got = cancellable(cancel, fill(source, &mut buf[..want])).await?;
        if got < want {
            return Err(NetError::SourceExhausted {
                expected: size,
                got: sent + got as u64,
            });
        }

        hasher.update(&buf[..got]);
        let frame = NodeMessage::Upload(Frame {
            key: key.clone(),
            payload: buf[..got].to_vec(),
        });
        cancellable(cancel, write_message(send, &frame)).await?;
        sent += got as u64;

        if sent >= size {
            break;
        }
    }

    cancellable(cancel, async { send.shutdown().await.map_err(NetError::from) }).await?;
    let checksum = Checksum::from_hasher(&hasher);

    match cancellable(cancel, read_message(recv)).await? {
        Some(NodeMessage::UploadAck {
            key: ack_key,
            size: stored,
            checksum: remote,
        }) => {
            if ack_key != *key {
                warn!(expected = %key, received = %ack_key, "UploadAck key mismatch");
            }
            if stored != size {
                return Err(NetError::SizeMismatch {
                    expected: size,
                    actual: stored,
                });
            }
            if remote != checksum {
                return Err(NetError::IntegrityFailure {
                    key: key.clone(),
                    expected: checksum,
                    actual: remote,
                });
            }
            debug!(%key, size, "chunk acknowledged by node");
            Ok(ChunkReceipt {
                bytes: size,
                checksum,
            })
        }
        Some(NodeMessage::Rejected { code, reason }) => Err(NetError::Rejected { code, reason }),
        Some(other) => Err(NetError::Protocol(format!(
            "expected UploadAck, got: {other:?}"
        ))),
        None => Err(NetError::StreamClosed),
    }
}

/// Download the chunk for `key`, writing frames to `sink` in arrival order.
///
/// Completes when the node finishes the stream. On error, whatever was
/// already written stays in the sink.
pub async fn receive_chunk<W, R, K>(
    key: &FileKey,
    send: &mut W,
    recv: &mut R,
    sink: &mut K,
    cancel: &CancellationToken,
) -> Result<ChunkReceipt, NetError>
where
    W: AsyncWrite + Unpin + ?Sized,
    R: AsyncRead + Unpin + ?Sized,
    K: AsyncWrite + Unpin + ?Sized,
{
    let request = NodeMessage::Download { key: key.clone() };
    cancellable(cancel, write_message(send, &request)).await?;
    cancellable(cancel, async { send.shutdown().await.map_err(NetError::from) }).await?;

    let mut hasher = blake3::Hasher::new();
    let mut bytes = 0u64;

    loop {
        match cancellable(cancel, read_message(recv)).await? {
            None => break,
            Some(NodeMessage::Data(frame)) => {
                if frame.key != *key {
                    return Err(NetError::Protocol(format!(
                        "requested {key}, node sent frame for {}",
                        frame.key
                    )));
                }
                cancellable(cancel, async {
                    sink.write_all(&frame.payload).await.map_err(NetError::from)
                })
                .await?;
                hasher.update(&frame.payload);
                bytes += frame.payload.len() as u64;
            }
            Some(NodeMessage::Rejected { code, reason }) => {
                return Err(NetError::Rejected { code, reason });
            }
            Some(other) => {
                return Err(NetError::Protocol(format!(
                    "expected Data, got: {other:?}"
                )));
            }
        }
    }

    cancellable(cancel, async { sink.flush().await.map_err(NetError::from) }).await?;
    debug!(%key, bytes, "chunk received from node");
    Ok(ChunkReceipt {
        bytes,
        checksum: Checksum::from_hasher(&hasher),
    })
}
