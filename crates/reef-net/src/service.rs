//! Storage node side of the chunk streaming protocol.

use std::sync::Arc;

use reef_store::{ChunkStore, ChunkWriter, StoreError};
use reef_types::{Checksum, FileKey};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::error::NetError;
use crate::message::{FRAME_SIZE, Frame, NodeMessage, RejectCode, read_message, write_message};

/// Serves chunk uploads and downloads for one storage node.
///
/// Transport-agnostic: [`handle_stream`](Self::handle_stream) drives one
/// request over any pair of byte streams.
pub struct NodeService {
    store: Arc<dyn ChunkStore>,
}

impl NodeService {
    /// Create a service persisting chunks into `store`.
    pub fn new(store: Arc<dyn ChunkStore>) -> Self {
        Self { store }
    }

    /// The backing chunk store.
    pub fn store(&self) -> &Arc<dyn ChunkStore> {
        &self.store
    }

    /// Handle one request stream to completion.
    ///
    /// The first message decides the exchange: an `Upload` frame starts an
    /// upload, `Download` starts a download. Errors are reported to the peer
    /// with a `Rejected` message when the stream still allows it.
    pub async fn handle_stream<R, W>(&self, mut recv: R, mut send: W) -> Result<(), NetError>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        match read_message(&mut recv).await? {
            Some(NodeMessage::Upload(frame)) => self.handle_upload(frame, &mut recv, &mut send).await,
            Some(NodeMessage::Download { key }) => self.handle_download(key, &mut send).await,
            Some(other) => {
                let reason = format!("unexpected request: {}", message_kind(&other));
                reject(&mut send, RejectCode::Internal, &reason).await;
                Err(NetError::Protocol(reason))
            }
            None => Err(NetError::StreamClosed),
        }
    }

    // -------------------------------------------------------------------
    // Upload
    // -------------------------------------------------------------------

    async fn handle_upload<R, W>(
        &self,
        first: Frame,
        recv: &mut R,
        send: &mut W,
    ) -> Result<(), NetError>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        match self.receive_upload(first, recv).await {
            Ok((key, size, checksum)) => {
                debug!(%key, size, "chunk committed");
                write_message(send, &NodeMessage::UploadAck { key, size, checksum }).await?;
                send.shutdown().await?;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "chunk upload aborted");
                reject(send, RejectCode::Internal, &e.to_string()).await;
                Err(e)
            }
        }
    }

    /// Drain upload frames into a writer. The writer is dropped (discarding
    /// the partial chunk) on every early return.
    async fn receive_upload<R>(
        &self,
        first: Frame,
        recv: &mut R,
    ) -> Result<(FileKey, u64, Checksum), NetError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut state = UploadState::Uninitialized;
        state.append(self.store.as_ref(), first).await?;

        while let Some(message) = read_message(recv).await? {
            match message {
                NodeMessage::Upload(frame) => state.append(self.store.as_ref(), frame).await?,
                other => {
                    return Err(NetError::Protocol(format!(
                        "unexpected {} during upload",
                        message_kind(&other)
                    )));
                }
            }
        }

        state.commit().await
    }

    // -------------------------------------------------------------------
    // Download
    // -------------------------------------------------------------------

    async fn handle_download<W>(&self, key: FileKey, send: &mut W) -> Result<(), NetError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let mut reader = match self.store.open_reader(&key).await {
            Ok(reader) => reader,
            Err(StoreError::NotFound(_)) => {
                debug!(%key, "download of unknown chunk");
                reject(send, RejectCode::NotFound, &format!("no chunk for {key}")).await;
                return Ok(());
            }
            Err(e) => {
                warn!(%key, error = %e, "failed to open chunk");
                reject(send, RejectCode::Internal, &e.to_string()).await;
                return Err(e.into());
            }
        };

        let mut buf = vec![0u8; FRAME_SIZE];
        let mut served = 0u64;
        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    warn!(%key, error = %e, served, "failed reading chunk");
                    reject(send, RejectCode::Internal, &e.to_string()).await;
                    return Err(e.into());
                }
            };
            let frame = NodeMessage::Data(Frame {
                key: key.clone(),
                payload: buf[..n].to_vec(),
            });
            write_message(send, &frame).await?;
            served += n as u64;
        }

        send.shutdown().await?;
        debug!(%key, size = served, "chunk served");
        Ok(())
    }
}

/// Per-stream writer lifecycle: the writer is opened by the first frame and
/// consumed by commit. Dropping the state in any other phase discards the
/// partial chunk.
enum UploadState {
    Uninitialized,
    Open {
        key: FileKey,
        writer: Box<dyn ChunkWriter>,
        hasher: blake3::Hasher,
        size: u64,
    },
    Closed,
}

impl UploadState {
    async fn append(&mut self, store: &dyn ChunkStore, frame: Frame) -> Result<(), NetError> {
        if matches!(self, UploadState::Uninitialized) {
            let writer = store.open_writer(&frame.key).await?;
            *self = UploadState::Open {
                key: frame.key.clone(),
                writer,
                hasher: blake3::Hasher::new(),
                size: 0,
            };
        }

        match self {
            UploadState::Open {
                key,
                writer,
                hasher,
                size,
            } => {
                if *key != frame.key {
                    return Err(NetError::Protocol(format!(
                        "stream for {key} carried a frame for {}",
                        frame.key
                    )));
                }
                writer.write(&frame.payload).await?;
                hasher.update(&frame.payload);
                *size += frame.payload.len() as u64;
                Ok(())
            }
            UploadState::Uninitialized | UploadState::Closed => Err(NetError::Protocol(
                "frame received after upload closed".to_string(),
            )),
        }
    }

    async fn commit(&mut self) -> Result<(FileKey, u64, Checksum), NetError> {
        match std::mem::replace(self, UploadState::Closed) {
            UploadState::Open {
                key,
                writer,
                hasher,
                size,
            } => {
                writer.commit().await?;
                Ok((key, size, Checksum::from_hasher(&hasher)))
            }
            UploadState::Uninitialized | UploadState::Closed => Err(NetError::Protocol(
                "no open chunk to commit".to_string(),
            )),
        }
    }
}

async fn reject<W>(send: &mut W, code: RejectCode, reason: &str)
where
    W: AsyncWrite + Unpin + Send,
{
    let message = NodeMessage::Rejected {
        code,
        reason: reason.to_string(),
    };
    // The peer may already be gone.
    if write_message(send, &message).await.is_ok() {
        let _ = send.shutdown().await;
    }
}

fn message_kind(message: &NodeMessage) -> &'static str {
    match message {
        NodeMessage::Upload(_) => "Upload",
        NodeMessage::UploadAck { .. } => "UploadAck",
        NodeMessage::Download { .. } => "Download",
        NodeMessage::Data(_) => "Data",
        NodeMessage::Rejected { .. } => "Rejected",
    }
}
