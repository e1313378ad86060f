//! The upload and download orchestrators.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use reef_meta::{PlanStore, ShardPlanBuilder};
use reef_net::{NetError, Transport};
use reef_placement::{Placement, PlacementError};
use reef_types::{ChunkIndex, FileKey, NodeIndex, Shard, ShardPlan};
use tokio::io::{AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::FileEngine;
use crate::error::{DownloadError, EngineError, TransferOp};
use crate::layout::{ChunkLayout, ChunkRange};
use crate::source::ByteSource;

/// Bytes read from the source per `read_at` call.
const READ_SIZE: usize = 64 * 1024;

/// Capacity of the pipe between a chunk's source reader and its transfer.
const PIPE_CAPACITY: usize = 64 * 1024;

/// Settings for a [`Gateway`].
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Number of chunks every file is split into.
    pub chunks: usize,
    /// Largest accepted file in bytes.
    pub max_file_size: u64,
    /// Upper bound on a single chunk upload.
    pub transfer_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            chunks: 3,
            max_file_size: 10 * 1024 * 1024,
            transfer_timeout: Duration::from_secs(10),
        }
    }
}

/// Splits files across storage nodes and puts them back together.
pub struct Gateway {
    config: GatewayConfig,
    placement: Placement,
    transport: Arc<dyn Transport>,
    plans: Arc<dyn PlanStore>,
}

impl Gateway {
    /// Create a gateway over `transport`'s node list.
    ///
    /// Fails with [`EngineError::InsufficientNodes`] when the transport has
    /// fewer nodes than `config.chunks`.
    pub fn new(
        config: GatewayConfig,
        transport: Arc<dyn Transport>,
        plans: Arc<dyn PlanStore>,
    ) -> Result<Self, EngineError> {
        let placement =
            Placement::new(config.chunks, transport.node_count()).map_err(|e| match e {
                PlacementError::InsufficientNodes {
                    required,
                    available,
                } => EngineError::InsufficientNodes {
                    required,
                    available,
                },
                other => EngineError::InvalidConfig(other.to_string()),
            })?;

        info!(
            chunks = config.chunks,
            nodes = placement.node_count(),
            max_file_size = config.max_file_size,
            "gateway ready"
        );
        Ok(Self {
            config,
            placement,
            transport,
            plans,
        })
    }

    /// Return the gateway configuration.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    // -------------------------------------------------------------------
    // Upload
    // -------------------------------------------------------------------

    /// Split `source` into chunks, transfer them concurrently, and commit
    /// the shard plan once every chunk is acknowledged.
    ///
    /// Returns on the first chunk failure or on cancellation without
    /// writing a plan. Chunks that already reached their nodes are left
    /// there.
    pub async fn upload(
        &self,
        name: &str,
        source: Arc<dyn ByteSource>,
        cancel: &CancellationToken,
    ) -> Result<ShardPlan, EngineError> {
        let key = FileKey::resolve(name)?;
        let size = source.size();
        if size > self.config.max_file_size {
            return Err(EngineError::TooLarge {
                size,
                max: self.config.max_file_size,
            });
        }
        let layout = ChunkLayout::new(size, self.placement.chunk_count())?;
        let assignment = self.placement.assign(&key);

        info!(%key, size, chunks = layout.chunk_count(), "upload started");

        let builder = Arc::new(ShardPlanBuilder::new(size, layout.chunk_count()));
        let scope = cancel.child_token();
        let mut tasks = JoinSet::new();

        for (range, (_, node)) in layout.ranges().into_iter().zip(assignment) {
            let task = ChunkTask {
                transport: Arc::clone(&self.transport),
                source: Arc::clone(&source),
                builder: Arc::clone(&builder),
                key: key.clone(),
                range,
                node,
                timeout: self.config.transfer_timeout,
                cancel: scope.clone(),
            };
            tasks.spawn(task.run());
        }

        // Fan-in: the first failure or a cancellation ends the upload.
        let outcome = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Err(EngineError::Cancelled),
                joined = tasks.join_next() => match joined {
                    None => break Ok(()),
                    Some(Ok(Ok(()))) => {}
                    Some(Ok(Err(e))) => break Err(e),
                    Some(Err(e)) => break Err(EngineError::Task(e.to_string())),
                },
            }
        };

        if let Err(e) = outcome {
            scope.cancel();
            tasks.abort_all();
            warn!(%key, error = %e, "upload failed; no plan written");
            return Err(e);
        }

        let plan = builder.build()?;
        if self.plans.get_plan(&key)?.is_some() {
            warn!(%key, "overwriting existing shard plan");
        }
        self.plans.put_plan(&key, &plan)?;

        info!(%key, size, chunks = plan.chunk_count(), "upload committed");
        Ok(plan)
    }

    // -------------------------------------------------------------------
    // Download
    // -------------------------------------------------------------------

    /// Stream the file stored under `name` into `sink`, chunk by chunk in
    /// plan order.
    ///
    /// Stops at the first failing chunk; the error carries the number of
    /// bytes already written.
    pub async fn download(
        &self,
        name: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
        cancel: &CancellationToken,
    ) -> Result<u64, DownloadError> {
        let mut counting = CountingWriter {
            inner: sink,
            written: 0,
        };
        let result = self.download_into(name, &mut counting, cancel).await;
        let bytes_written = counting.written;
        match result {
            Ok(()) => Ok(bytes_written),
            Err(source) => Err(DownloadError {
                bytes_written,
                source,
            }),
        }
    }

    async fn download_into(
        &self,
        name: &str,
        sink: &mut CountingWriter<'_>,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        let key = FileKey::resolve(name)?;
        let plan = self.plan_for(&key)?;
        info!(%key, size = plan.original_size, chunks = plan.chunk_count(), "download started");

        for (i, shard) in plan.shards.iter().enumerate() {
            if shard.chunk_index != ChunkIndex(i) {
                return Err(EngineError::CorruptPlan {
                    key,
                    reason: format!("position {i} holds chunk {}", shard.chunk_index),
                });
            }
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let chunk = shard.chunk_index;
            let node = shard.node_index;
            let receipt = self
                .transport
                .get_chunk(node, &key, &mut *sink, cancel)
                .await
                .map_err(|e| EngineError::transfer(TransferOp::Download, &key, chunk, node, e))?;

            if receipt.bytes != shard.size {
                return Err(EngineError::transfer(
                    TransferOp::Download,
                    &key,
                    chunk,
                    node,
                    NetError::SizeMismatch {
                        expected: shard.size,
                        actual: receipt.bytes,
                    },
                ));
            }
            if let Some(expected) = shard.checksum
                && expected != receipt.checksum
            {
                error!(%key, %chunk, %node, "chunk failed integrity check");
                return Err(EngineError::transfer(
                    TransferOp::Download,
                    &key,
                    chunk,
                    node,
                    NetError::IntegrityFailure {
                        key: key.clone(),
                        expected,
                        actual: receipt.checksum,
                    },
                ));
            }
            debug!(%key, %chunk, %node, size = receipt.bytes, "chunk downloaded");
        }

        info!(%key, size = plan.original_size, "download complete");
        Ok(())
    }

    // -------------------------------------------------------------------
    // Plans
    // -------------------------------------------------------------------

    /// Look up the committed plan for `name`.
    pub fn plan(&self, name: &str) -> Result<ShardPlan, EngineError> {
        let key = FileKey::resolve(name)?;
        self.plan_for(&key)
    }

    fn plan_for(&self, key: &FileKey) -> Result<ShardPlan, EngineError> {
        self.plans
            .get_plan(key)?
            .ok_or_else(|| EngineError::PlanNotFound { key: key.clone() })
    }
}

#[async_trait::async_trait]
impl FileEngine for Gateway {
    async fn upload(
        &self,
        name: &str,
        source: Arc<dyn ByteSource>,
        cancel: &CancellationToken,
    ) -> Result<ShardPlan, EngineError> {
        Gateway::upload(self, name, source, cancel).await
    }

    async fn download(
        &self,
        name: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
        cancel: &CancellationToken,
    ) -> Result<u64, DownloadError> {
        Gateway::download(self, name, sink, cancel).await
    }

    fn plan(&self, name: &str) -> Result<ShardPlan, EngineError> {
        Gateway::plan(self, name)
    }

    fn max_file_size(&self) -> u64 {
        self.config.max_file_size
    }
}

// -----------------------------------------------------------------------
// Chunk task
// -----------------------------------------------------------------------

/// Everything one chunk transfer needs, owned so it can run on its own task.
struct ChunkTask {
    transport: Arc<dyn Transport>,
    source: Arc<dyn ByteSource>,
    builder: Arc<ShardPlanBuilder>,
    key: FileKey,
    range: ChunkRange,
    node: NodeIndex,
    timeout: Duration,
    cancel: CancellationToken,
}

impl ChunkTask {
    /// Transfer the chunk and record its shard.
    ///
    /// The source range is pumped through an in-memory pipe into the
    /// transport, so reading and sending overlap.
    async fn run(self) -> Result<(), EngineError> {
        let chunk = self.range.index;
        let node = self.node;
        let (mut pipe_in, mut pipe_out) = tokio::io::duplex(PIPE_CAPACITY);

        let pump = async {
            pump_range(self.source.as_ref(), self.range, &mut pipe_in)
                .await
                .map_err(|e| {
                    EngineError::transfer(TransferOp::Upload, &self.key, chunk, node, e.into())
                })
        };
        let put = async {
            self.transport
                .put_chunk(node, &self.key, self.range.size, &mut pipe_out, &self.cancel)
                .await
                .map_err(|e| EngineError::transfer(TransferOp::Upload, &self.key, chunk, node, e))
        };

        let receipt = match tokio::time::timeout(self.timeout, async {
            tokio::try_join!(pump, put)
        })
        .await
        {
            Ok(result) => result?.1,
            Err(_) => {
                warn!(key = %self.key, %chunk, %node, timeout = ?self.timeout, "chunk transfer timed out");
                return Err(EngineError::TimedOut {
                    key: self.key.clone(),
                    chunk,
                    node,
                });
            }
        };

        debug!(key = %self.key, %chunk, %node, size = receipt.bytes, "chunk uploaded");
        self.builder.record(Shard {
            chunk_index: chunk,
            node_index: node,
            size: receipt.bytes,
            checksum: Some(receipt.checksum),
        })?;
        Ok(())
    }
}

/// Copy `range` of `source` into `pipe`, then close it.
async fn pump_range(
    source: &dyn ByteSource,
    range: ChunkRange,
    pipe: &mut DuplexStream,
) -> std::io::Result<()> {
    let mut pos = 0u64;
    while pos < range.size {
        let len = (range.size - pos).min(READ_SIZE as u64) as usize;
        let bytes = source.read_at(range.offset + pos, len).await?;
        if bytes.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("source ended at offset {}", range.offset + pos),
            ));
        }
        pipe.write_all(&bytes).await?;
        pos += bytes.len() as u64;
    }
    pipe.shutdown().await
}

// -----------------------------------------------------------------------
// Download sink
// -----------------------------------------------------------------------

/// Counts the bytes that reach the caller's sink.
struct CountingWriter<'a> {
    inner: &'a mut (dyn AsyncWrite + Send + Unpin),
    written: u64,
}

impl AsyncWrite for CountingWriter<'_> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut *this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = &poll {
            this.written += *n as u64;
        }
        poll
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut *self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut *self.get_mut().inner).poll_shutdown(cx)
    }
}
