//! [`FileEngine`], the interface front doors program against.

use std::sync::Arc;

use reef_types::ShardPlan;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

use crate::error::{DownloadError, EngineError};
use crate::source::ByteSource;

/// Whole-file operations exposed to front doors.
#[async_trait::async_trait]
pub trait FileEngine: Send + Sync {
    /// Store `source` under the identity derived from `name`.
    ///
    /// Returns the committed plan. On any error no plan is written.
    async fn upload(
        &self,
        name: &str,
        source: Arc<dyn ByteSource>,
        cancel: &CancellationToken,
    ) -> Result<ShardPlan, EngineError>;

    /// Reconstruct the file stored under `name` into `sink`.
    ///
    /// Returns the number of bytes written.
    async fn download(
        &self,
        name: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
        cancel: &CancellationToken,
    ) -> Result<u64, DownloadError>;

    /// Look up the committed plan for `name`.
    fn plan(&self, name: &str) -> Result<ShardPlan, EngineError>;

    /// Largest file [`upload`](Self::upload) accepts.
    fn max_file_size(&self) -> u64;
}
