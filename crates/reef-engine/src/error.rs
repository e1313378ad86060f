//! Error types for the engine.

use std::fmt;

use reef_types::{ChunkIndex, FileKey, KeyError, NodeIndex};

/// Which direction a failed chunk transfer was going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOp {
    /// Gateway → node.
    Upload,
    /// Node → gateway.
    Download,
}

impl fmt::Display for TransferOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferOp::Upload => f.write_str("upload"),
            TransferOp::Download => f.write_str("download"),
        }
    }
}

/// Errors that can occur during engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// No storage key can be derived from the file name.
    #[error("invalid file identity: {0}")]
    InvalidIdentity(#[from] KeyError),

    /// Fewer nodes than chunks per file.
    #[error("insufficient nodes: need {required}, have {available}")]
    InsufficientNodes {
        /// Chunks per file, and therefore distinct nodes required.
        required: usize,
        /// Nodes configured.
        available: usize,
    },

    /// The engine was configured with unusable settings.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Internal bookkeeping failed while assembling the shard plan.
    #[error("shard plan assembly failed: {0}")]
    Assignment(#[from] reef_meta::PlanError),

    /// A stored plan cannot be used to reconstruct the file.
    #[error("corrupt shard plan for {key}: {reason}")]
    CorruptPlan {
        /// The file key.
        key: FileKey,
        /// What is wrong with the plan.
        reason: String,
    },

    /// A chunk transfer failed.
    #[error("{op} of chunk {chunk} of {key} via node {node} failed: {source}")]
    Transfer {
        /// Direction of the transfer.
        op: TransferOp,
        /// The file key.
        key: FileKey,
        /// Which chunk failed.
        chunk: ChunkIndex,
        /// Which node it was placed on.
        node: NodeIndex,
        /// The underlying network error.
        source: reef_net::NetError,
    },

    /// No plan was committed for this key.
    #[error("no shard plan for {key}")]
    PlanNotFound {
        /// The file key.
        key: FileKey,
    },

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// A chunk transfer did not finish within the transfer timeout.
    #[error("chunk {chunk} of {key} via node {node} timed out")]
    TimedOut {
        /// The file key.
        key: FileKey,
        /// Which chunk timed out.
        chunk: ChunkIndex,
        /// Which node it was placed on.
        node: NodeIndex,
    },

    /// The file cannot be split into the configured number of chunks.
    #[error("cannot split {size} bytes into {chunks} non-empty chunks")]
    InvalidSize {
        /// File size in bytes.
        size: u64,
        /// Chunks per file.
        chunks: usize,
    },

    /// The file exceeds the configured maximum.
    #[error("file of {size} bytes exceeds the {max} byte limit")]
    TooLarge {
        /// File size in bytes.
        size: u64,
        /// Configured maximum.
        max: u64,
    },

    /// Failed to access the plan store.
    #[error("metadata error: {0}")]
    Meta(#[from] reef_meta::MetaError),

    /// A chunk task panicked or was aborted.
    #[error("chunk task failed: {0}")]
    Task(String),
}

impl EngineError {
    /// Wrap a network error with the chunk it happened on.
    ///
    /// Caller cancellation is surfaced as [`EngineError::Cancelled`] rather
    /// than as a transfer failure.
    pub(crate) fn transfer(
        op: TransferOp,
        key: &FileKey,
        chunk: ChunkIndex,
        node: NodeIndex,
        source: reef_net::NetError,
    ) -> Self {
        match source {
            reef_net::NetError::Cancelled => EngineError::Cancelled,
            source => EngineError::Transfer {
                op,
                key: key.clone(),
                chunk,
                node,
                source,
            },
        }
    }
}

/// A failed download together with how much of the file reached the sink.
///
/// The sink is left as it was when the error occurred; truncating or
/// discarding it is up to the caller.
#[derive(Debug, thiserror::Error)]
#[error("download failed after {bytes_written} bytes: {source}")]
pub struct DownloadError {
    /// Bytes written to the sink before the failure.
    pub bytes_written: u64,
    /// The cause.
    pub source: EngineError,
}
