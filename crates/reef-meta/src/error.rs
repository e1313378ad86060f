//! Error types for plan persistence and assembly.

/// Errors returned by [`MetaStore`](crate::MetaStore) operations.
#[derive(Debug, thiserror::Error)]
pub enum MetaError {
    /// Fjall database error.
    #[error("fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    /// I/O error (e.g. from Fjall guard operations).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serde(#[from] postcard::Error),

    /// A stored key is not valid UTF-8.
    #[error("corrupt plan key")]
    CorruptKey,
}

/// Bookkeeping failures while assembling a [`ShardPlan`](reef_types::ShardPlan).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    /// A shard was recorded for a chunk index outside `[0, chunk_count)`.
    #[error("chunk index {index} out of range for {count} chunks")]
    IndexOutOfRange {
        /// The offending index.
        index: usize,
        /// Number of chunks in the plan.
        count: usize,
    },

    /// The same chunk index was recorded twice.
    #[error("chunk {index} recorded twice")]
    Duplicate {
        /// The repeated index.
        index: usize,
    },

    /// A chunk slot was never filled.
    #[error("chunk {index} has no shard record")]
    Missing {
        /// First unfilled index.
        index: usize,
    },

    /// Shard sizes do not add up to the file size.
    #[error("shard sizes sum to {actual}, expected {expected}")]
    SizeMismatch {
        /// The original file size.
        expected: u64,
        /// Sum of recorded shard sizes.
        actual: u64,
    },
}
