//! Error types for chunk storage operations.

use reef_types::FileKey;

/// Errors that can occur during chunk storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No committed chunk exists for the key.
    #[error("chunk not found: {0}")]
    NotFound(FileKey),

    /// An I/O error occurred.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
