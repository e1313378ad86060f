//! Core traits for chunk storage.

use reef_types::FileKey;
use tokio::io::AsyncRead;

use crate::error::StoreError;

/// Streaming reader over a committed chunk.
pub type ChunkReader = Box<dyn AsyncRead + Send + Unpin>;

/// Trait for storing and retrieving whole chunks keyed by file identity.
///
/// All implementations must be `Send + Sync` for use across async tasks.
/// Writing a key that already exists replaces it once the new writer commits.
#[async_trait::async_trait]
pub trait ChunkStore: Send + Sync {
    /// Start writing the chunk for `key`.
    async fn open_writer(&self, key: &FileKey) -> Result<Box<dyn ChunkWriter>, StoreError>;

    /// Open the committed chunk for `key`, or [`StoreError::NotFound`].
    async fn open_reader(&self, key: &FileKey) -> Result<ChunkReader, StoreError>;

    /// Check whether a committed chunk exists for `key`.
    async fn contains(&self, key: &FileKey) -> Result<bool, StoreError>;

    /// Remove the chunk for `key`. Removing a missing key is not an error.
    async fn delete(&self, key: &FileKey) -> Result<(), StoreError>;
}

/// An in-progress chunk write.
///
/// Dropping the writer without calling [`commit`](ChunkWriter::commit)
/// discards everything written so far.
#[async_trait::async_trait]
pub trait ChunkWriter: Send {
    /// Append bytes to the chunk.
    async fn write(&mut self, data: &[u8]) -> Result<(), StoreError>;

    /// Make the chunk visible to readers. Returns the number of bytes stored.
    async fn commit(self: Box<Self>) -> Result<u64, StoreError>;
}
