//! Chunk storage trait and backend implementations.
//!
//! A storage node keeps exactly one chunk per [`FileKey`](reef_types::FileKey).
//! Chunks are written through a [`ChunkWriter`] that only becomes visible to
//! readers once committed; a writer dropped before [`ChunkWriter::commit`]
//! leaves no trace.
//!
//! - [`MemoryStore`] keeps chunks in a `RwLock<HashMap>`.
//! - [`FileStore`] keeps one file per chunk, written through a temp file and
//!   renamed into place on commit.
//! - [`SlowStore`] wraps another store and injects latency, for tests.

mod error;
mod file_store;
mod memory_store;
mod slow_store;
mod traits;

pub use error::StoreError;
pub use file_store::FileStore;
pub use memory_store::MemoryStore;
pub use slow_store::SlowStore;
pub use traits::{ChunkReader, ChunkStore, ChunkWriter};
