//! In-memory chunk storage backend.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, RwLock};

use bytes::{Bytes, BytesMut};
use reef_types::FileKey;
use tracing::debug;

use crate::error::StoreError;
use crate::traits::{ChunkReader, ChunkStore, ChunkWriter};

type ChunkMap = Arc<RwLock<HashMap<FileKey, Bytes>>>;

/// In-memory chunk store backed by a `RwLock<HashMap>`.
///
/// Used in tests and by nodes configured with the `memory` backend.
#[derive(Default)]
pub struct MemoryStore {
    chunks: ChunkMap,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed chunks.
    pub fn len(&self) -> usize {
        self.chunks.read().expect("lock poisoned").len()
    }

    /// Whether no chunk has been committed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Committed bytes for `key`, if any.
    pub fn get(&self, key: &FileKey) -> Option<Bytes> {
        self.chunks.read().expect("lock poisoned").get(key).cloned()
    }
}

struct MemoryWriter {
    key: FileKey,
    buf: BytesMut,
    chunks: ChunkMap,
}

#[async_trait::async_trait]
impl ChunkWriter for MemoryWriter {
    async fn write(&mut self, data: &[u8]) -> Result<(), StoreError> {
        self.buf.extend_from_slice(data);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<u64, StoreError> {
        let size = self.buf.len() as u64;
        debug!(key = %self.key, size, "storing chunk in memory");
        self.chunks
            .write()
            .expect("lock poisoned")
            .insert(self.key, self.buf.freeze());
        Ok(size)
    }
}

#[async_trait::async_trait]
impl ChunkStore for MemoryStore {
    async fn open_writer(&self, key: &FileKey) -> Result<Box<dyn ChunkWriter>, StoreError> {
        Ok(Box::new(MemoryWriter {
            key: key.clone(),
            buf: BytesMut::new(),
            chunks: Arc::clone(&self.chunks),
        }))
    }

    async fn open_reader(&self, key: &FileKey) -> Result<ChunkReader, StoreError> {
        let data = self
            .get(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        Ok(Box::new(Cursor::new(data)))
    }

    async fn contains(&self, key: &FileKey) -> Result<bool, StoreError> {
        Ok(self.chunks.read().expect("lock poisoned").contains_key(key))
    }

    async fn delete(&self, key: &FileKey) -> Result<(), StoreError> {
        self.chunks.write().expect("lock poisoned").remove(key);
        Ok(())
    }
}
