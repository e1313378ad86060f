//! File-based chunk storage backend.
//!
//! Stores one file per chunk at `{base_dir}/{key}`. Keys never contain `.`,
//! so in-progress writes use `{key}.{seq}.tmp` without colliding.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use reef_types::FileKey;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::traits::{ChunkReader, ChunkStore, ChunkWriter};

/// File-based chunk store.
///
/// Writes are atomic: data goes to a temporary file first and is renamed
/// into place on commit, so readers never observe a half-written chunk.
pub struct FileStore {
    base_dir: PathBuf,
    seq: AtomicU64,
}

impl FileStore {
    /// Create a new file store rooted at the given directory.
    ///
    /// The directory is created if it does not exist. Temp files left behind
    /// by a previous process are removed.
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir)?;

        for entry in std::fs::read_dir(&base_dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "tmp") {
                warn!(path = %path.display(), "removing stale temp chunk");
                let _ = std::fs::remove_file(&path);
            }
        }

        Ok(Self {
            base_dir,
            seq: AtomicU64::new(0),
        })
    }

    fn chunk_path(&self, key: &FileKey) -> PathBuf {
        self.base_dir.join(key.as_str())
    }
}

struct FileWriter {
    key: FileKey,
    file: Option<tokio::fs::File>,
    tmp_path: PathBuf,
    path: PathBuf,
    written: u64,
}

#[async_trait::async_trait]
impl ChunkWriter for FileWriter {
    async fn write(&mut self, data: &[u8]) -> Result<(), StoreError> {
        if let Some(file) = self.file.as_mut() {
            file.write_all(data).await?;
            self.written += data.len() as u64;
        }
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<u64, StoreError> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        tokio::fs::rename(&self.tmp_path, &self.path).await?;
        debug!(key = %self.key, path = %self.path.display(), size = self.written, "stored chunk to file");
        // Renamed away; nothing left for Drop to clean up.
        self.tmp_path = PathBuf::new();
        Ok(self.written)
    }
}

impl Drop for FileWriter {
    fn drop(&mut self) {
        if self.tmp_path.as_os_str().is_empty() {
            return;
        }
        self.file.take();
        match std::fs::remove_file(&self.tmp_path) {
            Ok(()) => debug!(key = %self.key, "discarded uncommitted chunk"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(key = %self.key, error = %e, "failed to remove temp chunk"),
        }
    }
}

#[async_trait::async_trait]
impl ChunkStore for FileStore {
    async fn open_writer(&self, key: &FileKey) -> Result<Box<dyn ChunkWriter>, StoreError> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let tmp_path = self.base_dir.join(format!("{key}.{seq}.tmp"));
        let file = tokio::fs::File::create(&tmp_path).await?;
        Ok(Box::new(FileWriter {
            key: key.clone(),
            file: Some(file),
            tmp_path,
            path: self.chunk_path(key),
            written: 0,
        }))
    }

    async fn open_reader(&self, key: &FileKey) -> Result<ChunkReader, StoreError> {
        match tokio::fs::File::open(self.chunk_path(key)).await {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.clone()))
            }
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn contains(&self, key: &FileKey) -> Result<bool, StoreError> {
        match tokio::fs::metadata(self.chunk_path(key)).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn delete(&self, key: &FileKey) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.chunk_path(key)).await {
            Ok(()) => {
                debug!(%key, "deleted chunk file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}
