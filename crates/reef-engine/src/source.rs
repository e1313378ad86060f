//! Offset-addressed byte sources for uploads.
//!
//! Chunk tasks read disjoint ranges of one source concurrently, so a source
//! must not keep a shared cursor.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;

/// A file being uploaded, readable at arbitrary offsets.
#[async_trait::async_trait]
pub trait ByteSource: Send + Sync {
    /// Total size in bytes.
    fn size(&self) -> u64;

    /// Read up to `len` bytes starting at `offset`.
    ///
    /// Returns fewer bytes only at the end of the source, and an empty
    /// buffer at or past the end.
    async fn read_at(&self, offset: u64, len: usize) -> std::io::Result<Bytes>;
}

#[async_trait::async_trait]
impl ByteSource for Bytes {
    fn size(&self) -> u64 {
        self.len() as u64
    }

    async fn read_at(&self, offset: u64, len: usize) -> std::io::Result<Bytes> {
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(self.len());
        let end = start.saturating_add(len).min(self.len());
        Ok(self.slice(start..end))
    }
}

/// A byte source backed by a file on disk.
///
/// Reads are positional (`pread`) on the blocking pool, so concurrent reads
/// never contend on a file cursor.
#[derive(Clone)]
pub struct FileSource {
    file: Arc<std::fs::File>,
    size: u64,
}

impl FileSource {
    /// Open the file at `path`.
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        Self::from_file(std::fs::File::open(path)?)
    }

    /// Wrap an already open file; its current length is the source size.
    pub fn from_file(file: std::fs::File) -> std::io::Result<Self> {
        let size = file.metadata()?.len();
        Ok(Self {
            file: Arc::new(file),
            size,
        })
    }
}

#[async_trait::async_trait]
impl ByteSource for FileSource {
    fn size(&self) -> u64 {
        self.size
    }

    async fn read_at(&self, offset: u64, len: usize) -> std::io::Result<Bytes> {
        let len = len.min(self.size.saturating_sub(offset) as usize);
        if len == 0 {
            return Ok(Bytes::new());
        }

        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || -> std::io::Result<Bytes> {
            let mut buf = vec![0u8; len];
            let mut filled = 0;
            while filled < len {
                let n = pread(&file, &mut buf[filled..], offset + filled as u64)?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            buf.truncate(filled);
            Ok(Bytes::from(buf))
        })
        .await
        .map_err(std::io::Error::other)?
    }
}

#[cfg(unix)]
fn pread(file: &std::fs::File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(windows)]
fn pread(file: &std::fs::File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}
