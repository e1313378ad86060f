//! Chunk boundaries.

use reef_types::ChunkIndex;

use crate::error::EngineError;

/// One chunk's byte range within the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    /// Which chunk this is.
    pub index: ChunkIndex,
    /// First byte of the chunk within the file.
    pub offset: u64,
    /// Number of bytes in the chunk.
    pub size: u64,
}

/// Even split of a file into `chunks` ranges.
///
/// Every chunk gets `total / chunks` bytes; the last one also takes the
/// `total % chunks` residual, so the sizes always add up to `total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLayout {
    total: u64,
    chunks: usize,
}

impl ChunkLayout {
    /// Compute the layout.
    ///
    /// Fails when any chunk would be empty: `total == 0`, or `total < chunks`
    /// (a zero base size with only a residual to send).
    pub fn new(total: u64, chunks: usize) -> Result<Self, EngineError> {
        if chunks == 0 || total == 0 || total < chunks as u64 {
            return Err(EngineError::InvalidSize {
                size: total,
                chunks,
            });
        }
        Ok(Self { total, chunks })
    }

    /// Size of every chunk but the last.
    pub fn chunk_size(&self) -> u64 {
        self.total / self.chunks as u64
    }

    /// Bytes the last chunk carries beyond `chunk_size`.
    pub fn residual(&self) -> u64 {
        self.total % self.chunks as u64
    }

    /// Total file size.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Number of chunks.
    pub fn chunk_count(&self) -> usize {
        self.chunks
    }

    /// All chunk ranges in index order.
    pub fn ranges(&self) -> Vec<ChunkRange> {
        let base = self.chunk_size();
        (0..self.chunks)
            .map(|i| {
                let last = i + 1 == self.chunks;
                ChunkRange {
                    index: ChunkIndex(i),
                    offset: base * i as u64,
                    size: if last { base + self.residual() } else { base },
                }
            })
            .collect()
    }
}
