//! Consecutive-wrap placement.

use reef_types::{ChunkIndex, FileKey, NodeIndex};
use tracing::trace;

/// Errors from computing a placement.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlacementError {
    /// Fewer nodes than chunks; distinct nodes per chunk cannot be guaranteed.
    #[error("insufficient nodes: need {required} for {required} chunks, have {available}")]
    InsufficientNodes {
        /// Number of chunks (and therefore distinct nodes) required.
        required: usize,
        /// Number of configured nodes.
        available: usize,
    },

    /// A file must be split into at least one chunk.
    #[error("chunk count must be at least 1")]
    ZeroChunks,
}

/// Placement policy for a fixed chunk count over a fixed node list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    chunks: usize,
    nodes: usize,
}

impl Placement {
    /// Create a placement policy.
    ///
    /// Fails with [`PlacementError::InsufficientNodes`] when `nodes < chunks`.
    pub fn new(chunks: usize, nodes: usize) -> Result<Self, PlacementError> {
        if chunks == 0 {
            return Err(PlacementError::ZeroChunks);
        }
        if nodes < chunks {
            return Err(PlacementError::InsufficientNodes {
                required: chunks,
                available: nodes,
            });
        }
        Ok(Self { chunks, nodes })
    }

    /// Number of chunks each file is split into.
    pub fn chunk_count(&self) -> usize {
        self.chunks
    }

    /// Number of nodes placement draws from.
    pub fn node_count(&self) -> usize {
        self.nodes
    }

    /// Assign every chunk of `key` to a node.
    ///
    /// Entry `i` of the result is the node for chunk `i`. All entries are
    /// distinct because `chunks <= nodes`.
    pub fn assign(&self, key: &FileKey) -> Vec<(ChunkIndex, NodeIndex)> {
        let start = (key_position(key) % self.nodes as u64) as usize;
        let assignment: Vec<_> = (0..self.chunks)
            .map(|i| (ChunkIndex(i), NodeIndex((start + i) % self.nodes)))
            .collect();
        trace!(%key, start, chunks = self.chunks, nodes = self.nodes, "computed placement");
        assignment
    }
}

/// Position of a key: first 8 bytes of `blake3(key)` as a little-endian u64.
pub fn key_position(key: &FileKey) -> u64 {
    let hash = blake3::hash(key.as_str().as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}
