//! Shared types and identifiers for reef.
//!
//! This crate defines the identifiers passed between the gateway and the
//! storage nodes ([`FileKey`], [`ChunkIndex`], [`NodeIndex`], [`Checksum`])
//! and the reconstruction metadata written once per upload ([`Shard`],
//! [`ShardPlan`]).

mod key;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use key::{FileKey, KeyError, MAX_KEY_LEN};

// ---------------------------------------------------------------------------
// Index types
// ---------------------------------------------------------------------------

/// Position of a chunk within a file, in `[0, chunk_count)`.
///
/// Reconstruction concatenates chunks by ascending index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkIndex(pub usize);

/// Position of a storage node in the configured node list, in `[0, node_count)`.
///
/// Only stable while the configured node list is unchanged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeIndex(pub usize);

impl fmt::Display for ChunkIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Checksum
// ---------------------------------------------------------------------------

/// BLAKE3 digest of the bytes of one chunk.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum([u8; 32]);

impl Checksum {
    /// Hash a complete chunk in one go.
    pub fn from_data(data: &[u8]) -> Self {
        Self(blake3::hash(data).into())
    }

    /// Finalize an incremental hasher fed with the chunk bytes.
    pub fn from_hasher(hasher: &blake3::Hasher) -> Self {
        Self(hasher.finalize().into())
    }

    /// Return the raw 32-byte representation.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for Checksum {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({self})")
    }
}

// ---------------------------------------------------------------------------
// Shard plan
// ---------------------------------------------------------------------------

/// Where one chunk of a file was placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shard {
    /// Which chunk of the file this record describes.
    pub chunk_index: ChunkIndex,
    /// The node the chunk was transferred to.
    pub node_index: NodeIndex,
    /// Number of bytes in the chunk.
    pub size: u64,
    /// Digest of the chunk bytes as acknowledged by the node.
    pub checksum: Option<Checksum>,
}

/// Complete reconstruction plan for one file.
///
/// Written once per successful upload; `shards` is ordered by chunk index
/// with exactly one entry per chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardPlan {
    /// Size of the original file in bytes.
    pub original_size: u64,
    /// One shard record per chunk, ordered by chunk index.
    pub shards: Vec<Shard>,
}

impl ShardPlan {
    /// Number of chunks the file was split into.
    pub fn chunk_count(&self) -> usize {
        self.shards.len()
    }

    /// Whether the shard list is gap-free and strictly ordered by chunk index
    /// starting at 0, and its sizes add up to `original_size`.
    pub fn is_well_formed(&self) -> bool {
        let ordered = self
            .shards
            .iter()
            .enumerate()
            .all(|(i, shard)| shard.chunk_index == ChunkIndex(i));
        let total: u64 = self.shards.iter().map(|s| s.size).sum();
        !self.shards.is_empty() && ordered && total == self.original_size
    }
}
