//! Deterministic placement of file chunks onto storage nodes.
//!
//! A file key is hashed to a starting position in the node list, and chunk
//! `i` is assigned to the node at `(start + i) % node_count`. The result is a
//! pure function of the key, the chunk count and the node count, so a gateway
//! restarted with the same node list computes the same placement.

mod placement;

pub use placement::{Placement, PlacementError, key_position};
