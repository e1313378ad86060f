//! Upload and download orchestration.
//!
//! The [`Gateway`] splits a file into a fixed number of chunks, places them
//! on storage nodes, transfers every chunk concurrently, and commits a
//! [`ShardPlan`](reef_types::ShardPlan) only when every chunk landed.
//! Downloads read the plan back and stream the chunks in order.
//!
//! Front doors (the HTTP server, the CLI) depend on the [`FileEngine`]
//! trait rather than the concrete `Gateway`.

pub mod engine;
pub mod error;
pub mod gateway;
pub mod layout;
pub mod source;

pub use engine::FileEngine;
pub use error::{DownloadError, EngineError, TransferOp};
pub use gateway::{Gateway, GatewayConfig};
pub use layout::{ChunkLayout, ChunkRange};
pub use source::{ByteSource, FileSource};

#[cfg(test)]
mod tests;
