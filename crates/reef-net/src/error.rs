//! Error types for network operations.

use reef_types::{Checksum, FileKey, NodeIndex};
use reef_store::StoreError;

use crate::message::RejectCode;

/// Errors that can occur while moving a chunk to or from a node.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// Failed to connect to a remote endpoint.
    #[error("connection error: {0}")]
    Connect(String),

    /// A QUIC connection error.
    #[error("connection error: {0}")]
    Connection(#[from] iroh::endpoint::ConnectionError),

    /// Failed to open a stream.
    #[error("stream open error: {0}")]
    StreamOpen(String),

    /// Error reading from or writing to a stream, source or sink.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The peer sent a message that is not valid at this point of the exchange.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The node refused the request.
    #[error("node rejected request ({code:?}): {reason}")]
    Rejected {
        /// Why the node refused.
        code: RejectCode,
        /// Human-readable detail from the node.
        reason: String,
    },

    /// The node stored different bytes than were sent, or served bytes that
    /// do not hash to what it acknowledged.
    #[error("integrity check failed for {key}: expected {expected}, actual {actual}")]
    IntegrityFailure {
        /// The chunk key.
        key: FileKey,
        /// The digest that was expected.
        expected: Checksum,
        /// The digest that was computed.
        actual: Checksum,
    },

    /// The node acknowledged a different number of bytes than were sent.
    #[error("size mismatch: sent {expected} bytes, node stored {actual}")]
    SizeMismatch {
        /// Bytes the client sent.
        expected: u64,
        /// Bytes the node reported.
        actual: u64,
    },

    /// The source ended before `size` bytes could be read.
    #[error("source exhausted after {got} of {expected} bytes")]
    SourceExhausted {
        /// Bytes the chunk should contain.
        expected: u64,
        /// Bytes actually available.
        got: u64,
    },

    /// No node is configured at this index.
    #[error("unknown node {0}")]
    UnknownNode(NodeIndex),

    /// The node-local store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The endpoint could not be created.
    #[error("endpoint error: {0}")]
    Endpoint(String),

    /// Connecting to the node took longer than the configured timeout.
    #[error("timed out connecting to node")]
    TimedOut,

    /// The caller cancelled the transfer.
    #[error("transfer cancelled")]
    Cancelled,

    /// The stream was closed unexpectedly.
    #[error("stream closed")]
    StreamClosed,
}
