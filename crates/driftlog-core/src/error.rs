//! Error types for driftlog

use thiserror::Error;

/// Main error type for driftlog operations
#[derive(Error, Debug)]
pub enum DriftError {
    /// Engine configuration rejected at startup
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Error during storage operations (redb)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Database creation/opening error
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    /// Transaction error
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    /// Table error
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    /// Storage operation error
    #[error("Storage operation error: {0}")]
    StorageOp(#[from] redb::StorageError),

    /// Commit error
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Malformed frame, unknown type, or missing fields
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Peer disappeared while a round was in flight
    #[error("Peer down: {0}")]
    PeerDown(String),

    /// Peer is not currently connected
    #[error("Peer unreachable: {0}")]
    Unreachable(String),

    /// Request deadline exceeded
    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Engine is stopping; pending work resolves with this
    #[error("Engine shutting down")]
    Shutdown,

    /// Connection admission refused
    #[error("Peer capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// A projection's apply raised; recorded, other projections continue
    #[error("Projection '{projection}' failed: {message}")]
    Projection {
        /// Name of the failing projection
        projection: String,
        /// What went wrong
        message: String,
    },

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DriftError {
    /// Whether this error should push the peer into the longer io-failure
    /// backoff class rather than the ordinary retry backoff.
    pub fn is_io_class(&self) -> bool {
        matches!(
            self,
            DriftError::Io(_) | DriftError::Unreachable(_) | DriftError::PeerDown(_)
        )
    }
}

/// Result type alias using DriftError
pub type DriftResult<T> = Result<T, DriftError>;
