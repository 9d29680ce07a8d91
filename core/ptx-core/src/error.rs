//! Error types for the PTX execution core.
//!
//! All public APIs return `PtxResult<T>`, no panics in library code.
//!
//! Lock outcomes are deliberately *not* errors: a contended lock is an
//! expected event that the orchestrator turns into a rollback, so it is
//! reported through [`ErrorCode`] instead of [`PtxError`].

use thiserror::Error;

/// Unified error type for all fatal PTX conditions.
///
/// Every variant here either signals a misconfigured deployment (capacity
/// exhaustion) or a protocol/programming bug. Neither is recoverable by
/// retrying the transaction.
#[derive(Debug, Error)]
pub enum PtxError {
    /// `insert()` on a table whose slots are all in use
    #[error("table '{table}' is full (capacity {capacity})")]
    TableFull { table: String, capacity: u64 },

    /// Per-transaction arena ran out of slots
    #[error("{arena} arena exhausted (capacity {capacity})")]
    ArenaExhausted { arena: &'static str, capacity: usize },

    /// Open-futures registry bucket has no free slot
    #[error("open-futures registry bucket {bucket} is full ({slots} slots)")]
    RegistryFull { bucket: usize, slots: usize },

    /// Packet would exceed the transport MTU
    #[error("packet buffer too small: requested {requested} bytes, max {max}")]
    PacketTooSmall { requested: usize, max: usize },

    /// Response arrived for a message id that has no registered future
    #[error("received msg_id={msg_id} without future")]
    UnknownMessageId { msg_id: u64 },

    /// Peer violated the wire protocol
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Lock released with a mode the row is not locked in
    #[error("invalid access mode: {0}")]
    InvalidAccessMode(String),

    /// Operation not allowed in the transaction's current state
    #[error("invalid transaction state: {0}")]
    InvalidTxnState(String),

    /// Undo log could not release a lock
    #[error("undo failed: {0}")]
    UndoFailed(String),

    /// Reader ran past the end of a buffer
    #[error("buffer underflow: needed {needed} bytes, {remaining} remaining")]
    BufferUnderflow { needed: usize, remaining: usize },

    /// Table registered twice under the same name
    #[error("table '{0}' already present in database")]
    TableExists(String),

    /// No table registered under this name
    #[error("table '{0}' not found")]
    TableNotFound(String),

    /// No table registered under this id
    #[error("table id {0} not found")]
    UnknownTable(u64),

    /// Typed table lookup used the wrong tuple type
    #[error("table '{0}' does not hold the requested tuple type")]
    TableTypeMismatch(String),

    /// Partitioning parameters do not divide the key space
    #[error("partition error: {0}")]
    Partition(String),

    /// Send to an unknown or disconnected node
    #[error("transport error: {0}")]
    Transport(String),

    /// Configuration value missing or invalid
    #[error("config error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Standard I/O error
    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

/// Result type alias for all PTX operations.
pub type PtxResult<T> = Result<T, PtxError>;

impl From<serde_json::Error> for PtxError {
    fn from(err: serde_json::Error) -> Self {
        PtxError::Serialization(err.to_string())
    }
}

/// Outcome of a single row lock/unlock operation.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Success,
    ReadLockFailed,
    WriteLockFailed,
    InvalidRowId,
    InvalidAccessMode,
}

impl ErrorCode {
    pub fn is_ok(self) -> bool {
        self == ErrorCode::Success
    }

    /// Contention outcomes are recovered by rollback; everything else is a bug.
    pub fn is_contention(self) -> bool {
        matches!(self, ErrorCode::ReadLockFailed | ErrorCode::WriteLockFailed)
    }
}
