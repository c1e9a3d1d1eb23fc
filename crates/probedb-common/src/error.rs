//! Error types for ProbeDB.

use thiserror::Error;

/// Result type alias using ProbeError.
pub type Result<T> = std::result::Result<T, ProbeError>;

/// Errors that can occur in ProbeDB operations.
#[derive(Debug, Error)]
pub enum ProbeError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Snapshot errors
    #[error("Snapshot truncated: expected {expected} bytes, got {actual}")]
    SnapshotTruncated { expected: usize, actual: usize },

    #[error("Snapshot corrupted: {0}")]
    SnapshotCorrupted(String),

    // B+ tree errors
    #[error("B+ tree corrupted: {0}")]
    TreeCorrupted(String),

    // Argument errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unsupported aggregate: {0}")]
    UnsupportedAggregate(String),

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Sample percent out of range: {0}")]
    SamplePercentOutOfRange(f64),

    // Query errors
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}
