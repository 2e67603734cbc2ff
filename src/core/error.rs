//! # Errors
//!
//! One taxonomy for every fallible engine call. The engine keeps the
//! `Display` text of the last failure as its retrievable last-error message.

use thiserror::Error;

/// Result alias used across the crate
pub type MycoResult<T> = Result<T, MycoError>;

/// Everything that can go wrong inside the engine
#[derive(Debug, Error)]
pub enum MycoError {
    /// A null or destroyed engine handle was passed across the ABI
    #[error("invalid engine handle")]
    InvalidHandle,

    /// Malformed image, dump or input file
    #[error("load failure: {0}")]
    LoadFailure(String),

    /// Image written by an incompatible format version
    #[error("image version mismatch: found {found}, expected {expected}")]
    VersionMismatch { found: u32, expected: u32 },

    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("unknown column: {table}.{column}")]
    UnknownColumn { table: String, column: String },

    /// Unparseable predicate or SQL text
    #[error("malformed query: {0}")]
    MalformedQuery(String),

    /// goto / lookup miss
    #[error("payload not found: {0}")]
    PayloadNotFound(String),

    /// undo with nothing pending
    #[error("delta store is empty")]
    EmptyDelta,

    /// Output was truncated to fit a caller-provided buffer
    #[error("buffer too small: needed {needed} bytes, capacity {capacity}")]
    BufferTooSmall { needed: usize, capacity: usize },

    /// Ingest-time reference that never resolved (reported, not fatal)
    #[error("dangling foreign key {table}#{id}.{column}")]
    DanglingForeignKey { table: String, id: i64, column: String },

    /// Rules file could not be parsed
    #[error("rules error: {0}")]
    Rules(String),

    /// Ingestion could not start or complete
    #[error("ingest error: {0}")]
    Ingest(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl MycoError {
    /// True for conditions that belong to the load-failure class
    pub fn is_load_failure(&self) -> bool {
        matches!(self, MycoError::LoadFailure(_) | MycoError::VersionMismatch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MycoError::UnknownColumn {
            table: "Album".into(),
            column: "Nope".into(),
        };
        assert_eq!(err.to_string(), "unknown column: Album.Nope");
        assert_eq!(MycoError::EmptyDelta.to_string(), "delta store is empty");
    }

    #[test]
    fn test_version_mismatch_is_load_failure() {
        let err = MycoError::VersionMismatch { found: 9, expected: 2 };
        assert!(err.is_load_failure());
        assert!(!MycoError::EmptyDelta.is_load_failure());
    }
}
