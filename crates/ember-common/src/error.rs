//! Error types for EmberDB.

use thiserror::Error;

/// Result type alias using EmberError.
pub type Result<T> = std::result::Result<T, EmberError>;

/// Errors that can occur in EmberDB storage operations.
#[derive(Debug, Error)]
pub enum EmberError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    IoError(String),

    // Storage errors
    #[error("Page not found: {page_id}")]
    PageNotFound { page_id: u64 },

    #[error("Buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    // B+ tree errors
    #[error("Invalid node type on page {page_no}")]
    InvalidNodeType { page_no: i32 },

    #[error("Index entry not found at {page_no}:{slot_no}")]
    IndexEntryNotFound { page_no: i32, slot_no: i32 },

    #[error("Key size mismatch: expected {expected} bytes, got {actual}")]
    KeySizeMismatch { expected: usize, actual: usize },

    #[error("Index corrupted: {0}")]
    IndexCorrupted(String),

    // WAL errors
    #[error("Log record of {size} bytes exceeds the {limit} byte limit")]
    LogRecordTooLarge { size: usize, limit: usize },

    #[error("LSN {lsn} has not been assigned, next LSN is {next}")]
    LsnNotAssigned { lsn: u64, next: u64 },

    #[error("WAL write failed: {0}")]
    WalWriteFailed(String),

    #[error("WAL corrupted at LSN {lsn}: {reason}")]
    WalCorrupted { lsn: u64, reason: String },

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_io_error_conversion() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: EmberError = io_err.into();
        assert!(matches!(err, EmberError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_page_not_found_display() {
        let err = EmberError::PageNotFound { page_id: 42 };
        assert_eq!(err.to_string(), "Page not found: 42");
    }

    #[test]
    fn test_buffer_pool_full_display() {
        let err = EmberError::BufferPoolFull;
        assert_eq!(err.to_string(), "Buffer pool full, unable to allocate frame");
    }

    #[test]
    fn test_index_errors_display() {
        let err = EmberError::IndexEntryNotFound {
            page_no: 3,
            slot_no: 7,
        };
        assert_eq!(err.to_string(), "Index entry not found at 3:7");

        let err = EmberError::InvalidNodeType { page_no: 9 };
        assert_eq!(err.to_string(), "Invalid node type on page 9");

        let err = EmberError::KeySizeMismatch {
            expected: 8,
            actual: 4,
        };
        assert_eq!(err.to_string(), "Key size mismatch: expected 8 bytes, got 4");
    }

    #[test]
    fn test_wal_errors_display() {
        let err = EmberError::LogRecordTooLarge {
            size: 100,
            limit: 64,
        };
        assert_eq!(err.to_string(), "Log record of 100 bytes exceeds the 64 byte limit");

        let err = EmberError::LsnNotAssigned { lsn: 100, next: 3 };
        assert_eq!(err.to_string(), "LSN 100 has not been assigned, next LSN is 3");

        let err = EmberError::WalCorrupted {
            lsn: 12345,
            reason: "truncated record".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "WAL corrupted at LSN 12345: truncated record"
        );
    }

    #[test]
    fn test_config_error_display() {
        let err = EmberError::ConfigError("log_buffer_size must be non-zero".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: log_buffer_size must be non-zero"
        );
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<EmberError>();
    }
}
