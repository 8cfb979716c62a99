//! Error types for KiteDB.

use thiserror::Error;

/// Result type alias using KiteError.
pub type Result<T> = std::result::Result<T, KiteError>;

/// Errors that can occur in KiteDB operations.
#[derive(Debug, Error)]
pub enum KiteError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Caller errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Key not found")]
    KeyNotFound,

    #[error("Duplicate key")]
    DuplicateKey,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    // Storage errors
    #[error("Page not found: {page_num}")]
    PageNotFound { page_num: u32 },

    #[error("Page corrupted: {page_num}, reason: {reason}")]
    PageCorrupted { page_num: u32, reason: String },

    #[error("Buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    // Reserved for allocators that can refuse; frame exhaustion in the
    // buffer pool reports BufferPoolFull.
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

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
        let err: KiteError = io_err.into();
        assert!(matches!(err, KiteError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_invalid_argument_display() {
        let err = KiteError::InvalidArgument("attribute length must be positive".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid argument: attribute length must be positive"
        );
    }

    #[test]
    fn test_key_errors_display() {
        assert_eq!(KiteError::KeyNotFound.to_string(), "Key not found");
        assert_eq!(KiteError::DuplicateKey.to_string(), "Duplicate key");
    }

    #[test]
    fn test_page_not_found_display() {
        let err = KiteError::PageNotFound { page_num: 42 };
        assert_eq!(err.to_string(), "Page not found: 42");
    }

    #[test]
    fn test_page_corrupted_display() {
        let err = KiteError::PageCorrupted {
            page_num: 7,
            reason: "bad node tag".to_string(),
        };
        assert_eq!(err.to_string(), "Page corrupted: 7, reason: bad node tag");
    }

    #[test]
    fn test_buffer_pool_full_display() {
        let err = KiteError::BufferPoolFull;
        assert_eq!(err.to_string(), "Buffer pool full, unable to allocate frame");
    }

    #[test]
    fn test_invalid_state_display() {
        let err = KiteError::InvalidState("scanner already open".to_string());
        assert_eq!(err.to_string(), "Invalid state: scanner already open");
    }

    #[test]
    fn test_internal_error_display() {
        let err = KiteError::Internal("leaf chain broken".to_string());
        assert_eq!(err.to_string(), "Internal error: leaf chain broken");
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(KiteError::KeyNotFound)
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<KiteError>();
    }
}
