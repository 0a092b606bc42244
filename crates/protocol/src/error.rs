//! Protocol error types

use thiserror::Error;

/// Protocol-level errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Request or payload does not fit the 4 hex digit length prefix
    #[error("Payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// Length prefix is not 4 ASCII hex digits
    #[error("Invalid length prefix: {0:?}")]
    InvalidLength(String),

    /// Server replied with something other than OKAY/FAIL
    #[error("Unexpected status: {0:?}")]
    UnexpectedStatus(String),

    /// Server replied FAIL with a message
    #[error("ADB server failure: {0}")]
    Failed(String),

    /// Incomplete frame data
    #[error("Incomplete frame: expected {expected} bytes, got {actual}")]
    IncompleteFrame { expected: usize, actual: usize },

    /// Remote path too long for a sync SEND request
    #[error("Remote path too long: {len} bytes (max: {max})")]
    PathTooLong { len: usize, max: usize },

    /// Payload is not valid UTF-8 where text was expected
    #[error("Invalid UTF-8 in payload")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// I/O error during frame operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;
