//! Communication Link Error Types
//!
//! Core error types for the field protocols and the scan scheduler.

use thiserror::Error;

/// Result type for field-comlink operations
pub type Result<T> = std::result::Result<T, LinkError>;

/// Response validation failures
///
/// A well-formed rejection is not assumed to be transient, so everything in
/// here except `SerialMismatch` aborts the transport retry loop.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Response correlation id does not match the request
    #[error("serial mismatch: expected {expected:#06X}, got {actual:#06X}")]
    SerialMismatch { expected: u16, actual: u16 },

    /// Device answered with a nonzero status / NAK / NG code
    #[error("device rejected request with code {code:#06X}")]
    DeviceRejected { code: u16 },

    /// Checksum (BCC) mismatch
    #[error("checksum mismatch: expected {expected:#04X}, got {actual:#04X}")]
    Checksum { expected: u8, actual: u8 },

    /// First byte of the response is not a known header
    #[error("unknown header byte {0:#04X}")]
    UnknownHeader(u8),

    /// Response does not echo the request prefix
    #[error("response does not echo request prefix")]
    EchoMismatch,

    /// Response is structurally broken
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Communication link errors
#[derive(Debug, Error, Clone)]
pub enum LinkError {
    /// Open/close failed or invalid endpoint
    #[error("Connection error: {0}")]
    Connection(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// No data within the receive window
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Socket read/write failure
    #[error("Stream error: {0}")]
    Stream(String),

    /// Response validation failure
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Out-of-range address/length/count or bad settings
    #[error("Configuration error: {0}")]
    Config(String),

    /// Tag not present in the tag table
    #[error("Point not found: {0}")]
    PointNotFound(String),

    /// Operation not supported by the protocol
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Cooperative cancellation signal
    #[error("Thread terminated (code {code})")]
    Terminated { code: i32 },
}

impl From<std::io::Error> for LinkError {
    fn from(err: std::io::Error) -> Self {
        LinkError::Stream(err.to_string())
    }
}

// Helper methods for creating errors
impl LinkError {
    pub fn connection(msg: impl Into<String>) -> Self {
        LinkError::Connection(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        LinkError::Timeout(msg.into())
    }

    pub fn stream(msg: impl Into<String>) -> Self {
        LinkError::Stream(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        LinkError::Config(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        LinkError::Validation(ValidationError::Malformed(msg.into()))
    }

    pub fn not_supported(msg: impl Into<String>) -> Self {
        LinkError::NotSupported(msg.into())
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, LinkError::Terminated { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = LinkError::from(ValidationError::SerialMismatch {
            expected: 0x1234,
            actual: 0x4321,
        });
        assert_eq!(
            err.to_string(),
            "Validation error: serial mismatch: expected 0x1234, got 0x4321"
        );

        let err = LinkError::from(ValidationError::DeviceRejected { code: 0xC059 });
        assert!(err.to_string().contains("0xC059"));
    }

    #[test]
    fn test_error_classification() {
        assert!(matches!(
            LinkError::malformed("short"),
            LinkError::Validation(ValidationError::Malformed(_))
        ));
        assert!(!LinkError::timeout("rx").is_terminated());
        assert!(LinkError::Terminated { code: 1 }.is_terminated());
    }

    #[test]
    fn test_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "Broken pipe");
        let err: LinkError = io.into();
        assert!(matches!(err, LinkError::Stream(_)));
    }
}
