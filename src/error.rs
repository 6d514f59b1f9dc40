//! Error types for the audio link server

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Capture source errors
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Timed out waiting for capture data")]
    Timeout,

    #[error("Capture stream closed")]
    Closed,
}

impl CaptureError {
    /// Whether a read that failed with this error should simply be retried
    pub fn is_transient(&self) -> bool {
        matches!(self, CaptureError::StreamError(_) | CaptureError::Timeout)
    }
}

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Encoder initialization failed: {0}")]
    EncoderInit(String),

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Invalid frame size: {0}")]
    InvalidFrameSize(usize),
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Invalid frame")]
    InvalidFrame,

    #[error("Timeout")]
    Timeout,

    #[error("Connection closed")]
    ConnectionClosed,
}

/// Connection handshake errors
#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("Handshake timed out")]
    Timeout,

    #[error("Handshake I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_capture_errors() {
        assert!(CaptureError::Timeout.is_transient());
        assert!(!CaptureError::Closed.is_transient());
        assert!(CaptureError::StreamError("xrun".into()).is_transient());
        assert!(!CaptureError::DeviceNotFound("mic".into()).is_transient());
        assert!(!CaptureError::UnsupportedFormat("u8".into()).is_transient());
    }

    #[test]
    fn test_error_conversion() {
        let err: Error = NetworkError::PayloadTooLarge(70000).into();
        assert_eq!(err.to_string(), "Network error: Payload too large: 70000 bytes");
    }
}
