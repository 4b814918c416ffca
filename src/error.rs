//! Unified error types for rtmp-relay

use std::fmt;
use std::io;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all relay operations
#[derive(Debug)]
pub enum Error {
    /// I/O error during network or file operations
    Io(io::Error),
    /// RTMP protocol violation
    Protocol(ProtocolError),
    /// AMF0 encoding/decoding error
    Amf(AmfError),
    /// Handshake failure
    Handshake(HandshakeError),
    /// Operation timed out
    Timeout,
    /// Connection was closed
    ConnectionClosed,
    /// A publisher is already attached to the stream
    PublisherExists,
    /// Invalid configuration
    Config(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e),
            Error::Amf(e) => write!(f, "AMF error: {}", e),
            Error::Handshake(e) => write!(f, "Handshake error: {}", e),
            Error::Timeout => write!(f, "Operation timed out"),
            Error::ConnectionClosed => write!(f, "Connection closed"),
            Error::PublisherExists => write!(f, "Publisher already exists"),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<AmfError> for Error {
    fn from(err: AmfError) -> Self {
        Error::Amf(err)
    }
}

impl From<HandshakeError> for Error {
    fn from(err: HandshakeError) -> Self {
        Error::Handshake(err)
    }
}

/// Protocol-level errors
#[derive(Debug)]
pub enum ProtocolError {
    InvalidChunkHeader,
    MessageTooLarge { size: u32, max: u32 },
    InvalidUrl(String),
    InvalidCommand(String),
    MissingField(&'static str),
    InvalidHttpRequest,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::InvalidChunkHeader => write!(f, "Invalid chunk header"),
            ProtocolError::MessageTooLarge { size, max } => {
                write!(f, "Message too large: {} bytes (max {})", size, max)
            }
            ProtocolError::InvalidUrl(url) => write!(f, "Invalid RTMP URL: {}", url),
            ProtocolError::InvalidCommand(cmd) => write!(f, "Invalid command: {}", cmd),
            ProtocolError::MissingField(field) => write!(f, "Missing required field: {}", field),
            ProtocolError::InvalidHttpRequest => write!(f, "Invalid HTTP request"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// AMF0 encoding/decoding errors
#[derive(Debug, PartialEq, Eq)]
pub enum AmfError {
    /// Buffer is smaller than the declared field
    TooShort,
    /// Marker does not match the requested primitive
    InvalidType(u8),
    InvalidUtf8,
}

impl fmt::Display for AmfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmfError::TooShort => write!(f, "Buffer too short for AMF0 field"),
            AmfError::InvalidType(m) => write!(f, "Unexpected AMF0 marker: 0x{:02x}", m),
            AmfError::InvalidUtf8 => write!(f, "Invalid UTF-8 in AMF0 string"),
        }
    }
}

impl std::error::Error for AmfError {}

/// Handshake-specific errors
#[derive(Debug)]
pub enum HandshakeError {
    InvalidVersion(u8),
    InvalidState,
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::InvalidVersion(v) => write!(f, "Invalid RTMP version: {}", v),
            HandshakeError::InvalidState => write!(f, "Invalid handshake state"),
        }
    }
}

impl std::error::Error for HandshakeError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;
    use std::io;

    #[test]
    fn test_error_display() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "connection reset");
        let err = Error::Io(io_err);
        assert!(err.to_string().contains("I/O error"));

        let err = Error::Protocol(ProtocolError::InvalidChunkHeader);
        assert!(err.to_string().contains("Protocol error"));
        assert!(err.to_string().contains("Invalid chunk header"));

        let err = Error::Amf(AmfError::InvalidType(0xFF));
        assert!(err.to_string().contains("AMF error"));
        assert!(err.to_string().contains("0xff"));

        let err = Error::Timeout;
        assert!(err.to_string().contains("timed out"));

        let err = Error::PublisherExists;
        assert!(err.to_string().contains("Publisher"));
    }

    #[test]
    fn test_error_source() {
        // Only Io error carries a source
        let io_err = io::Error::new(io::ErrorKind::NotFound, "not found");
        let err = Error::Io(io_err);
        assert!(StdError::source(&err).is_some());

        let err = Error::Protocol(ProtocolError::InvalidHttpRequest);
        assert!(StdError::source(&err).is_none());
    }

    #[test]
    fn test_from_conversions() {
        let err: Error = AmfError::TooShort.into();
        assert!(matches!(err, Error::Amf(AmfError::TooShort)));

        let err: Error = ProtocolError::MissingField("code").into();
        assert!(matches!(err, Error::Protocol(_)));

        let err: Error = HandshakeError::InvalidVersion(1).into();
        assert!(matches!(err, Error::Handshake(_)));
    }
}
