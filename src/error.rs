//! Error handling for the clipboard sync server

use std::fmt;

/// Result type alias for clipboard operations
pub type Result<T> = std::result::Result<T, ClipError>;

/// Clipboard server error types
#[derive(Debug, Clone)]
pub enum ClipError {
    /// Network-related errors
    Network(String),
    /// Serialization/deserialization errors
    Serialization(String),
    /// Connection errors
    Connection(String),
    /// Protocol errors (malformed or unexpected frames)
    Protocol(String),
    /// Join against an unknown room identifier
    NoSuchRoom(String),
    /// Event from a connection with no active room
    NotJoined(String),
    /// Chunk submitted out of order; carries the expected and received index
    OutOfOrderChunk { expected: u32, got: u32 },
    /// Chunk from a connection that did not start the transfer, or with no
    /// transfer active
    ForeignChunk(String),
    /// Configuration error
    Config(String),
    /// Timeout error
    Timeout(String),
    /// Server internal error
    Internal(String),
}

impl ClipError {
    /// Get error code for this error type
    pub fn code(&self) -> u32 {
        match self {
            ClipError::Network(_) => 1000,
            ClipError::Serialization(_) => 1001,
            ClipError::Connection(_) => 1002,
            ClipError::Protocol(_) => 1003,
            ClipError::NoSuchRoom(_) => 1004,
            ClipError::NotJoined(_) => 1005,
            ClipError::OutOfOrderChunk { .. } => 1006,
            ClipError::ForeignChunk(_) => 1007,
            ClipError::Config(_) => 1008,
            ClipError::Timeout(_) => 1009,
            ClipError::Internal(_) => 1010,
        }
    }

    /// Create a network error
    pub fn network<T: Into<String>>(msg: T) -> Self {
        ClipError::Network(msg.into())
    }

    /// Create a serialization error
    pub fn serialization<T: Into<String>>(msg: T) -> Self {
        ClipError::Serialization(msg.into())
    }

    /// Create a connection error
    pub fn connection<T: Into<String>>(msg: T) -> Self {
        ClipError::Connection(msg.into())
    }

    /// Create a protocol error
    pub fn protocol<T: Into<String>>(msg: T) -> Self {
        ClipError::Protocol(msg.into())
    }

    /// Create a no-such-room error
    pub fn no_such_room<T: Into<String>>(id: T) -> Self {
        ClipError::NoSuchRoom(id.into())
    }

    /// Create a not-joined error
    pub fn not_joined<T: Into<String>>(msg: T) -> Self {
        ClipError::NotJoined(msg.into())
    }

    /// Create a foreign-chunk error
    pub fn foreign_chunk<T: Into<String>>(msg: T) -> Self {
        ClipError::ForeignChunk(msg.into())
    }

    /// Create a configuration error
    pub fn config<T: Into<String>>(msg: T) -> Self {
        ClipError::Config(msg.into())
    }

    /// Create a timeout error
    pub fn timeout<T: Into<String>>(msg: T) -> Self {
        ClipError::Timeout(msg.into())
    }

    /// Create an internal error
    pub fn internal<T: Into<String>>(msg: T) -> Self {
        ClipError::Internal(msg.into())
    }
}

impl fmt::Display for ClipError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClipError::Network(msg) => write!(f, "Network error: {}", msg),
            ClipError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            ClipError::Connection(msg) => write!(f, "Connection error: {}", msg),
            ClipError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            ClipError::NoSuchRoom(id) => write!(f, "No such room: {}", id),
            ClipError::NotJoined(msg) => write!(f, "Not joined to a room: {}", msg),
            ClipError::OutOfOrderChunk { expected, got } => {
                write!(f, "Out-of-order chunk: expected {}, got {}", expected, got)
            }
            ClipError::ForeignChunk(msg) => write!(f, "Foreign chunk: {}", msg),
            ClipError::Config(msg) => write!(f, "Configuration error: {}", msg),
            ClipError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            ClipError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ClipError {}

impl From<std::io::Error> for ClipError {
    fn from(err: std::io::Error) -> Self {
        ClipError::Network(format!("IO error: {}", err))
    }
}

impl From<quinn::ConnectError> for ClipError {
    fn from(err: quinn::ConnectError) -> Self {
        ClipError::Connection(format!("QUIC connect error: {}", err))
    }
}

impl From<quinn::ConnectionError> for ClipError {
    fn from(err: quinn::ConnectionError) -> Self {
        ClipError::Connection(format!("QUIC connection error: {}", err))
    }
}

impl From<quinn::ReadError> for ClipError {
    fn from(err: quinn::ReadError) -> Self {
        ClipError::Network(format!("QUIC read error: {}", err))
    }
}

impl From<quinn::WriteError> for ClipError {
    fn from(err: quinn::WriteError) -> Self {
        ClipError::Network(format!("QUIC write error: {}", err))
    }
}

impl From<quinn::ClosedStream> for ClipError {
    fn from(err: quinn::ClosedStream) -> Self {
        ClipError::Connection(format!("Stream closed: {}", err))
    }
}

impl From<serde_json::Error> for ClipError {
    fn from(err: serde_json::Error) -> Self {
        ClipError::Serialization(format!("JSON error: {}", err))
    }
}
