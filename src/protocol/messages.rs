//! Protocol message types for the clipboard sync system
//!
//! All message payloads that can be serialized/deserialized within frames.
//! Uses serde/JSON for everything except chunk frames, which carry raw
//! binary payloads (see `codec::ChunkData`).

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Room identifier, e.g. `abc-xyz-42`
pub type RoomId = String;

/// Identity of one live connection, assigned by the server
pub type ConnectionId = u64;

// =============================================================================
// Control messages (0x00 - 0x0F) - Client -> Server
// =============================================================================

/// Join a room by identifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Join {
    /// Room identifier to join
    pub room_id: RoomId,
}

/// Ask whether a room identifier exists
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRoom {
    /// Room identifier to check
    pub room_id: RoomId,
}

/// Graceful disconnect
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goodbye {
    /// Reason for disconnect
    pub reason: String,
}

// =============================================================================
// Publish messages (0x10 - 0x1F) - Client -> Server
// =============================================================================

/// Publish new clipboard text to the joined room
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishText {
    /// The clipboard text
    pub data: String,
}

/// Announce a file transfer; chunks follow one at a time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishFile {
    /// MIME type of the file
    pub content_type: String,
    /// File name
    pub filename: String,
    /// Total number of chunks that will be sent (>= 1)
    pub total_chunks: u32,
}

/// One file chunk; binary payload in frame (4-byte BE index + raw data)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkData {
    /// Zero-based chunk index
    pub index: u32,
    /// Raw chunk bytes
    pub data: Bytes,
}

// =============================================================================
// Delivery acks (0x20 - 0x2F) - Client -> Server
// =============================================================================

/// Recipient confirms a delivered chunk; gates the next chunk of its stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkReceived {
    /// Index of the chunk that was received
    pub index: u32,
}

// =============================================================================
// Content delivery (0x30 - 0x3F) - Server -> Client
// =============================================================================

/// Clipboard text delivered to a room member
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextContent {
    /// The clipboard text
    pub data: String,
}

/// File transfer header delivered ahead of its chunks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileHeader {
    /// MIME type of the file
    pub content_type: String,
    /// File name
    pub filename: String,
    /// Number of chunks that will follow
    pub total_chunks: u32,
}

// =============================================================================
// Signals (0x40 - 0x4F) - Server -> Client
// =============================================================================
//
// Sync, Resync and NoRoom carry no payload and travel as empty frames.

/// Continuation reply to a published chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkOk {
    /// True if the server expects more chunks for this transfer
    pub more: bool,
}

/// A chunk arrived out of order; state is unchanged
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WrongChunk {
    /// The chunk index the server expected
    pub expected: u32,
}

/// A freshly minted room identifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomCreated {
    /// The new room identifier
    pub room_id: RoomId,
}

/// Existence-check reply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomStatus {
    /// Whether the room is currently live
    pub exists: bool,
}

// =============================================================================
// Error (0xFF)
// =============================================================================

/// Wire-level error message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Error code
    pub code: u32,
    /// Error message
    pub message: String,
    /// Related entity (room id, chunk index, etc.)
    pub context: Option<String>,
}

impl ErrorMessage {
    // Common error codes
    pub const UNKNOWN: u32 = 1000;
    pub const INVALID_FRAME: u32 = 1001;
    pub const NOT_JOINED: u32 = 1002;
    pub const BAD_HEADER: u32 = 1003;
    pub const SERVER_ERROR: u32 = 1004;

    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(Self::UNKNOWN, message)
    }

    pub fn invalid_frame(message: impl Into<String>) -> Self {
        Self::new(Self::INVALID_FRAME, message)
    }

    pub fn not_joined() -> Self {
        Self::new(Self::NOT_JOINED, "Not joined to a room")
    }

    pub fn bad_header(message: impl Into<String>) -> Self {
        Self::new(Self::BAD_HEADER, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(Self::SERVER_ERROR, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_publish_file() {
        let msg = PublishFile {
            content_type: "image/png".to_string(),
            filename: "x.png".to_string(),
            total_chunks: 2,
        };

        let json = serde_json::to_string(&msg).unwrap();
        let decoded: PublishFile = serde_json::from_str(&json).unwrap();

        assert_eq!(msg.content_type, decoded.content_type);
        assert_eq!(msg.filename, decoded.filename);
        assert_eq!(msg.total_chunks, decoded.total_chunks);
    }

    #[test]
    fn test_serialize_text_roundtrip() {
        let msg = PublishText {
            data: "clipboard contents with unicode: ✂".to_string(),
        };

        let json = serde_json::to_string(&msg).unwrap();
        let decoded: PublishText = serde_json::from_str(&json).unwrap();
        assert_eq!(msg.data, decoded.data);
    }

    #[test]
    fn test_error_constructors() {
        let err = ErrorMessage::not_joined();
        assert_eq!(err.code, ErrorMessage::NOT_JOINED);

        let err = ErrorMessage::bad_header("total_chunks must be >= 1").with_context("got 0");
        assert_eq!(err.code, ErrorMessage::BAD_HEADER);
        assert_eq!(err.context, Some("got 0".to_string()));
    }
}
