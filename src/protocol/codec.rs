//! Codec for encoding/decoding protocol messages to/from frames
//!
//! This module provides the bridge between typed messages and binary frames.
//! JSON payloads for everything except chunk frames, which carry a 4-byte
//! big-endian index followed by the raw chunk bytes.

use super::frame::{Frame, FrameType};
use super::messages::*;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::{self, Error as IoError, ErrorKind};

/// Trait for messages that can be encoded to frames
pub trait Encodable {
    /// Get the frame type for this message
    fn frame_type(&self) -> FrameType;

    /// Encode the message payload to bytes
    fn encode_payload(&self) -> io::Result<Bytes>;

    /// Encode the complete frame
    fn encode_frame(&self) -> io::Result<Frame> {
        Ok(Frame::new(self.frame_type(), self.encode_payload()?))
    }
}

/// Trait for messages that can be decoded from frames
pub trait Decodable: Sized {
    /// Expected frame type for this message
    fn expected_frame_type() -> FrameType;

    /// Decode the message from a payload
    fn decode_payload(payload: &[u8]) -> io::Result<Self>;

    /// Decode from a complete frame, validating the frame type
    fn decode_frame(frame: &Frame) -> io::Result<Self> {
        if frame.frame_type != Self::expected_frame_type() {
            return Err(IoError::new(
                ErrorKind::InvalidData,
                format!(
                    "Expected frame type {:?}, got {:?}",
                    Self::expected_frame_type(),
                    frame.frame_type
                ),
            ));
        }
        Self::decode_payload(&frame.payload)
    }
}

/// Helper macro to implement Encodable and Decodable for a JSON message type
macro_rules! impl_codec {
    ($type:ty, $frame_type:expr) => {
        impl Encodable for $type {
            fn frame_type(&self) -> FrameType {
                $frame_type
            }

            fn encode_payload(&self) -> io::Result<Bytes> {
                serde_json::to_vec(self)
                    .map(Bytes::from)
                    .map_err(|e| IoError::new(ErrorKind::InvalidData, e))
            }
        }

        impl Decodable for $type {
            fn expected_frame_type() -> FrameType {
                $frame_type
            }

            fn decode_payload(payload: &[u8]) -> io::Result<Self> {
                serde_json::from_slice(payload).map_err(|e| IoError::new(ErrorKind::InvalidData, e))
            }
        }
    };
}

// Control messages
impl_codec!(Join, FrameType::Join);
impl_codec!(CheckRoom, FrameType::CheckRoom);
impl_codec!(Goodbye, FrameType::Goodbye);

// Publish messages
impl_codec!(PublishText, FrameType::PublishText);
impl_codec!(PublishFile, FrameType::PublishFile);

// Delivery acks
impl_codec!(ChunkReceived, FrameType::ChunkReceived);

// Content delivery
impl_codec!(TextContent, FrameType::Text);
impl_codec!(FileHeader, FrameType::FileHeader);

// Signals
impl_codec!(ChunkOk, FrameType::ChunkOk);
impl_codec!(WrongChunk, FrameType::WrongChunk);
impl_codec!(RoomCreated, FrameType::RoomCreated);
impl_codec!(RoomStatus, FrameType::RoomStatus);

// Error message
impl_codec!(ErrorMessage, FrameType::Error);

/// Chunk payload header size: 4-byte big-endian index
const CHUNK_HEADER_SIZE: usize = 4;

impl ChunkData {
    /// Encode into a chunk frame of the given direction
    /// (`PublishChunk` client->server, `Chunk` server->client)
    pub fn into_frame(&self, frame_type: FrameType) -> io::Result<Frame> {
        if !frame_type.is_binary() {
            return Err(IoError::new(
                ErrorKind::InvalidInput,
                format!("Not a chunk frame type: {:?}", frame_type),
            ));
        }

        let mut buf = BytesMut::with_capacity(CHUNK_HEADER_SIZE + self.data.len());
        buf.put_u32(self.index);
        buf.put_slice(&self.data);
        Ok(Frame::new(frame_type, buf.freeze()))
    }

    /// Decode from either chunk frame type
    pub fn from_frame(frame: &Frame) -> io::Result<Self> {
        if !frame.frame_type.is_binary() {
            return Err(IoError::new(
                ErrorKind::InvalidData,
                format!("Not a chunk frame: {:?}", frame.frame_type),
            ));
        }

        if frame.payload.len() < CHUNK_HEADER_SIZE {
            return Err(IoError::new(
                ErrorKind::UnexpectedEof,
                "Chunk payload shorter than its index header",
            ));
        }

        let mut payload = frame.payload.clone();
        let index = payload.get_u32();

        Ok(ChunkData {
            index,
            data: payload,
        })
    }
}

/// Decode any frame into a typed message enum
#[derive(Debug, Clone)]
pub enum DecodedMessage {
    // Control
    Join(Join),
    NewRoom,
    CheckRoom(CheckRoom),
    Goodbye(Goodbye),

    // Publish
    PublishText(PublishText),
    PublishFile(PublishFile),
    PublishChunk(ChunkData),

    // Delivery acks
    ChunkReceived(ChunkReceived),

    // Content delivery
    Text(TextContent),
    FileHeader(FileHeader),
    Chunk(ChunkData),

    // Signals
    Sync,
    ChunkOk(ChunkOk),
    WrongChunk(WrongChunk),
    Resync,
    NoRoom,
    RoomCreated(RoomCreated),
    RoomStatus(RoomStatus),

    // Error
    Error(ErrorMessage),
}

impl DecodedMessage {
    /// Decode a frame into a typed message
    pub fn decode(frame: &Frame) -> io::Result<Self> {
        let payload = &frame.payload;

        match frame.frame_type {
            FrameType::Join => Ok(Self::Join(serde_json::from_slice(payload)?)),
            FrameType::NewRoom => Ok(Self::NewRoom),
            FrameType::CheckRoom => Ok(Self::CheckRoom(serde_json::from_slice(payload)?)),
            FrameType::Goodbye => Ok(Self::Goodbye(serde_json::from_slice(payload)?)),

            FrameType::PublishText => Ok(Self::PublishText(serde_json::from_slice(payload)?)),
            FrameType::PublishFile => Ok(Self::PublishFile(serde_json::from_slice(payload)?)),
            FrameType::PublishChunk => Ok(Self::PublishChunk(ChunkData::from_frame(frame)?)),

            FrameType::ChunkReceived => Ok(Self::ChunkReceived(serde_json::from_slice(payload)?)),

            FrameType::Text => Ok(Self::Text(serde_json::from_slice(payload)?)),
            FrameType::FileHeader => Ok(Self::FileHeader(serde_json::from_slice(payload)?)),
            FrameType::Chunk => Ok(Self::Chunk(ChunkData::from_frame(frame)?)),

            FrameType::Sync => Ok(Self::Sync),
            FrameType::ChunkOk => Ok(Self::ChunkOk(serde_json::from_slice(payload)?)),
            FrameType::WrongChunk => Ok(Self::WrongChunk(serde_json::from_slice(payload)?)),
            FrameType::Resync => Ok(Self::Resync),
            FrameType::NoRoom => Ok(Self::NoRoom),
            FrameType::RoomCreated => Ok(Self::RoomCreated(serde_json::from_slice(payload)?)),
            FrameType::RoomStatus => Ok(Self::RoomStatus(serde_json::from_slice(payload)?)),

            FrameType::Error => Ok(Self::Error(serde_json::from_slice(payload)?)),
        }
    }

    /// Get the frame type of this message
    pub fn frame_type(&self) -> FrameType {
        match self {
            Self::Join(_) => FrameType::Join,
            Self::NewRoom => FrameType::NewRoom,
            Self::CheckRoom(_) => FrameType::CheckRoom,
            Self::Goodbye(_) => FrameType::Goodbye,
            Self::PublishText(_) => FrameType::PublishText,
            Self::PublishFile(_) => FrameType::PublishFile,
            Self::PublishChunk(_) => FrameType::PublishChunk,
            Self::ChunkReceived(_) => FrameType::ChunkReceived,
            Self::Text(_) => FrameType::Text,
            Self::FileHeader(_) => FrameType::FileHeader,
            Self::Chunk(_) => FrameType::Chunk,
            Self::Sync => FrameType::Sync,
            Self::ChunkOk(_) => FrameType::ChunkOk,
            Self::WrongChunk(_) => FrameType::WrongChunk,
            Self::Resync => FrameType::Resync,
            Self::NoRoom => FrameType::NoRoom,
            Self::RoomCreated(_) => FrameType::RoomCreated,
            Self::RoomStatus(_) => FrameType::RoomStatus,
            Self::Error(_) => FrameType::Error,
        }
    }

    /// Check if this is a client-side control message
    pub fn is_control(&self) -> bool {
        self.frame_type().is_control()
    }

    /// Check if this is a publish command
    pub fn is_publish(&self) -> bool {
        self.frame_type().is_publish()
    }
}

/// Encode a message directly to bytes (convenience function)
pub fn encode<T: Encodable>(msg: &T) -> io::Result<Bytes> {
    msg.encode_frame().map(|f| f.encode_to_bytes())
}

/// Decode a frame to a specific message type (convenience function)
pub fn decode<T: Decodable>(frame: &Frame) -> io::Result<T> {
    T::decode_frame(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let original = PublishFile {
            content_type: "application/pdf".to_string(),
            filename: "notes.pdf".to_string(),
            total_chunks: 7,
        };

        let frame = original.encode_frame().unwrap();
        assert_eq!(frame.frame_type, FrameType::PublishFile);

        let decoded = PublishFile::decode_frame(&frame).unwrap();
        assert_eq!(original.content_type, decoded.content_type);
        assert_eq!(original.filename, decoded.filename);
        assert_eq!(original.total_chunks, decoded.total_chunks);
    }

    #[test]
    fn test_chunk_binary_roundtrip() {
        let chunk = ChunkData {
            index: 3,
            data: Bytes::from_static(b"\x00\x01binary chunk bytes\xFF"),
        };

        let frame = chunk.into_frame(FrameType::PublishChunk).unwrap();
        assert_eq!(frame.frame_type, FrameType::PublishChunk);
        // 4-byte index header + raw data
        assert_eq!(frame.payload.len(), 4 + chunk.data.len());

        let decoded = ChunkData::from_frame(&frame).unwrap();
        assert_eq!(chunk, decoded);
    }

    #[test]
    fn test_chunk_rejects_non_chunk_frame_type() {
        let chunk = ChunkData {
            index: 0,
            data: Bytes::from_static(b"x"),
        };
        assert!(chunk.into_frame(FrameType::PublishText).is_err());

        let frame = Frame::new(FrameType::Sync, Bytes::new());
        assert!(ChunkData::from_frame(&frame).is_err());
    }

    #[test]
    fn test_chunk_truncated_payload() {
        let frame = Frame::new(FrameType::Chunk, Bytes::from_static(b"\x00\x01"));
        assert!(ChunkData::from_frame(&frame).is_err());
    }

    #[test]
    fn test_decoded_message_enum() {
        let msg = ChunkReceived { index: 12 };
        let frame = msg.encode_frame().unwrap();

        let decoded = DecodedMessage::decode(&frame).unwrap();
        match decoded {
            DecodedMessage::ChunkReceived(ack) => assert_eq!(ack.index, 12),
            _ => panic!("Expected ChunkReceived message"),
        }
    }

    #[test]
    fn test_empty_frames_decode() {
        for (frame_type, want_control) in [
            (FrameType::NewRoom, true),
            (FrameType::Sync, false),
            (FrameType::Resync, false),
            (FrameType::NoRoom, false),
        ] {
            let frame = Frame::empty(frame_type);
            let decoded = DecodedMessage::decode(&frame).unwrap();
            assert_eq!(decoded.frame_type(), frame_type);
            assert_eq!(decoded.is_control(), want_control);
        }
    }

    #[test]
    fn test_wrong_frame_type() {
        let msg = TextContent {
            data: "hi".to_string(),
        };
        let frame = msg.encode_frame().unwrap();

        // Try to decode as PublishText (wrong type)
        let result = PublishText::decode_frame(&frame);
        assert!(result.is_err());
    }

    #[test]
    fn test_encode_helper() {
        let msg = RoomStatus { exists: true };
        let bytes = encode(&msg).unwrap();
        assert!(!bytes.is_empty());
    }

    #[test]
    fn test_error_message_encoding() {
        let err = ErrorMessage::invalid_frame("Unexpected frame before join");
        let frame = err.encode_frame().unwrap();

        let decoded = ErrorMessage::decode_frame(&frame).unwrap();
        assert_eq!(decoded.code, ErrorMessage::INVALID_FRAME);
        assert_eq!(decoded.message, "Unexpected frame before join");
    }
}
