//! Binary frame protocol with length-prefixed messages
//!
//! Frame format:
//! ```text
//! +--------+--------+------------------+
//! | type   | length | payload          |
//! | (1 byte)| (4 bytes, BE) | (variable)  |
//! +--------+--------+------------------+
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::{self, Cursor};

/// Frame header size: 1 byte type + 4 bytes length
pub const FRAME_HEADER_SIZE: usize = 5;

/// Maximum frame payload size (16 MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Frame types for the clipboard protocol
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    // Control messages, client -> server (0x00 - 0x0F)
    Join = 0x00,
    NewRoom = 0x01,
    CheckRoom = 0x02,
    Goodbye = 0x03,

    // Publish messages, client -> server (0x10 - 0x1F)
    PublishText = 0x10,
    PublishFile = 0x11,
    PublishChunk = 0x12,

    // Delivery acks, client -> server (0x20 - 0x2F)
    ChunkReceived = 0x20,

    // Content delivery, server -> client (0x30 - 0x3F)
    Text = 0x30,
    FileHeader = 0x31,
    Chunk = 0x32,

    // Signals, server -> client (0x40 - 0x4F)
    Sync = 0x40,
    ChunkOk = 0x41,
    WrongChunk = 0x42,
    Resync = 0x43,
    NoRoom = 0x44,
    RoomCreated = 0x45,
    RoomStatus = 0x46,

    // Error (0xFF)
    Error = 0xFF,
}

impl FrameType {
    /// Convert from u8, returns None for unknown types
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(FrameType::Join),
            0x01 => Some(FrameType::NewRoom),
            0x02 => Some(FrameType::CheckRoom),
            0x03 => Some(FrameType::Goodbye),

            0x10 => Some(FrameType::PublishText),
            0x11 => Some(FrameType::PublishFile),
            0x12 => Some(FrameType::PublishChunk),

            0x20 => Some(FrameType::ChunkReceived),

            0x30 => Some(FrameType::Text),
            0x31 => Some(FrameType::FileHeader),
            0x32 => Some(FrameType::Chunk),

            0x40 => Some(FrameType::Sync),
            0x41 => Some(FrameType::ChunkOk),
            0x42 => Some(FrameType::WrongChunk),
            0x43 => Some(FrameType::Resync),
            0x44 => Some(FrameType::NoRoom),
            0x45 => Some(FrameType::RoomCreated),
            0x46 => Some(FrameType::RoomStatus),

            0xFF => Some(FrameType::Error),
            _ => None,
        }
    }

    /// Check if this frame type is a client-side control message
    pub fn is_control(&self) -> bool {
        (*self as u8) < 0x10
    }

    /// Check if this frame type is a publish command
    pub fn is_publish(&self) -> bool {
        let val = *self as u8;
        (0x10..0x20).contains(&val)
    }

    /// Check if this frame type is a delivery acknowledgment
    pub fn is_ack(&self) -> bool {
        let val = *self as u8;
        (0x20..0x30).contains(&val)
    }

    /// Check if this frame type delivers room content to a client
    pub fn is_content(&self) -> bool {
        let val = *self as u8;
        (0x30..0x40).contains(&val)
    }

    /// Check if this frame type is a server signal
    pub fn is_signal(&self) -> bool {
        let val = *self as u8;
        (0x40..0x50).contains(&val)
    }

    /// Check if this frame type carries a raw binary payload instead of JSON
    pub fn is_binary(&self) -> bool {
        matches!(self, FrameType::PublishChunk | FrameType::Chunk)
    }
}

/// A single protocol frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame with the given type and payload
    pub fn new(frame_type: FrameType, payload: impl Into<Bytes>) -> Self {
        Self {
            frame_type,
            payload: payload.into(),
        }
    }

    /// Create an empty frame (no payload)
    pub fn empty(frame_type: FrameType) -> Self {
        Self {
            frame_type,
            payload: Bytes::new(),
        }
    }

    /// Get the total encoded size of this frame
    pub fn encoded_size(&self) -> usize {
        FRAME_HEADER_SIZE + self.payload.len()
    }

    /// Encode this frame into a buffer
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_size());
        buf.put_u8(self.frame_type as u8);
        buf.put_u32(self.payload.len() as u32);
        buf.put_slice(&self.payload);
    }

    /// Encode this frame into a new Bytes
    pub fn encode_to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_size());
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Try to decode a frame from a buffer
    /// Returns Ok(Some(frame)) if successful, Ok(None) if more data needed
    pub fn decode(buf: &mut BytesMut) -> io::Result<Option<Frame>> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        // Peek at the header without consuming
        let mut cursor = Cursor::new(&buf[..]);
        let frame_type_byte = cursor.get_u8();
        let payload_len = cursor.get_u32() as usize;

        let frame_type = FrameType::from_u8(frame_type_byte).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Unknown frame type: 0x{:02X}", frame_type_byte),
            )
        })?;

        if payload_len > MAX_FRAME_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Frame payload too large: {} bytes (max: {})",
                    payload_len, MAX_FRAME_SIZE
                ),
            ));
        }

        let total_size = FRAME_HEADER_SIZE + payload_len;
        if buf.len() < total_size {
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(payload_len).freeze();

        Ok(Some(Frame {
            frame_type,
            payload,
        }))
    }

    /// Decode a single frame from a complete buffer (no streaming)
    pub fn decode_complete(data: &[u8]) -> io::Result<Frame> {
        if data.len() < FRAME_HEADER_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Incomplete frame header",
            ));
        }

        let frame_type_byte = data[0];
        let payload_len = u32::from_be_bytes([data[1], data[2], data[3], data[4]]) as usize;

        let frame_type = FrameType::from_u8(frame_type_byte).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Unknown frame type: 0x{:02X}", frame_type_byte),
            )
        })?;

        if payload_len > MAX_FRAME_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Frame payload too large: {} bytes (max: {})",
                    payload_len, MAX_FRAME_SIZE
                ),
            ));
        }

        let expected_len = FRAME_HEADER_SIZE + payload_len;
        if data.len() < expected_len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "Incomplete frame: expected {} bytes, got {}",
                    expected_len,
                    data.len()
                ),
            ));
        }

        let payload = Bytes::copy_from_slice(&data[FRAME_HEADER_SIZE..expected_len]);

        Ok(Frame {
            frame_type,
            payload,
        })
    }
}

/// Frame encoder/decoder for streaming use
#[derive(Debug, Default)]
pub struct FrameCodec {
    buffer: BytesMut,
}

impl FrameCodec {
    /// Create a new frame codec
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Create a new frame codec with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Feed data into the codec
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next frame
    pub fn decode_next(&mut self) -> io::Result<Option<Frame>> {
        Frame::decode(&mut self.buffer)
    }

    /// Get the current buffer length
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Clear the buffer
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_type_roundtrip() {
        let types = [
            FrameType::Join,
            FrameType::NewRoom,
            FrameType::CheckRoom,
            FrameType::Goodbye,
            FrameType::PublishText,
            FrameType::PublishFile,
            FrameType::PublishChunk,
            FrameType::ChunkReceived,
            FrameType::Text,
            FrameType::FileHeader,
            FrameType::Chunk,
            FrameType::Sync,
            FrameType::ChunkOk,
            FrameType::WrongChunk,
            FrameType::Resync,
            FrameType::NoRoom,
            FrameType::RoomCreated,
            FrameType::RoomStatus,
            FrameType::Error,
        ];

        for frame_type in types {
            let byte = frame_type as u8;
            let recovered = FrameType::from_u8(byte).unwrap();
            assert_eq!(frame_type, recovered);
        }
    }

    #[test]
    fn test_frame_encode_decode() {
        let original = Frame::new(FrameType::PublishText, "Hello, World!");
        let encoded = original.encode_to_bytes();

        let decoded = Frame::decode_complete(&encoded).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_frame_codec_streaming() {
        let mut codec = FrameCodec::new();

        let frame1 = Frame::new(FrameType::PublishChunk, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        let frame2 = Frame::new(FrameType::ChunkReceived, vec![11, 12, 13, 14, 15, 16]);

        let mut data = BytesMut::new();
        frame1.encode(&mut data);
        frame2.encode(&mut data);

        // Feed a partial header first
        codec.feed(&data[..3]);
        assert!(codec.decode_next().unwrap().is_none());

        // Feed the rest
        codec.feed(&data[3..]);

        let decoded1 = codec.decode_next().unwrap().unwrap();
        let decoded2 = codec.decode_next().unwrap().unwrap();

        assert_eq!(frame1, decoded1);
        assert_eq!(frame2, decoded2);

        assert!(codec.decode_next().unwrap().is_none());
    }

    #[test]
    fn test_frame_type_categories() {
        assert!(FrameType::Join.is_control());
        assert!(FrameType::NewRoom.is_control());
        assert!(!FrameType::PublishText.is_control());

        assert!(FrameType::PublishText.is_publish());
        assert!(FrameType::PublishChunk.is_publish());
        assert!(!FrameType::Text.is_publish());

        assert!(FrameType::ChunkReceived.is_ack());
        assert!(!FrameType::ChunkOk.is_ack());

        assert!(FrameType::Text.is_content());
        assert!(FrameType::Chunk.is_content());
        assert!(!FrameType::Sync.is_content());

        assert!(FrameType::Sync.is_signal());
        assert!(FrameType::NoRoom.is_signal());
        assert!(!FrameType::Error.is_signal());

        assert!(FrameType::PublishChunk.is_binary());
        assert!(FrameType::Chunk.is_binary());
        assert!(!FrameType::PublishText.is_binary());
    }

    #[test]
    fn test_empty_frame() {
        let frame = Frame::empty(FrameType::Sync);
        assert!(frame.payload.is_empty());
        assert_eq!(frame.encoded_size(), FRAME_HEADER_SIZE);

        let encoded = frame.encode_to_bytes();
        let decoded = Frame::decode_complete(&encoded).unwrap();
        assert_eq!(frame, decoded);
    }

    #[test]
    fn test_invalid_frame_type() {
        let mut data = BytesMut::new();
        data.put_u8(0xFE); // Invalid type
        data.put_u32(0);

        let result = Frame::decode_complete(&data);
        assert!(result.is_err());
    }

    #[test]
    fn test_frame_too_large() {
        let mut data = BytesMut::new();
        data.put_u8(FrameType::PublishChunk as u8);
        data.put_u32((MAX_FRAME_SIZE + 1) as u32);

        let result = Frame::decode_complete(&data);
        assert!(result.is_err());
    }
}
