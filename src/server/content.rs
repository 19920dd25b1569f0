//! Room content state and the chunk-transfer state machine
//!
//! A room holds exactly one `ContentState` at a time: replicated clipboard
//! text, or a file transfer building up from ordered chunk submissions.
//! The rules here are pure state; locking and delivery live in the registry
//! and session layers.

use bytes::Bytes;

use crate::error::{ClipError, Result};
use crate::protocol::messages::ConnectionId;

/// The current content of a room
#[derive(Debug, Clone)]
pub enum ContentState {
    /// Replicated clipboard text
    Text(String),
    /// A file transfer, in progress or completed
    File(FileTransfer),
}

impl ContentState {
    /// Initial room content: empty text
    pub fn empty() -> Self {
        ContentState::Text(String::new())
    }

    /// Snapshot for delivery. Returns None while a file transfer is still
    /// receiving chunks; a half-built file is never delivered, even to a
    /// member joining mid-transfer.
    pub fn snapshot(&self) -> Option<ContentSnapshot> {
        match self {
            ContentState::Text(data) => Some(ContentSnapshot::Text(data.clone())),
            ContentState::File(transfer) => transfer.snapshot().map(ContentSnapshot::File),
        }
    }

    /// Mutable access to an in-progress transfer, if one is active
    pub fn transfer_mut(&mut self) -> Option<&mut FileTransfer> {
        match self {
            ContentState::File(transfer) if !transfer.is_ready() => Some(transfer),
            _ => None,
        }
    }
}

/// A file transfer: header metadata plus the chunks collected so far
#[derive(Debug, Clone)]
pub struct FileTransfer {
    content_type: String,
    filename: String,
    total_chunks: u32,
    chunks: Vec<Bytes>,
    origin: ConnectionId,
    ready: bool,
}

impl FileTransfer {
    /// Start a transfer. `total_chunks` must be >= 1 (validated by the
    /// registry before content is replaced).
    pub fn new(
        origin: ConnectionId,
        content_type: String,
        filename: String,
        total_chunks: u32,
    ) -> Self {
        Self {
            content_type,
            filename,
            total_chunks,
            chunks: Vec::with_capacity(total_chunks as usize),
            origin,
            ready: false,
        }
    }

    /// The connection that started this transfer
    pub fn origin(&self) -> ConnectionId {
        self.origin
    }

    /// True once every chunk has arrived; the transfer is then immutable
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Number of chunks received so far
    pub fn received(&self) -> u32 {
        self.chunks.len() as u32
    }

    /// Submit one chunk. Accepted only from the origin connection and only
    /// at the next expected index; rejections leave the chunks untouched.
    /// Returns true when this chunk completed the transfer.
    pub fn accept_chunk(&mut self, from: ConnectionId, index: u32, data: Bytes) -> Result<bool> {
        if self.ready {
            return Err(ClipError::foreign_chunk("transfer already complete"));
        }

        if from != self.origin {
            return Err(ClipError::foreign_chunk(format!(
                "chunk from connection {} but transfer belongs to {}",
                from, self.origin
            )));
        }

        let expected = self.received();
        if index != expected {
            return Err(ClipError::OutOfOrderChunk {
                expected,
                got: index,
            });
        }

        self.chunks.push(data);
        if self.received() == self.total_chunks {
            self.ready = true;
        }

        Ok(self.ready)
    }

    /// Snapshot of the completed transfer; None until ready
    pub fn snapshot(&self) -> Option<FileSnapshot> {
        if !self.ready {
            return None;
        }

        Some(FileSnapshot {
            content_type: self.content_type.clone(),
            filename: self.filename.clone(),
            total_chunks: self.total_chunks,
            chunks: self.chunks.clone(),
        })
    }
}

/// Immutable content snapshot taken under the registry lock and delivered
/// after it is released
#[derive(Debug, Clone)]
pub enum ContentSnapshot {
    /// Clipboard text
    Text(String),
    /// A completed file
    File(FileSnapshot),
}

/// A frozen, completed file ready for fan-out. Chunk bytes are refcounted,
/// so cloning the snapshot is cheap.
#[derive(Debug, Clone)]
pub struct FileSnapshot {
    /// MIME type of the file
    pub content_type: String,
    /// File name
    pub filename: String,
    /// Number of chunks
    pub total_chunks: u32,
    /// The chunk payloads, in order
    pub chunks: Vec<Bytes>,
}
