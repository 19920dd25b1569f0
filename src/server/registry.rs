//! Room registry: process-wide room state, session table and lifecycle
//!
//! All mutating operations serialize behind one lock held for the
//! check-and-mutate only. Anything needed for delivery (recipient handles,
//! chunk bytes) is snapshotted under the lock and used after release, so a
//! slow recipient never stalls unrelated rooms. Rooms are deleted only by
//! the scheduled reaper, never synchronously on the last member leaving,
//! which leaves a grace window for reconnects.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rand::Rng;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{ClipError, Result};
use crate::protocol::messages::{ConnectionId, RoomId};
use crate::server::content::{ContentSnapshot, ContentState, FileSnapshot, FileTransfer};
use crate::transport::connection::PeerHandle;

/// Initial sync handed to a joining member
#[derive(Debug)]
pub enum JoinSync {
    /// Current room content, deliver to the joiner
    Content(ContentSnapshot),
    /// A file transfer is mid-flight; the joiner receives nothing until the
    /// content becomes text or a ready file
    Pending,
}

/// Fan-out plan for a text publish
#[derive(Debug)]
pub struct Fanout {
    /// Room the publish landed in
    pub room_id: RoomId,
    /// Every member except the sender
    pub recipients: Vec<PeerHandle>,
}

/// Outcome of an accepted chunk submission
#[derive(Debug)]
pub enum ChunkOutcome {
    /// Transfer still in progress; sender may submit the next chunk
    More,
    /// Final chunk landed; content is frozen and ready for fan-out
    Complete {
        /// Room the transfer completed in
        room_id: RoomId,
        /// The completed file
        file: FileSnapshot,
        /// Every member except the sender
        recipients: Vec<PeerHandle>,
    },
}

/// Per-identifier room state
#[derive(Debug)]
struct Room {
    content: ContentState,
    members: HashMap<ConnectionId, PeerHandle>,
}

impl Room {
    fn new() -> Self {
        Self {
            content: ContentState::empty(),
            members: HashMap::new(),
        }
    }

    /// Every member handle except the given connection
    fn recipients_except(&self, conn: ConnectionId) -> Vec<PeerHandle> {
        self.members
            .iter()
            .filter(|(id, _)| **id != conn)
            .map(|(_, handle)| handle.clone())
            .collect()
    }
}

#[derive(Debug, Default)]
struct Inner {
    rooms: HashMap<RoomId, Room>,
    sessions: HashMap<ConnectionId, RoomId>,
}

/// Process-wide registry of rooms and live sessions
#[derive(Debug, Default)]
pub struct RoomRegistry {
    inner: Mutex<Inner>,
}

impl RoomRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a fresh unique room identifier and insert an empty room
    pub async fn create_room(&self) -> RoomId {
        let mut inner = self.inner.lock().await;

        let mut rng = rand::rng();
        let id = loop {
            let candidate = random_room_id(&mut rng);
            if !inner.rooms.contains_key(&candidate) {
                break candidate;
            }
        };

        inner.rooms.insert(id.clone(), Room::new());
        info!("Created room {}", id);

        id
    }

    /// Check whether a room identifier is currently live
    pub async fn room_exists(&self, id: &str) -> bool {
        let inner = self.inner.lock().await;
        inner.rooms.contains_key(id)
    }

    /// Add a connection to a room and return its initial sync. On
    /// `NoSuchRoom` the handle is left unregistered; later events from it
    /// will be rejected.
    pub async fn join(&self, handle: PeerHandle, id: &str) -> Result<JoinSync> {
        let mut inner = self.inner.lock().await;

        let conn = handle.id();
        let Some(room) = inner.rooms.get_mut(id) else {
            return Err(ClipError::no_such_room(id));
        };

        room.members.insert(conn, handle);
        let sync = match room.content.snapshot() {
            Some(snapshot) => JoinSync::Content(snapshot),
            None => JoinSync::Pending,
        };

        inner.sessions.insert(conn, id.to_string());
        info!("Connection {} joined room {}", conn, id);

        Ok(sync)
    }

    /// Remove a connection from its room and the session table. Safe to
    /// call for never-registered connections (duplicate disconnects).
    /// The room itself stays until the next reap pass.
    pub async fn leave(&self, conn: ConnectionId) -> Result<RoomId> {
        let mut inner = self.inner.lock().await;

        let Some(room_id) = inner.sessions.remove(&conn) else {
            return Err(ClipError::not_joined(format!("connection {}", conn)));
        };

        if let Some(room) = inner.rooms.get_mut(&room_id) {
            room.members.remove(&conn);
        }

        info!("Connection {} left room {}", conn, room_id);
        Ok(room_id)
    }

    /// Replace room content with new text, abandoning any in-flight
    /// transfer, and return the fan-out plan.
    pub async fn publish_text(&self, conn: ConnectionId, data: String) -> Result<Fanout> {
        let mut inner = self.inner.lock().await;

        let (room_id, room) = room_for_mut(&mut inner, conn)?;
        if matches!(room.content, ContentState::File(ref t) if !t.is_ready()) {
            debug!("Text publish abandons partial transfer in room {}", room_id);
        }

        room.content = ContentState::Text(data);
        Ok(Fanout {
            recipients: room.recipients_except(conn),
            room_id,
        })
    }

    /// Start a file transfer, replacing the previous content outright.
    /// Recipients hear nothing until the transfer completes.
    pub async fn publish_file_header(
        &self,
        conn: ConnectionId,
        content_type: String,
        filename: String,
        total_chunks: u32,
    ) -> Result<()> {
        if total_chunks == 0 {
            return Err(ClipError::protocol("total_chunks must be >= 1"));
        }

        let mut inner = self.inner.lock().await;

        let (room_id, room) = room_for_mut(&mut inner, conn)?;
        debug!(
            "Connection {} starts transfer of {} ({} chunks) in room {}",
            conn, filename, total_chunks, room_id
        );

        room.content =
            ContentState::File(FileTransfer::new(conn, content_type, filename, total_chunks));
        Ok(())
    }

    /// Submit one chunk of the active transfer. Rejections (`ForeignChunk`,
    /// `OutOfOrderChunk`) leave all state untouched.
    pub async fn publish_chunk(
        &self,
        conn: ConnectionId,
        index: u32,
        data: Bytes,
    ) -> Result<ChunkOutcome> {
        let mut inner = self.inner.lock().await;

        let (room_id, room) = room_for_mut(&mut inner, conn)?;
        let Some(transfer) = room.content.transfer_mut() else {
            return Err(ClipError::foreign_chunk("no transfer active"));
        };

        let completed = transfer.accept_chunk(conn, index, data)?;
        if !completed {
            return Ok(ChunkOutcome::More);
        }

        let Some(file) = room.content.snapshot() else {
            // accept_chunk returned completed, so the snapshot must exist
            return Err(ClipError::internal("completed transfer has no snapshot"));
        };
        let ContentSnapshot::File(file) = file else {
            return Err(ClipError::internal("completed transfer is not a file"));
        };

        info!(
            "Transfer of {} complete in room {} ({} chunks)",
            file.filename, room_id, file.total_chunks
        );

        Ok(ChunkOutcome::Complete {
            recipients: room.recipients_except(conn),
            room_id,
            file,
        })
    }

    /// Delete every room whose member set is currently empty. Returns the
    /// removed identifiers.
    pub async fn reap(&self) -> Vec<RoomId> {
        let mut inner = self.inner.lock().await;

        let empty: Vec<RoomId> = inner
            .rooms
            .iter()
            .filter(|(_, room)| room.members.is_empty())
            .map(|(id, _)| id.clone())
            .collect();

        for id in &empty {
            inner.rooms.remove(id);
            info!("Reaped room {}", id);
        }

        empty
    }

    /// Run the reaper on a fixed interval until the task is aborted
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let removed = registry.reap().await;
                if !removed.is_empty() {
                    debug!("Reap pass removed {} room(s)", removed.len());
                }
            }
        })
    }

    /// Number of live rooms
    pub async fn room_count(&self) -> usize {
        self.inner.lock().await.rooms.len()
    }

    /// Number of registered sessions
    pub async fn session_count(&self) -> usize {
        self.inner.lock().await.sessions.len()
    }
}

/// Resolve the room a connection is joined to
fn room_for_mut<'a>(
    inner: &'a mut Inner,
    conn: ConnectionId,
) -> Result<(RoomId, &'a mut Room)> {
    let Some(room_id) = inner.sessions.get(&conn).cloned() else {
        return Err(ClipError::not_joined(format!("connection {}", conn)));
    };

    match inner.rooms.get_mut(&room_id) {
        Some(room) => Ok((room_id, room)),
        None => {
            // Session pointing at a reaped room; only possible if the reaper
            // ran between registration and this event
            warn!("Session for connection {} references dead room {}", conn, room_id);
            Err(ClipError::not_joined(format!("connection {}", conn)))
        }
    }
}

/// Generate a candidate identifier: two 3-letter lowercase tokens and an
/// integer in [0, 999], hyphen-joined
fn random_room_id<R: Rng>(rng: &mut R) -> RoomId {
    let mut token = || -> String {
        (0..3)
            .map(|_| rng.random_range(b'a'..=b'z') as char)
            .collect()
    };

    let first = token();
    let second = token();
    let number: u16 = rng.random_range(0..=999);

    format!("{}-{}-{}", first, second, number)
}
