//! Session routing: protocol events mapped onto registry operations
//!
//! The router owns the policy side of the server: which reply each event
//! gets, and how completed files fan out. Registry state is only touched
//! through its locked operations; everything sent to peers happens after
//! the lock is released, via the handles snapshotted by the registry.
//!
//! File fan-out is paced per recipient. Each recipient gets its own
//! delivery task that sends the header and then one chunk at a time,
//! waiting for the recipient's `ChunkReceived` ack before the next. A slow
//! or dead recipient therefore only stalls its own stream.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::ClipError;
use crate::protocol::frame::FrameType;
use crate::protocol::messages::{
    ChunkData, ChunkOk, ConnectionId, ErrorMessage, FileHeader, PublishFile, RoomCreated,
    RoomStatus, TextContent, WrongChunk,
};
use crate::server::content::{ContentSnapshot, FileSnapshot};
use crate::server::registry::{ChunkOutcome, JoinSync, RoomRegistry};
use crate::transport::connection::PeerHandle;

/// Routes decoded protocol events to the registry and replies to peers
#[derive(Debug)]
pub struct SessionRouter {
    registry: Arc<RoomRegistry>,
    ack_timeout: Duration,
}

impl SessionRouter {
    pub fn new(registry: Arc<RoomRegistry>, ack_timeout: Duration) -> Self {
        Self {
            registry,
            ack_timeout,
        }
    }

    /// The registry this router operates on
    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    /// Join a room and deliver the initial content sync. Unknown rooms get
    /// a `NoRoom` reply and the connection stays unregistered.
    pub async fn on_connect(&self, handle: PeerHandle, room_id: &str) {
        match self.registry.join(handle.clone(), room_id).await {
            Ok(JoinSync::Content(ContentSnapshot::Text(data))) => {
                handle.send(&TextContent { data });
            }
            Ok(JoinSync::Content(ContentSnapshot::File(file))) => {
                self.spawn_file_delivery(handle, file);
            }
            // A transfer is mid-flight; the joiner hears nothing until the
            // room content is replaced or becomes ready
            Ok(JoinSync::Pending) => {}
            Err(ClipError::NoSuchRoom(_)) => {
                debug!("Join for unknown room {}", room_id);
                handle.send_empty(FrameType::NoRoom);
            }
            Err(e) => {
                warn!("Join failed for room {}: {}", room_id, e);
                handle.send(&ErrorMessage::server_error(e.to_string()));
            }
        }
    }

    /// Drop the connection's session. Connections that never joined (bad
    /// room id, disconnect before join) are not an error here.
    pub async fn on_disconnect(&self, conn: ConnectionId) {
        match self.registry.leave(conn).await {
            Ok(_) | Err(ClipError::NotJoined(_)) => {}
            Err(e) => warn!("Leave failed for connection {}: {}", conn, e),
        }
    }

    /// Replace room content with text, fan it out and confirm to the sender
    pub async fn on_text(&self, handle: &PeerHandle, data: String) {
        match self.registry.publish_text(handle.id(), data.clone()).await {
            Ok(fanout) => {
                let content = TextContent { data };
                for recipient in &fanout.recipients {
                    recipient.send(&content);
                }
                handle.send_empty(FrameType::Sync);
            }
            Err(ClipError::NotJoined(_)) => handle.send(&ErrorMessage::not_joined()),
            Err(e) => handle.send(&ErrorMessage::server_error(e.to_string())),
        }
    }

    /// Start a file transfer. No reply on success; the sender follows up
    /// with chunk 0 and is paced by the per-chunk replies from then on.
    pub async fn on_file_header(&self, handle: &PeerHandle, header: PublishFile) {
        let result = self
            .registry
            .publish_file_header(
                handle.id(),
                header.content_type,
                header.filename,
                header.total_chunks,
            )
            .await;

        match result {
            Ok(()) => {}
            Err(ClipError::Protocol(msg)) => handle.send(&ErrorMessage::bad_header(msg)),
            Err(ClipError::NotJoined(_)) => handle.send(&ErrorMessage::not_joined()),
            Err(e) => handle.send(&ErrorMessage::server_error(e.to_string())),
        }
    }

    /// Accept one chunk. Every accepted chunk gets a continuation reply so
    /// the sender never runs ahead of the server; the final chunk triggers
    /// the fan-out.
    pub async fn on_chunk(&self, handle: &PeerHandle, chunk: ChunkData) {
        let result = self
            .registry
            .publish_chunk(handle.id(), chunk.index, chunk.data)
            .await;

        match result {
            Ok(ChunkOutcome::More) => handle.send(&ChunkOk { more: true }),
            Ok(ChunkOutcome::Complete {
                room_id,
                file,
                recipients,
            }) => {
                handle.send(&ChunkOk { more: false });
                debug!(
                    "Fanning out {} to {} member(s) of room {}",
                    file.filename,
                    recipients.len(),
                    room_id
                );
                for recipient in recipients {
                    self.spawn_file_delivery(recipient, file.clone());
                }
                handle.send_empty(FrameType::Sync);
            }
            Err(ClipError::OutOfOrderChunk { expected, got }) => {
                debug!(
                    "Out-of-order chunk from connection {}: expected {}, got {}",
                    handle.id(),
                    expected,
                    got
                );
                handle.send(&WrongChunk { expected });
            }
            // No active transfer, wrong origin, or a chunk after completion:
            // tell the sender to start over from the header
            Err(ClipError::ForeignChunk(reason)) => {
                debug!(
                    "Rejected chunk from connection {}: {}",
                    handle.id(),
                    reason
                );
                handle.send_empty(FrameType::Resync);
            }
            Err(ClipError::NotJoined(_)) => handle.send(&ErrorMessage::not_joined()),
            Err(e) => handle.send(&ErrorMessage::server_error(e.to_string())),
        }
    }

    /// Mint a fresh room and reply with its identifier
    pub async fn on_new_room(&self, handle: &PeerHandle) {
        let room_id = self.registry.create_room().await;
        handle.send(&RoomCreated { room_id });
    }

    /// Reply whether a room identifier is currently live
    pub async fn on_check_room(&self, handle: &PeerHandle, room_id: &str) {
        let exists = self.registry.room_exists(room_id).await;
        handle.send(&RoomStatus { exists });
    }

    fn spawn_file_delivery(&self, recipient: PeerHandle, file: FileSnapshot) {
        let ack_timeout = self.ack_timeout;
        tokio::spawn(async move {
            deliver_file(recipient, file, ack_timeout).await;
        });
    }
}

/// Send one file to one recipient, one chunk per ack. Stops silently when
/// the recipient disconnects or a newer delivery supersedes this one, and
/// with a warning when the recipient stops acking.
async fn deliver_file(recipient: PeerHandle, file: FileSnapshot, ack_timeout: Duration) {
    let mut acks = recipient.begin_delivery().await;

    recipient.send(&FileHeader {
        content_type: file.content_type.clone(),
        filename: file.filename.clone(),
        total_chunks: file.total_chunks,
    });

    for (index, data) in file.chunks.iter().enumerate() {
        let chunk = ChunkData {
            index: index as u32,
            data: data.clone(),
        };
        let frame = match chunk.into_frame(FrameType::Chunk) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to encode chunk {} of {}: {}", index, file.filename, e);
                return;
            }
        };

        if !recipient.send_frame(frame) {
            debug!("Connection {} gone, dropping delivery", recipient.id());
            return;
        }

        match timeout(ack_timeout, acks.recv()).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                debug!(
                    "Delivery of {} to connection {} superseded",
                    file.filename,
                    recipient.id()
                );
                return;
            }
            Err(_) => {
                warn!(
                    "Connection {} stopped acking {} at chunk {}, dropping delivery",
                    recipient.id(),
                    file.filename,
                    index
                );
                return;
            }
        }
    }

    debug!(
        "Delivered {} ({} chunks) to connection {}",
        file.filename,
        file.total_chunks,
        recipient.id()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::DecodedMessage;
    use crate::protocol::frame::Frame;
    use bytes::Bytes;
    use tokio::sync::mpsc;

    const ACK_TIMEOUT: Duration = Duration::from_secs(1);

    fn router() -> SessionRouter {
        SessionRouter::new(Arc::new(RoomRegistry::new()), ACK_TIMEOUT)
    }

    async fn recv_msg(rx: &mut mpsc::UnboundedReceiver<Frame>) -> DecodedMessage {
        let frame = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("no frame within a second")
            .expect("frame channel closed");
        DecodedMessage::decode(&frame).unwrap()
    }

    async fn assert_silent(rx: &mut mpsc::UnboundedReceiver<Frame>) {
        assert!(
            timeout(Duration::from_millis(50), rx.recv()).await.is_err(),
            "expected no frame"
        );
    }

    #[tokio::test]
    async fn test_join_unknown_room_replies_no_room() {
        let router = router();
        let (handle, mut rx) = PeerHandle::new(1);

        router.on_connect(handle, "abc-def-1").await;

        assert!(matches!(recv_msg(&mut rx).await, DecodedMessage::NoRoom));
        assert_eq!(router.registry().session_count().await, 0);
    }

    #[tokio::test]
    async fn test_join_delivers_current_text() {
        let router = router();
        let id = router.registry().create_room().await;

        let (h1, mut rx1) = PeerHandle::new(1);
        router.on_connect(h1.clone(), &id).await;
        // Initial room content is empty text
        match recv_msg(&mut rx1).await {
            DecodedMessage::Text(text) => assert!(text.data.is_empty()),
            other => panic!("Expected text, got {:?}", other),
        }

        router.on_text(&h1, "hello".to_string()).await;
        assert!(matches!(recv_msg(&mut rx1).await, DecodedMessage::Sync));

        let (h2, mut rx2) = PeerHandle::new(2);
        router.on_connect(h2, &id).await;
        match recv_msg(&mut rx2).await {
            DecodedMessage::Text(text) => assert_eq!(text.data, "hello"),
            other => panic!("Expected text, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_text_fans_out_to_everyone_but_sender() {
        let router = router();
        let id = router.registry().create_room().await;

        let (h1, mut rx1) = PeerHandle::new(1);
        let (h2, mut rx2) = PeerHandle::new(2);
        router.on_connect(h1.clone(), &id).await;
        router.on_connect(h2, &id).await;
        recv_msg(&mut rx1).await;
        recv_msg(&mut rx2).await;

        router.on_text(&h1, "copied".to_string()).await;

        assert!(matches!(recv_msg(&mut rx1).await, DecodedMessage::Sync));
        assert_silent(&mut rx1).await;
        match recv_msg(&mut rx2).await {
            DecodedMessage::Text(text) => assert_eq!(text.data, "copied"),
            other => panic!("Expected text, got {:?}", other),
        }
        assert_silent(&mut rx2).await;
    }

    #[tokio::test]
    async fn test_chunk_flow_paces_sender_and_recipient() {
        let router = router();
        let id = router.registry().create_room().await;

        let (h1, mut rx1) = PeerHandle::new(1);
        let (h2, mut rx2) = PeerHandle::new(2);
        router.on_connect(h1.clone(), &id).await;
        router.on_connect(h2.clone(), &id).await;
        recv_msg(&mut rx1).await;
        recv_msg(&mut rx2).await;

        let header = PublishFile {
            content_type: "image/png".to_string(),
            filename: "shot.png".to_string(),
            total_chunks: 2,
        };
        router.on_file_header(&h1, header).await;
        assert_silent(&mut rx1).await;

        // First chunk: continuation reply, nothing fanned out yet
        router
            .on_chunk(
                &h1,
                ChunkData {
                    index: 0,
                    data: Bytes::from_static(b"aa"),
                },
            )
            .await;
        match recv_msg(&mut rx1).await {
            DecodedMessage::ChunkOk(ok) => assert!(ok.more),
            other => panic!("Expected continuation, got {:?}", other),
        }
        assert_silent(&mut rx2).await;

        // Final chunk: sender gets ChunkOk(false) then Sync, recipient's
        // delivery starts
        router
            .on_chunk(
                &h1,
                ChunkData {
                    index: 1,
                    data: Bytes::from_static(b"bb"),
                },
            )
            .await;
        match recv_msg(&mut rx1).await {
            DecodedMessage::ChunkOk(ok) => assert!(!ok.more),
            other => panic!("Expected continuation, got {:?}", other),
        }
        assert!(matches!(recv_msg(&mut rx1).await, DecodedMessage::Sync));

        match recv_msg(&mut rx2).await {
            DecodedMessage::FileHeader(h) => {
                assert_eq!(h.filename, "shot.png");
                assert_eq!(h.total_chunks, 2);
            }
            other => panic!("Expected file header, got {:?}", other),
        }
        match recv_msg(&mut rx2).await {
            DecodedMessage::Chunk(chunk) => {
                assert_eq!(chunk.index, 0);
                assert_eq!(chunk.data, Bytes::from_static(b"aa"));
            }
            other => panic!("Expected chunk, got {:?}", other),
        }

        // Chunk 1 is gated on the ack for chunk 0
        assert_silent(&mut rx2).await;
        h2.ack_delivery(0).await;
        match recv_msg(&mut rx2).await {
            DecodedMessage::Chunk(chunk) => {
                assert_eq!(chunk.index, 1);
                assert_eq!(chunk.data, Bytes::from_static(b"bb"));
            }
            other => panic!("Expected chunk, got {:?}", other),
        }
        h2.ack_delivery(1).await;
        assert_silent(&mut rx2).await;
    }

    #[tokio::test]
    async fn test_out_of_order_chunk_gets_wrong_chunk_reply() {
        let router = router();
        let id = router.registry().create_room().await;

        let (h1, mut rx1) = PeerHandle::new(1);
        router.on_connect(h1.clone(), &id).await;
        recv_msg(&mut rx1).await;

        router
            .on_file_header(
                &h1,
                PublishFile {
                    content_type: "image/png".to_string(),
                    filename: "shot.png".to_string(),
                    total_chunks: 2,
                },
            )
            .await;
        router
            .on_chunk(
                &h1,
                ChunkData {
                    index: 1,
                    data: Bytes::from_static(b"bb"),
                },
            )
            .await;

        match recv_msg(&mut rx1).await {
            DecodedMessage::WrongChunk(w) => assert_eq!(w.expected, 0),
            other => panic!("Expected wrong-chunk reply, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_chunk_without_transfer_gets_resync() {
        let router = router();
        let id = router.registry().create_room().await;

        let (h1, mut rx1) = PeerHandle::new(1);
        router.on_connect(h1.clone(), &id).await;
        recv_msg(&mut rx1).await;

        router
            .on_chunk(
                &h1,
                ChunkData {
                    index: 0,
                    data: Bytes::from_static(b"aa"),
                },
            )
            .await;

        assert!(matches!(recv_msg(&mut rx1).await, DecodedMessage::Resync));
    }

    #[tokio::test]
    async fn test_unjoined_publish_gets_error() {
        let router = router();
        let (h1, mut rx1) = PeerHandle::new(1);

        router.on_text(&h1, "x".to_string()).await;

        match recv_msg(&mut rx1).await {
            DecodedMessage::Error(err) => assert_eq!(err.code, ErrorMessage::NOT_JOINED),
            other => panic!("Expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_zero_chunk_header_gets_error() {
        let router = router();
        let id = router.registry().create_room().await;

        let (h1, mut rx1) = PeerHandle::new(1);
        router.on_connect(h1.clone(), &id).await;
        recv_msg(&mut rx1).await;

        router
            .on_file_header(
                &h1,
                PublishFile {
                    content_type: "image/png".to_string(),
                    filename: "shot.png".to_string(),
                    total_chunks: 0,
                },
            )
            .await;

        match recv_msg(&mut rx1).await {
            DecodedMessage::Error(err) => assert_eq!(err.code, ErrorMessage::BAD_HEADER),
            other => panic!("Expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_joiner_during_transfer_hears_nothing() {
        let router = router();
        let id = router.registry().create_room().await;

        let (h1, mut rx1) = PeerHandle::new(1);
        router.on_connect(h1.clone(), &id).await;
        recv_msg(&mut rx1).await;

        router
            .on_file_header(
                &h1,
                PublishFile {
                    content_type: "image/png".to_string(),
                    filename: "shot.png".to_string(),
                    total_chunks: 2,
                },
            )
            .await;
        router
            .on_chunk(
                &h1,
                ChunkData {
                    index: 0,
                    data: Bytes::from_static(b"aa"),
                },
            )
            .await;
        recv_msg(&mut rx1).await;

        let (h2, mut rx2) = PeerHandle::new(2);
        router.on_connect(h2, &id).await;
        assert_silent(&mut rx2).await;
    }

    #[tokio::test]
    async fn test_delivery_stops_when_recipient_never_acks() {
        let router = SessionRouter::new(
            Arc::new(RoomRegistry::new()),
            Duration::from_millis(20),
        );
        let id = router.registry().create_room().await;

        let (h1, mut rx1) = PeerHandle::new(1);
        let (h2, mut rx2) = PeerHandle::new(2);
        router.on_connect(h1.clone(), &id).await;
        router.on_connect(h2, &id).await;
        recv_msg(&mut rx1).await;
        recv_msg(&mut rx2).await;

        router
            .on_file_header(
                &h1,
                PublishFile {
                    content_type: "image/png".to_string(),
                    filename: "shot.png".to_string(),
                    total_chunks: 1,
                },
            )
            .await;
        router
            .on_chunk(
                &h1,
                ChunkData {
                    index: 0,
                    data: Bytes::from_static(b"aa"),
                },
            )
            .await;

        assert!(matches!(
            recv_msg(&mut rx2).await,
            DecodedMessage::FileHeader(_)
        ));
        assert!(matches!(recv_msg(&mut rx2).await, DecodedMessage::Chunk(_)));

        // Never acked: the stream times out and nothing more arrives
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(
            timeout(Duration::from_millis(20), rx2.recv()).await.is_err(),
            "expected delivery to stop"
        );
    }

    #[tokio::test]
    async fn test_new_room_and_check_room_replies() {
        let router = router();
        let (h1, mut rx1) = PeerHandle::new(1);

        router.on_new_room(&h1).await;
        let room_id = match recv_msg(&mut rx1).await {
            DecodedMessage::RoomCreated(created) => created.room_id,
            other => panic!("Expected room id, got {:?}", other),
        };

        router.on_check_room(&h1, &room_id).await;
        match recv_msg(&mut rx1).await {
            DecodedMessage::RoomStatus(status) => assert!(status.exists),
            other => panic!("Expected status, got {:?}", other),
        }

        router.on_check_room(&h1, "zzz-zzz-0").await;
        match recv_msg(&mut rx1).await {
            DecodedMessage::RoomStatus(status) => assert!(!status.exists),
            other => panic!("Expected status, got {:?}", other),
        }
    }
}
