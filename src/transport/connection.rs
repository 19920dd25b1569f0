//! Per-connection transport plumbing
//!
//! Each accepted connection carries one bidirectional stream of
//! length-prefixed frames. A writer task drains the outbound frame channel;
//! the read loop feeds the streaming codec and dispatches decoded messages
//! to the session router. The `PeerHandle` is the cloneable handle the core
//! tracks room membership with: the outbound channel plus a slot for the
//! acknowledgment channel of the active chunk delivery.

use std::sync::Arc;

use quinn::{Connection, RecvStream, SendStream};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::error::Result;
use crate::protocol::codec::{DecodedMessage, Encodable};
use crate::protocol::frame::{Frame, FrameCodec, FrameType};
use crate::protocol::messages::{ConnectionId, ErrorMessage};
use crate::server::session::SessionRouter;

/// Read buffer size for the stream loop
const READ_BUF_SIZE: usize = 8192;

/// Cloneable handle to one live connection
#[derive(Debug, Clone)]
pub struct PeerHandle {
    id: ConnectionId,
    frames: mpsc::UnboundedSender<Frame>,
    delivery: Arc<Mutex<Option<mpsc::Sender<u32>>>>,
}

impl PeerHandle {
    /// Create a handle and the outbound frame receiver its writer drains
    pub fn new(id: ConnectionId) -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (frames, rx) = mpsc::unbounded_channel();
        (
            Self {
                id,
                frames,
                delivery: Arc::new(Mutex::new(None)),
            },
            rx,
        )
    }

    /// The connection identity
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a raw frame; returns false once the connection is gone
    pub fn send_frame(&self, frame: Frame) -> bool {
        self.frames.send(frame).is_ok()
    }

    /// Queue an encodable message, logging instead of failing on a
    /// serialization error (the peer may already be gone)
    pub fn send<T: Encodable>(&self, msg: &T) {
        match msg.encode_frame() {
            Ok(frame) => {
                let _ = self.frames.send(frame);
            }
            Err(e) => warn!("Failed to encode frame for connection {}: {}", self.id, e),
        }
    }

    /// Queue a payload-less frame
    pub fn send_empty(&self, frame_type: FrameType) {
        let _ = self.frames.send(Frame::empty(frame_type));
    }

    /// Install a fresh ack channel for a chunk delivery stream, superseding
    /// any previous delivery to this peer (its task sees a closed channel
    /// and stops)
    pub async fn begin_delivery(&self) -> mpsc::Receiver<u32> {
        let (tx, rx) = mpsc::channel(1);
        *self.delivery.lock().await = Some(tx);
        rx
    }

    /// Route a `ChunkReceived` ack to the active delivery stream, if any
    pub async fn ack_delivery(&self, index: u32) {
        let guard = self.delivery.lock().await;
        if let Some(tx) = guard.as_ref() {
            // The delivery task waits for each ack before the next chunk,
            // so a full channel means a stray ack; drop it
            let _ = tx.try_send(index);
        }
    }
}

/// Serve one accepted connection until its stream closes
pub async fn serve_connection(
    router: Arc<SessionRouter>,
    connection: Connection,
    conn_id: ConnectionId,
) -> Result<()> {
    let (send, recv) = connection.accept_bi().await?;
    debug!(
        "Connection {} opened from {}",
        conn_id,
        connection.remote_address()
    );

    let (handle, frames_rx) = PeerHandle::new(conn_id);
    let writer = tokio::spawn(write_loop(send, frames_rx));

    let result = read_loop(&router, &handle, recv).await;

    router.on_disconnect(conn_id).await;
    writer.abort();
    debug!("Connection {} closed", conn_id);

    result
}

/// Drain outbound frames onto the send stream
async fn write_loop(mut send: SendStream, mut frames: mpsc::UnboundedReceiver<Frame>) {
    while let Some(frame) = frames.recv().await {
        if let Err(e) = send.write_all(&frame.encode_to_bytes()).await {
            debug!("Write failed, stopping writer: {}", e);
            break;
        }
    }
    let _ = send.finish();
}

/// Read frames off the stream and dispatch them until EOF or Goodbye
async fn read_loop(
    router: &Arc<SessionRouter>,
    handle: &PeerHandle,
    mut recv: RecvStream,
) -> Result<()> {
    let mut codec = FrameCodec::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];

    loop {
        let Some(n) = recv.read(&mut buf).await? else {
            return Ok(());
        };

        codec.feed(&buf[..n]);
        while let Some(frame) = codec.decode_next()? {
            if !dispatch(router, handle, frame).await {
                return Ok(());
            }
        }
    }
}

/// Handle one decoded frame; returns false when the connection should end
async fn dispatch(router: &Arc<SessionRouter>, handle: &PeerHandle, frame: Frame) -> bool {
    let msg = match DecodedMessage::decode(&frame) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(
                "Undecodable {:?} frame from connection {}: {}",
                frame.frame_type,
                handle.id(),
                e
            );
            handle.send(&ErrorMessage::invalid_frame(e.to_string()));
            return true;
        }
    };

    match msg {
        DecodedMessage::Join(join) => router.on_connect(handle.clone(), &join.room_id).await,
        DecodedMessage::NewRoom => router.on_new_room(handle).await,
        DecodedMessage::CheckRoom(check) => router.on_check_room(handle, &check.room_id).await,
        DecodedMessage::Goodbye(goodbye) => {
            debug!(
                "Connection {} said goodbye: {}",
                handle.id(),
                goodbye.reason
            );
            return false;
        }

        DecodedMessage::PublishText(text) => router.on_text(handle, text.data).await,
        DecodedMessage::PublishFile(header) => router.on_file_header(handle, header).await,
        DecodedMessage::PublishChunk(chunk) => router.on_chunk(handle, chunk).await,

        DecodedMessage::ChunkReceived(ack) => handle.ack_delivery(ack.index).await,

        // Server -> client frames arriving inbound are protocol violations
        other => {
            warn!(
                "Unexpected {:?} frame from connection {}",
                other.frame_type(),
                handle.id()
            );
            handle.send(&ErrorMessage::invalid_frame(format!(
                "Unexpected frame type {:?}",
                other.frame_type()
            )));
        }
    }

    true
}
