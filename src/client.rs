//! QUIC-based clipboard sync client
//!
//! Connects to a room over a single bidirectional stream, publishes
//! clipboard content and surfaces everything the room sends as events.
//! Chunk delivery is acked automatically: the read task confirms each
//! received chunk so the server releases the next one, and hands the
//! reassembled file to the application in one piece.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use quinn::{ClientConfig as QuinnClientConfig, Connection, Endpoint, SendStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{ClipError, Result};
use crate::protocol::codec::{DecodedMessage, Encodable};
use crate::protocol::frame::{Frame, FrameCodec, FrameType};
use crate::protocol::messages::{
    CheckRoom, ChunkData, ChunkReceived, Goodbye, Join, PublishFile, PublishText, RoomId,
};
use crate::server::endpoint::ALPN_PROTOCOL;

/// Read buffer size for the stream loop
const READ_BUF_SIZE: usize = 8192;

/// Clipboard client configuration
#[derive(Clone, Debug)]
pub struct ClipClientConfig {
    /// Server address to connect to
    pub server_addr: SocketAddr,
    /// Client bind address (use 0.0.0.0:0 for auto)
    pub bind_addr: SocketAddr,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
    /// Chunk size for file publishes, in bytes
    pub chunk_size: usize,
}

impl Default for ClipClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:4433".parse().unwrap(),
            bind_addr: "0.0.0.0:0".parse().unwrap(),
            connect_timeout_secs: 10,
            chunk_size: 64 * 1024,
        }
    }
}

/// Events that the client can receive
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The room does not exist; nothing was joined
    NoRoom,
    /// Clipboard text replicated from another member
    TextReceived(String),
    /// A file replicated from another member, fully reassembled
    FileReceived {
        content_type: String,
        filename: String,
        data: Vec<u8>,
    },
    /// The server adopted our published content
    Synced,
    /// Disconnected from server
    Disconnected(String),
    /// Error occurred
    Error(ClipError),
}

/// Replies that pace a file publish, routed off the event stream
#[derive(Debug)]
enum PublishReply {
    /// Chunk accepted; true if the server expects more
    Continue(bool),
    /// Chunk rejected; resend from this index
    Wrong(u32),
    /// The transfer was superseded or unknown to the server
    Restart,
}

/// QUIC-based clipboard client
pub struct ClipClient {
    config: ClipClientConfig,
    endpoint: Option<Endpoint>,
    connection: Option<Connection>,
    outbound: Option<mpsc::UnboundedSender<Frame>>,
    publish_rx: Option<mpsc::UnboundedReceiver<PublishReply>>,
}

impl ClipClient {
    /// Create a new client with the given configuration
    pub fn new(config: ClipClientConfig) -> Self {
        Self {
            config,
            endpoint: None,
            connection: None,
            outbound: None,
            publish_rx: None,
        }
    }

    /// Connect to the server and join a room. A `NoRoom` event means the
    /// identifier was unknown and nothing was joined.
    pub async fn connect(&mut self, room_id: &str) -> Result<mpsc::UnboundedReceiver<ClientEvent>> {
        info!(
            "Connecting to clipboard server at {} for room {}",
            self.config.server_addr, room_id
        );

        let (endpoint, connection) = open_connection(&self.config).await?;
        self.endpoint = Some(endpoint);
        self.connection = Some(connection.clone());

        let (send, recv) = connection.open_bi().await?;

        // Writer task drains the outbound frame channel
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(send, outbound_rx));
        self.outbound = Some(outbound.clone());

        let join = Join {
            room_id: room_id.to_string(),
        };
        outbound
            .send(join.encode_frame()?)
            .map_err(|_| ClipError::connection("Connection closed before join"))?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (publish_tx, publish_rx) = mpsc::unbounded_channel();
        self.publish_rx = Some(publish_rx);

        tokio::spawn(read_loop(recv, outbound, event_tx, publish_tx));

        Ok(event_rx)
    }

    /// Publish clipboard text to the room. Adoption is confirmed by a
    /// `Synced` event.
    pub fn publish_text(&self, data: String) -> Result<()> {
        let msg = PublishText { data };
        self.send(msg.encode_frame()?)
    }

    /// Publish a file to the room, chunk by chunk. Each chunk waits for
    /// the server's continuation reply, so the publish never runs ahead
    /// of the server.
    pub async fn publish_file(
        &mut self,
        content_type: &str,
        filename: &str,
        data: &[u8],
    ) -> Result<()> {
        let chunks = split_chunks(data, self.config.chunk_size);
        let header = PublishFile {
            content_type: content_type.to_string(),
            filename: filename.to_string(),
            total_chunks: chunks.len() as u32,
        };
        self.send(header.encode_frame()?)?;
        debug!("Publishing {} in {} chunk(s)", filename, chunks.len());

        let mut index: u32 = 0;
        while (index as usize) < chunks.len() {
            let chunk = ChunkData {
                index,
                data: chunks[index as usize].clone(),
            };
            self.send(chunk.into_frame(FrameType::PublishChunk)?)?;

            let replies = self
                .publish_rx
                .as_mut()
                .ok_or_else(|| ClipError::connection("Not connected to server"))?;
            match replies.recv().await {
                Some(PublishReply::Continue(more)) => {
                    if !more {
                        break;
                    }
                    index += 1;
                }
                Some(PublishReply::Wrong(expected)) => {
                    warn!("Server expected chunk {}, resending from there", expected);
                    index = expected;
                }
                Some(PublishReply::Restart) => {
                    return Err(ClipError::protocol(
                        "Transfer rejected by server, start over",
                    ));
                }
                None => return Err(ClipError::connection("Connection lost during publish")),
            }
        }

        debug!("Published {}", filename);
        Ok(())
    }

    /// Disconnect from the server
    pub async fn disconnect(&mut self) -> Result<()> {
        if let Some(outbound) = self.outbound.take() {
            let goodbye = Goodbye {
                reason: "client disconnect".to_string(),
            };
            let _ = outbound.send(goodbye.encode_frame()?);
        }

        if let Some(connection) = self.connection.take() {
            connection.close(0u32.into(), b"client disconnect");
            info!("Disconnected from clipboard server");
        }

        if let Some(endpoint) = self.endpoint.take() {
            endpoint.close(0u32.into(), b"client shutdown");
        }

        self.publish_rx = None;
        Ok(())
    }

    /// Check if connected to server
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Ask the server to mint a fresh room, over a short-lived connection
    pub async fn create_room(config: &ClipClientConfig) -> Result<RoomId> {
        let (endpoint, connection) = open_connection(config).await?;

        let reply = request(&connection, Frame::empty(FrameType::NewRoom)).await?;
        let room_id = match reply {
            DecodedMessage::RoomCreated(created) => Ok(created.room_id),
            other => Err(ClipError::protocol(format!(
                "Expected room id, got {:?}",
                other.frame_type()
            ))),
        };

        connection.close(0u32.into(), b"done");
        endpoint.close(0u32.into(), b"done");
        room_id
    }

    /// Ask the server whether a room identifier is live, over a
    /// short-lived connection
    pub async fn room_exists(config: &ClipClientConfig, room_id: &str) -> Result<bool> {
        let (endpoint, connection) = open_connection(config).await?;

        let check = CheckRoom {
            room_id: room_id.to_string(),
        };
        let reply = request(&connection, check.encode_frame()?).await?;
        let exists = match reply {
            DecodedMessage::RoomStatus(status) => Ok(status.exists),
            other => Err(ClipError::protocol(format!(
                "Expected room status, got {:?}",
                other.frame_type()
            ))),
        };

        connection.close(0u32.into(), b"done");
        endpoint.close(0u32.into(), b"done");
        exists
    }

    fn send(&self, frame: Frame) -> Result<()> {
        let outbound = self
            .outbound
            .as_ref()
            .ok_or_else(|| ClipError::connection("Not connected to server"))?;
        outbound
            .send(frame)
            .map_err(|_| ClipError::connection("Connection closed"))
    }
}

/// Split file bytes into fixed-size chunks. An empty file still yields one
/// (empty) chunk, since every transfer carries at least one.
fn split_chunks(data: &[u8], chunk_size: usize) -> Vec<Bytes> {
    if data.is_empty() {
        return vec![Bytes::new()];
    }

    data.chunks(chunk_size)
        .map(Bytes::copy_from_slice)
        .collect()
}

/// Open an endpoint and connection to the configured server
async fn open_connection(config: &ClipClientConfig) -> Result<(Endpoint, Connection)> {
    let client_config = configure_client()?;

    let mut endpoint = Endpoint::client(config.bind_addr)
        .map_err(|e| ClipError::network(format!("Failed to create endpoint: {}", e)))?;
    endpoint.set_default_client_config(client_config);

    let connecting = endpoint
        .connect(config.server_addr, "localhost")
        .map_err(|e| ClipError::connection(format!("Failed to initiate connection: {}", e)))?;

    let connection = tokio::time::timeout(
        Duration::from_secs(config.connect_timeout_secs),
        connecting,
    )
    .await
    .map_err(|_| ClipError::timeout("Connection timeout"))?
    .map_err(|e| ClipError::connection(format!("Failed to connect: {}", e)))?;

    Ok((endpoint, connection))
}

/// Configure the QUIC client
fn configure_client() -> Result<QuinnClientConfig> {
    // Custom certificate verifier that accepts self-signed certificates
    // WARNING: This is insecure and should only be used for development/testing
    let mut crypto = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
        .with_no_client_auth();

    crypto.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

    Ok(QuinnClientConfig::new(Arc::new(
        quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
            .map_err(|e| ClipError::config(format!("Failed to create QUIC config: {}", e)))?,
    )))
}

/// Send one frame on a fresh stream and wait for the single reply
async fn request(connection: &Connection, frame: Frame) -> Result<DecodedMessage> {
    let (mut send, mut recv) = connection.open_bi().await?;
    send.write_all(&frame.encode_to_bytes()).await?;

    let mut codec = FrameCodec::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        let Some(n) = recv.read(&mut buf).await? else {
            return Err(ClipError::connection("Connection closed before reply"));
        };

        codec.feed(&buf[..n]);
        if let Some(reply) = codec.decode_next()? {
            return Ok(DecodedMessage::decode(&reply)?);
        }
    }
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

/// State of an inbound file while its chunks arrive
struct Reassembly {
    content_type: String,
    filename: String,
    total_chunks: u32,
    data: Vec<u8>,
    next: u32,
}

/// Read frames from the server, ack inbound chunks, reassemble files and
/// forward everything else as events
async fn read_loop(
    mut recv: quinn::RecvStream,
    outbound: mpsc::UnboundedSender<Frame>,
    event_tx: mpsc::UnboundedSender<ClientEvent>,
    publish_tx: mpsc::UnboundedSender<PublishReply>,
) {
    let mut codec = FrameCodec::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];
    let mut reassembly: Option<Reassembly> = None;

    loop {
        let n = match recv.read(&mut buf).await {
            Ok(Some(n)) => n,
            Ok(None) => {
                let _ = event_tx.send(ClientEvent::Disconnected("Stream closed".to_string()));
                return;
            }
            Err(e) => {
                let _ = event_tx.send(ClientEvent::Disconnected(format!(
                    "Connection lost: {}",
                    e
                )));
                return;
            }
        };

        codec.feed(&buf[..n]);
        loop {
            let frame = match codec.decode_next() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    let _ = event_tx.send(ClientEvent::Error(ClipError::from(e)));
                    return;
                }
            };

            let msg = match DecodedMessage::decode(&frame) {
                Ok(msg) => msg,
                Err(e) => {
                    error!("Failed to decode frame: {}", e);
                    let _ = event_tx.send(ClientEvent::Error(ClipError::from(e)));
                    continue;
                }
            };

            handle_message(msg, &outbound, &event_tx, &publish_tx, &mut reassembly);
        }
    }
}

fn handle_message(
    msg: DecodedMessage,
    outbound: &mpsc::UnboundedSender<Frame>,
    event_tx: &mpsc::UnboundedSender<ClientEvent>,
    publish_tx: &mpsc::UnboundedSender<PublishReply>,
    reassembly: &mut Option<Reassembly>,
) {
    match msg {
        DecodedMessage::Text(text) => {
            // New content supersedes any half-received file
            *reassembly = None;
            let _ = event_tx.send(ClientEvent::TextReceived(text.data));
        }

        DecodedMessage::FileHeader(header) => {
            debug!(
                "Incoming file {} in {} chunk(s)",
                header.filename, header.total_chunks
            );
            *reassembly = Some(Reassembly {
                content_type: header.content_type,
                filename: header.filename,
                total_chunks: header.total_chunks,
                data: Vec::new(),
                next: 0,
            });
        }

        DecodedMessage::Chunk(chunk) => {
            let Some(current) = reassembly.as_mut() else {
                warn!("Chunk {} without a file header, ignoring", chunk.index);
                return;
            };
            if chunk.index != current.next {
                warn!(
                    "Chunk {} while expecting {}, dropping file {}",
                    chunk.index, current.next, current.filename
                );
                *reassembly = None;
                return;
            }

            current.data.extend_from_slice(&chunk.data);
            current.next += 1;

            let ack = ChunkReceived { index: chunk.index };
            match ack.encode_frame() {
                Ok(frame) => {
                    let _ = outbound.send(frame);
                }
                Err(e) => error!("Failed to encode ack: {}", e),
            }

            if current.next == current.total_chunks {
                let Some(done) = reassembly.take() else {
                    return;
                };
                let _ = event_tx.send(ClientEvent::FileReceived {
                    content_type: done.content_type,
                    filename: done.filename,
                    data: done.data,
                });
            }
        }

        DecodedMessage::Sync => {
            let _ = event_tx.send(ClientEvent::Synced);
        }
        DecodedMessage::NoRoom => {
            let _ = event_tx.send(ClientEvent::NoRoom);
        }

        DecodedMessage::ChunkOk(ok) => {
            let _ = publish_tx.send(PublishReply::Continue(ok.more));
        }
        DecodedMessage::WrongChunk(wrong) => {
            let _ = publish_tx.send(PublishReply::Wrong(wrong.expected));
        }
        DecodedMessage::Resync => {
            let _ = publish_tx.send(PublishReply::Restart);
        }

        DecodedMessage::Error(err) => {
            let _ = event_tx.send(ClientEvent::Error(ClipError::protocol(format!(
                "Server error {}: {}",
                err.code, err.message
            ))));
        }

        other => {
            warn!("Unexpected frame from server: {:?}", other.frame_type());
        }
    }
}

/// Custom certificate verifier that accepts any certificate (INSECURE - for development only)
#[derive(Debug)]
struct AcceptAnyCertificate;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA1,
            rustls::SignatureScheme::ECDSA_SHA1_Legacy,
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
            rustls::SignatureScheme::ED448,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_default() {
        let config = ClipClientConfig::default();
        assert_eq!(config.server_addr.port(), 4433);
        assert_eq!(config.bind_addr.port(), 0);
        assert_eq!(config.connect_timeout_secs, 10);
        assert_eq!(config.chunk_size, 64 * 1024);
    }

    #[test]
    fn test_client_creation() {
        let config = ClipClientConfig::default();
        let client = ClipClient::new(config.clone());

        assert_eq!(client.config.server_addr, config.server_addr);
        assert!(client.connection.is_none());
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_client_disconnect_when_not_connected() {
        let mut client = ClipClient::new(ClipClientConfig::default());
        assert!(client.disconnect().await.is_ok());
        assert!(!client.is_connected());
    }

    #[test]
    fn test_split_chunks() {
        let chunks = split_chunks(b"abcdefg", 3);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], Bytes::from_static(b"abc"));
        assert_eq!(chunks[2], Bytes::from_static(b"g"));

        let exact = split_chunks(b"abcdef", 3);
        assert_eq!(exact.len(), 2);
    }

    #[test]
    fn test_split_chunks_empty_file_has_one_chunk() {
        let chunks = split_chunks(b"", 1024);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_empty());
    }

    #[test]
    fn test_text_supersedes_partial_reassembly() {
        let (outbound, _outbound_rx) = mpsc::unbounded_channel();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (publish_tx, _publish_rx) = mpsc::unbounded_channel();

        let mut reassembly = Some(Reassembly {
            content_type: "image/png".to_string(),
            filename: "x.png".to_string(),
            total_chunks: 4,
            data: vec![1, 2, 3],
            next: 1,
        });

        handle_message(
            DecodedMessage::Text(crate::protocol::messages::TextContent {
                data: "newer".to_string(),
            }),
            &outbound,
            &event_tx,
            &publish_tx,
            &mut reassembly,
        );

        assert!(reassembly.is_none());
        match event_rx.try_recv().unwrap() {
            ClientEvent::TextReceived(data) => assert_eq!(data, "newer"),
            other => panic!("Expected text event, got {:?}", other),
        }
    }

    #[test]
    fn test_chunks_are_acked_and_reassembled() {
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (publish_tx, _publish_rx) = mpsc::unbounded_channel();
        let mut reassembly = None;

        handle_message(
            DecodedMessage::FileHeader(crate::protocol::messages::FileHeader {
                content_type: "text/plain".to_string(),
                filename: "notes.txt".to_string(),
                total_chunks: 2,
            }),
            &outbound,
            &event_tx,
            &publish_tx,
            &mut reassembly,
        );

        for (index, data) in [(0u32, &b"hello "[..]), (1, &b"world"[..])] {
            handle_message(
                DecodedMessage::Chunk(ChunkData {
                    index,
                    data: Bytes::copy_from_slice(data),
                }),
                &outbound,
                &event_tx,
                &publish_tx,
                &mut reassembly,
            );

            // Each chunk is acked as it lands
            let ack = outbound_rx.try_recv().unwrap();
            assert_eq!(ack.frame_type, FrameType::ChunkReceived);
        }

        match event_rx.try_recv().unwrap() {
            ClientEvent::FileReceived {
                filename, data, ..
            } => {
                assert_eq!(filename, "notes.txt");
                assert_eq!(data, b"hello world");
            }
            other => panic!("Expected file event, got {:?}", other),
        }
        assert!(reassembly.is_none());
    }
}
