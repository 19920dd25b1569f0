//! QUIC endpoint setup and the accept loop
//!
//! Self-signed certificate generation, TLS/QUIC configuration and the loop
//! that hands accepted connections to the transport layer. One connection
//! id counter covers the process lifetime; ids are never reused.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use quinn::Endpoint;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{ClipError, Result};
use crate::server::registry::RoomRegistry;
use crate::server::session::SessionRouter;
use crate::transport::connection::serve_connection;
use crate::ClipConfig;

/// ALPN protocol identifier for the clipboard protocol
pub const ALPN_PROTOCOL: &[u8] = b"clip";

/// Live server counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerStats {
    /// Rooms currently alive (including empty ones in their grace window)
    pub rooms: usize,
    /// Connections registered in a room
    pub sessions: usize,
}

/// QUIC-based clipboard sync server
pub struct ClipServer {
    config: ClipConfig,
    router: Arc<SessionRouter>,
    endpoint: Option<Endpoint>,
    reaper: Option<JoinHandle<()>>,
}

impl ClipServer {
    /// Create a server with the given configuration
    pub fn new(config: ClipConfig) -> Self {
        let registry = Arc::new(RoomRegistry::new());
        let router = Arc::new(SessionRouter::new(registry, config.ack_timeout));
        Self {
            config,
            router,
            endpoint: None,
            reaper: None,
        }
    }

    /// The room registry backing this server
    pub fn registry(&self) -> &Arc<RoomRegistry> {
        self.router.registry()
    }

    /// Start the server: bind the endpoint, schedule the reaper and accept
    /// connections until the endpoint closes
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting clipboard server on {}", self.config.bind_addr);

        // Generate self-signed certificate for development
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".into()])
            .map_err(|e| ClipError::config(format!("Failed to generate certificate: {}", e)))?;

        let cert_der = CertificateDer::from(
            cert.serialize_der()
                .map_err(|e| ClipError::config(format!("Failed to serialize certificate: {}", e)))?,
        );
        let key_der =
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.serialize_private_key_der()));

        // Configure rustls
        let mut tls_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key_der)
            .map_err(|e| ClipError::config(format!("Failed to configure TLS: {}", e)))?;

        tls_config.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];
        tls_config.max_early_data_size = 0;

        // Configure QUIC
        let mut transport = quinn::TransportConfig::default();
        transport.max_idle_timeout(Some(
            quinn::IdleTimeout::try_from(self.config.idle_timeout)
                .map_err(|e| ClipError::config(format!("Bad idle timeout: {}", e)))?,
        ));

        let mut quic_config = quinn::ServerConfig::with_crypto(Arc::new(
            quinn::crypto::rustls::QuicServerConfig::try_from(tls_config)
                .map_err(|e| ClipError::config(format!("Failed to create QUIC config: {}", e)))?,
        ));
        quic_config.transport_config(Arc::new(transport));

        // Create endpoint
        let endpoint = Endpoint::server(quic_config, self.config.bind_addr)
            .map_err(|e| ClipError::network(format!("Failed to create endpoint: {}", e)))?;

        info!("Clipboard server listening on {}", endpoint.local_addr()?);

        self.endpoint = Some(endpoint.clone());
        self.reaper = Some(
            self.router
                .registry()
                .spawn_reaper(self.config.reap_interval),
        );

        self.accept_connections(endpoint).await
    }

    /// Accept and serve incoming connections
    async fn accept_connections(&self, endpoint: Endpoint) -> Result<()> {
        let next_conn_id = AtomicU64::new(1);

        loop {
            match endpoint.accept().await {
                Some(incoming) => {
                    if endpoint.open_connections() >= self.config.max_connections {
                        warn!(
                            "Connection limit {} reached, refusing {}",
                            self.config.max_connections,
                            incoming.remote_address()
                        );
                        incoming.refuse();
                        continue;
                    }

                    let conn_id = next_conn_id.fetch_add(1, Ordering::Relaxed);
                    let router = Arc::clone(&self.router);
                    tokio::spawn(async move {
                        let connection = match incoming.await {
                            Ok(connection) => connection,
                            Err(e) => {
                                debug!("Handshake failed: {}", e);
                                return;
                            }
                        };

                        if let Err(e) = serve_connection(router, connection, conn_id).await {
                            error!("Connection {} failed: {}", conn_id, e);
                        }
                    });
                }
                None => {
                    warn!("Endpoint stopped accepting connections");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Current server counters
    pub async fn stats(&self) -> ServerStats {
        let registry = self.router.registry();
        ServerStats {
            rooms: registry.room_count().await,
            sessions: registry.session_count().await,
        }
    }

    /// Stop accepting connections, close existing ones and cancel the reaper
    pub fn shutdown(&mut self) {
        if let Some(reaper) = self.reaper.take() {
            reaper.abort();
        }

        if let Some(endpoint) = self.endpoint.take() {
            endpoint.close(0u32.into(), b"server shutdown");
        }

        info!("Clipboard server shut down");
    }
}

impl Drop for ClipServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
