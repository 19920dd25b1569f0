//! QUIC-based multi-room clipboard synchronization
//!
//! This library provides a server that replicates clipboard content (text
//! or chunked files) between every device joined to a room, and a client
//! for publishing and receiving that content. Rooms are identified by
//! short human-readable ids like `abc-xyz-42` and reaped on a schedule
//! once empty.

pub mod client;
pub mod error;
pub mod protocol;
pub mod server;
pub mod transport;

pub use client::{ClientEvent, ClipClient, ClipClientConfig};
pub use error::{ClipError, Result};
pub use server::{ClipServer, RoomRegistry, ServerStats};

use std::time::Duration;

/// Clipboard server configuration
#[derive(Clone, Debug)]
pub struct ClipConfig {
    /// Server listen address
    pub bind_addr: std::net::SocketAddr,
    /// Maximum number of concurrent connections
    pub max_connections: usize,
    /// How often empty rooms are reaped
    pub reap_interval: Duration,
    /// How long a chunk delivery waits for a recipient's ack before the
    /// stream is dropped
    pub ack_timeout: Duration,
    /// Connection idle timeout
    pub idle_timeout: Duration,
}

impl Default for ClipConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:4433".parse().unwrap(),
            max_connections: 1000,
            reap_interval: Duration::from_secs(60),
            ack_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(300),
        }
    }
}
