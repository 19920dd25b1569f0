//! QUIC transport: per-connection stream handling

pub mod connection;

pub use connection::{serve_connection, PeerHandle};
