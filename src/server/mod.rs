//! Server side: room state, session routing and the QUIC endpoint

pub mod content;
pub mod endpoint;
pub mod registry;
pub mod session;

pub use endpoint::{ClipServer, ServerStats};
pub use registry::RoomRegistry;
pub use session::SessionRouter;
