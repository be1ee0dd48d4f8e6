//! Transport layer for the sandbox session runtime.
//!
//! Provides:
//! - `Session` - the per-process session object the bus dispatches into
//! - WebSocket endpoint glue (axum)
//! - `Channel` - the reconnecting client side of the connection

pub mod channel;
pub mod session;
pub mod websocket;

pub use channel::{Channel, ChannelError, ChannelState};
pub use session::Session;
pub use websocket::{ws_handler, ws_router};
