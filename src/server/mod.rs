//! WebSocket server module
//!
//! Wire protocol, the signaling router and the WebSocket transport that
//! drives it.

mod protocol;
mod router;
mod websocket;

pub use protocol::*;
pub use router::*;
pub use websocket::*;
