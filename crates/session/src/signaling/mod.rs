//! Signaling relay integration
//!
//! The relay is an external bidirectional channel used for connection
//! setup only. This module defines the wire protocol, the transport seam
//! the session core talks through, and a WebSocket implementation of it.

pub mod protocol;
mod websocket;

pub use protocol::{signal_payload, IceCandidate, RelayMessage, SignalPayload};
pub use websocket::WebSocketRelay;

use crate::Result;

/// Outbound half of the relay channel
///
/// Implementations deliver a message to the session (or the single
/// member addressed inside it); routing and durability are the relay's
/// responsibility. Inbound events arrive on the mpsc receiver handed to
/// the session coordinator, so this seam stays send-only.
#[async_trait::async_trait]
pub trait SignalingRelay: Send + Sync {
    /// Send one message to the relay
    async fn send(&self, message: RelayMessage) -> Result<()>;
}
