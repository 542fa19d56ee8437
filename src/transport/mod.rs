//! Signaling transport seam.
//!
//! The core only needs ordered inbound messages, outbound sends, and a
//! request/response query for connectivity servers. The production
//! implementation is a WebSocket client ([`ws`]); tests substitute
//! `testing::MockTransport`.

pub mod ws;

use crate::errors::CallError;
use crate::signaling::message::SignalMessage;
use crate::types::IceServerInfo;
use async_trait::async_trait;

#[async_trait]
pub trait SignalingTransport: Send + Sync + 'static {
    /// Send a fire-and-forget signaling message.
    async fn send(&self, message: &SignalMessage) -> Result<(), CallError>;

    /// Ask the relay for connectivity-server configuration
    /// (request/response, correlated by the transport).
    async fn request_ice_servers(&self) -> Result<Vec<IceServerInfo>, CallError>;

    /// Next inbound message, in delivery order. `None` once the transport
    /// has closed. Single consumer.
    async fn recv(&self) -> Option<SignalMessage>;

    /// Close the transport. Idempotent.
    async fn close(&self);

    fn is_open(&self) -> bool;
}
