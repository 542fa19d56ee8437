//! Room signaling: the wire schema, the negotiation state machine and
//! the session handle built on top of them.

pub mod message;
mod negotiation;
pub mod session;

pub use message::{SignalMessage, SignalRequest};
pub use session::{CallSession, Session};
