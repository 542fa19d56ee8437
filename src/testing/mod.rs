//! Testing utilities for crabcall
//!
//! Provides in-memory stand-ins for the signaling transport and the media
//! engine, enabling deterministic offline negotiation tests without a
//! relay or capture hardware.

pub mod mocks;

pub use mocks::{settle, MockCapture, MockEngine, MockPeer, MockTransport};
