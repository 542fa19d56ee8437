//! Media engine binding.
//!
//! The negotiation core drives the engine through a narrow capability
//! surface: probe, acquire capture, build peer connections, exchange
//! descriptions and candidates. The production binding lives in
//! [`webrtc`](self::webrtc); tests substitute `testing::MockEngine`.

pub mod webrtc;

use crate::config::MediaConfig;
use crate::errors::CallError;
use crate::types::{CandidateInfo, IceServerInfo, MediaStreamInfo, SessionDescription, TrackInfo};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Events originating inside the engine for a specific peer connection.
/// `generation` identifies the peer link the event belongs to; handlers
/// must drop events whose generation no longer matches the live link.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    CandidateDiscovered {
        generation: u64,
        candidate: CandidateInfo,
    },
    TrackReceived {
        generation: u64,
        track: TrackInfo,
        stream_id: Option<String>,
    },
}

impl EngineEvent {
    pub fn generation(&self) -> u64 {
        match self {
            EngineEvent::CandidateDiscovered { generation, .. } => *generation,
            EngineEvent::TrackReceived { generation, .. } => *generation,
        }
    }
}

/// Local capture held by a session and attached into peer links.
pub trait LocalMedia: Send + Sync + 'static {
    fn info(&self) -> MediaStreamInfo;

    /// Stop the capture tracks. Called once on teardown; must be safe to
    /// call on an already-stopped capture.
    fn stop(&self);
}

/// One live peer connection.
#[async_trait]
pub trait PeerHandle: Send + Sync + 'static {
    fn generation(&self) -> u64;

    /// Create an offer and set it as the local description.
    async fn create_offer(&self) -> Result<SessionDescription, CallError>;

    /// Create an answer and set it as the local description.
    async fn create_answer(&self) -> Result<SessionDescription, CallError>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), CallError>;

    async fn add_candidate(&self, candidate: CandidateInfo) -> Result<(), CallError>;

    /// Detach engine event handlers. After this returns no further events
    /// are produced for this link; the event channel closes. Must precede
    /// `close`.
    fn detach(&self);

    async fn close(&self) -> Result<(), CallError>;
}

/// Factory surface of the media engine.
#[async_trait]
pub trait MediaEngine: Send + Sync + 'static {
    type Capture: LocalMedia;
    type Peer: PeerHandle;

    /// One-time capability probe, run at session construction. A typed
    /// failure here means the host cannot provide media capture.
    async fn probe(&self) -> Result<(), CallError>;

    /// Acquire local audio/video capture per the media configuration.
    async fn acquire_capture(&self, media: &MediaConfig) -> Result<Self::Capture, CallError>;

    /// Build a peer connection against the given connectivity servers.
    /// Returns the handle and the channel its events arrive on, stamped
    /// with `generation`.
    async fn connect_peer(
        &self,
        ice_servers: &[IceServerInfo],
        generation: u64,
    ) -> Result<(Self::Peer, mpsc::UnboundedReceiver<EngineEvent>), CallError>;

    /// Attach the capture's tracks to a peer connection. Tracks are
    /// shared, not copied; the capture stays owned by the session.
    async fn attach_capture(
        &self,
        peer: &Self::Peer,
        capture: &Self::Capture,
    ) -> Result<(), CallError>;
}
