//! In-memory transport and engine doubles.
//!
//! Both mocks are cheap cloneable handles over shared state so a test can
//! keep one clone while the session owns another: scripted inbound
//! signaling goes in through [`MockTransport::push_inbound`], recorded
//! outbound traffic comes back out of [`MockTransport::sent`], and
//! [`MockEngine`] records every capture, link and negotiation call while
//! letting tests inject failures and engine events.

use crate::config::MediaConfig;
use crate::engine::{EngineEvent, LocalMedia, MediaEngine, PeerHandle};
use crate::errors::CallError;
use crate::signaling::message::SignalMessage;
use crate::transport::SignalingTransport;
use crate::types::{
    CandidateInfo, IceServerInfo, MediaStreamInfo, SessionDescription, TrackInfo, TrackKind,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;

/// Let background pumps drain on the current-thread test runtime.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

struct TransportState {
    open: AtomicBool,
    sent: Mutex<Vec<SignalMessage>>,
    inbound_tx: Mutex<Option<mpsc::UnboundedSender<SignalMessage>>>,
    inbound_rx: AsyncMutex<mpsc::UnboundedReceiver<SignalMessage>>,
    ice_servers: Mutex<Vec<IceServerInfo>>,
    fail_ice_fetch: AtomicBool,
    fail_next_send: AtomicBool,
}

/// Scriptable in-memory signaling transport.
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<TransportState>,
}

impl MockTransport {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(TransportState {
                open: AtomicBool::new(true),
                sent: Mutex::new(Vec::new()),
                inbound_tx: Mutex::new(Some(inbound_tx)),
                inbound_rx: AsyncMutex::new(inbound_rx),
                ice_servers: Mutex::new(vec![IceServerInfo::stun("stun:mock.invalid:3478")]),
                fail_ice_fetch: AtomicBool::new(false),
                fail_next_send: AtomicBool::new(false),
            }),
        }
    }

    /// Queue an inbound message for the session's dispatcher.
    pub fn push_inbound(&self, message: SignalMessage) {
        let guard = self.state.inbound_tx.lock().expect("lock poisoned");
        if let Some(tx) = guard.as_ref() {
            let _ = tx.send(message);
        }
    }

    /// Everything the session has sent, in order.
    pub fn sent(&self) -> Vec<SignalMessage> {
        self.state.sent.lock().expect("lock poisoned").clone()
    }

    /// Wire discriminators of everything sent, in order.
    pub fn sent_kinds(&self) -> Vec<&'static str> {
        self.sent().iter().map(|m| m.kind()).collect()
    }

    pub fn last_sent(&self) -> Option<SignalMessage> {
        self.state.sent.lock().expect("lock poisoned").last().cloned()
    }

    pub fn set_ice_servers(&self, servers: Vec<IceServerInfo>) {
        *self.state.ice_servers.lock().expect("lock poisoned") = servers;
    }

    /// Make the next connectivity-server query fail.
    pub fn fail_ice_fetch(&self) {
        self.state.fail_ice_fetch.store(true, Ordering::SeqCst);
    }

    /// Make exactly one upcoming send fail.
    pub fn fail_next_send(&self) {
        self.state.fail_next_send.store(true, Ordering::SeqCst);
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SignalingTransport for MockTransport {
    async fn send(&self, message: &SignalMessage) -> Result<(), CallError> {
        if !self.state.open.load(Ordering::SeqCst) {
            return Err(CallError::transport("transport closed"));
        }
        if self.state.fail_next_send.swap(false, Ordering::SeqCst) {
            return Err(CallError::transport("mock send failure"));
        }
        self.state
            .sent
            .lock()
            .expect("lock poisoned")
            .push(message.clone());
        Ok(())
    }

    async fn request_ice_servers(&self) -> Result<Vec<IceServerInfo>, CallError> {
        if self.state.fail_ice_fetch.swap(false, Ordering::SeqCst) {
            return Err(CallError::transport("mock ice fetch failure"));
        }
        Ok(self.state.ice_servers.lock().expect("lock poisoned").clone())
    }

    async fn recv(&self) -> Option<SignalMessage> {
        self.state.inbound_rx.lock().await.recv().await
    }

    async fn close(&self) {
        self.state.open.store(false, Ordering::SeqCst);
        self.state.inbound_tx.lock().expect("lock poisoned").take();
    }

    fn is_open(&self) -> bool {
        self.state.open.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

struct CaptureState {
    info: MediaStreamInfo,
    stopped: AtomicBool,
}

/// Recorded stand-in for a local capture.
#[derive(Clone)]
pub struct MockCapture {
    state: Arc<CaptureState>,
}

impl MockCapture {
    pub fn is_stopped(&self) -> bool {
        self.state.stopped.load(Ordering::SeqCst)
    }
}

impl LocalMedia for MockCapture {
    fn info(&self) -> MediaStreamInfo {
        self.state.info.clone()
    }

    fn stop(&self) {
        self.state.stopped.store(true, Ordering::SeqCst);
    }
}

struct PeerState {
    generation: u64,
    engine: Arc<EngineState>,
    offers: AtomicUsize,
    answers: AtomicUsize,
    remote_descriptions: Mutex<Vec<SessionDescription>>,
    candidates: Mutex<Vec<CandidateInfo>>,
    attached: AtomicBool,
    detached: AtomicBool,
    closed: AtomicBool,
    events: Mutex<Option<mpsc::UnboundedSender<EngineEvent>>>,
}

/// Recorded stand-in for one peer connection.
#[derive(Clone)]
pub struct MockPeer {
    state: Arc<PeerState>,
}

impl MockPeer {
    pub fn offers(&self) -> usize {
        self.state.offers.load(Ordering::SeqCst)
    }

    pub fn answers(&self) -> usize {
        self.state.answers.load(Ordering::SeqCst)
    }

    pub fn remote_descriptions(&self) -> Vec<SessionDescription> {
        self.state
            .remote_descriptions
            .lock()
            .expect("lock poisoned")
            .clone()
    }

    pub fn candidates(&self) -> Vec<CandidateInfo> {
        self.state.candidates.lock().expect("lock poisoned").clone()
    }

    pub fn has_local_tracks(&self) -> bool {
        self.state.attached.load(Ordering::SeqCst)
    }

    pub fn is_detached(&self) -> bool {
        self.state.detached.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Inject an engine event for this link. Returns false once the link
    /// has been detached.
    pub fn emit(&self, event: EngineEvent) -> bool {
        let guard = self.state.events.lock().expect("lock poisoned");
        match guard.as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl PeerHandle for MockPeer {
    fn generation(&self) -> u64 {
        self.state.generation
    }

    async fn create_offer(&self) -> Result<SessionDescription, CallError> {
        if self.state.engine.fail_create_offer.load(Ordering::SeqCst) {
            return Err(CallError::engine("mock offer failure"));
        }
        self.state.offers.fetch_add(1, Ordering::SeqCst);
        Ok(SessionDescription::offer(format!(
            "v=0\r\nmock-offer-{}",
            self.state.generation
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription, CallError> {
        if self.state.engine.fail_create_answer.load(Ordering::SeqCst) {
            return Err(CallError::engine("mock answer failure"));
        }
        self.state.answers.fetch_add(1, Ordering::SeqCst);
        Ok(SessionDescription::answer(format!(
            "v=0\r\nmock-answer-{}",
            self.state.generation
        )))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), CallError> {
        if self.state.engine.fail_set_remote.load(Ordering::SeqCst) {
            return Err(CallError::engine("mock set-remote failure"));
        }
        self.state
            .remote_descriptions
            .lock()
            .expect("lock poisoned")
            .push(desc);
        Ok(())
    }

    async fn add_candidate(&self, candidate: CandidateInfo) -> Result<(), CallError> {
        if self.state.engine.fail_add_candidate.load(Ordering::SeqCst) {
            return Err(CallError::engine("mock candidate failure"));
        }
        self.state
            .candidates
            .lock()
            .expect("lock poisoned")
            .push(candidate);
        Ok(())
    }

    fn detach(&self) {
        self.state.detached.store(true, Ordering::SeqCst);
        self.state.events.lock().expect("lock poisoned").take();
    }

    async fn close(&self) -> Result<(), CallError> {
        self.state.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct EngineState {
    fail_probe: AtomicBool,
    fail_acquire: AtomicBool,
    fail_connect: AtomicBool,
    fail_attach: AtomicBool,
    fail_create_offer: AtomicBool,
    fail_create_answer: AtomicBool,
    fail_set_remote: AtomicBool,
    fail_add_candidate: AtomicBool,
    acquires: AtomicUsize,
    connects: AtomicUsize,
    captures: Mutex<Vec<MockCapture>>,
    peers: Mutex<Vec<MockPeer>>,
    ice_servers_seen: Mutex<Vec<Vec<IceServerInfo>>>,
}

/// Recorded stand-in for the media engine.
#[derive(Clone)]
pub struct MockEngine {
    state: Arc<EngineState>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            state: Arc::new(EngineState {
                fail_probe: AtomicBool::new(false),
                fail_acquire: AtomicBool::new(false),
                fail_connect: AtomicBool::new(false),
                fail_attach: AtomicBool::new(false),
                fail_create_offer: AtomicBool::new(false),
                fail_create_answer: AtomicBool::new(false),
                fail_set_remote: AtomicBool::new(false),
                fail_add_candidate: AtomicBool::new(false),
                acquires: AtomicUsize::new(0),
                connects: AtomicUsize::new(0),
                captures: Mutex::new(Vec::new()),
                peers: Mutex::new(Vec::new()),
                ice_servers_seen: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn fail_probe(&self) {
        self.state.fail_probe.store(true, Ordering::SeqCst);
    }

    pub fn fail_acquire(&self) {
        self.state.fail_acquire.store(true, Ordering::SeqCst);
    }

    pub fn fail_connect(&self) {
        self.state.fail_connect.store(true, Ordering::SeqCst);
    }

    pub fn fail_attach(&self) {
        self.state.fail_attach.store(true, Ordering::SeqCst);
    }

    pub fn fail_create_offer(&self) {
        self.state.fail_create_offer.store(true, Ordering::SeqCst);
    }

    pub fn fail_create_answer(&self) {
        self.state.fail_create_answer.store(true, Ordering::SeqCst);
    }

    pub fn fail_set_remote(&self) {
        self.state.fail_set_remote.store(true, Ordering::SeqCst);
    }

    pub fn fail_add_candidate(&self) {
        self.state.fail_add_candidate.store(true, Ordering::SeqCst);
    }

    pub fn acquire_count(&self) -> usize {
        self.state.acquires.load(Ordering::SeqCst)
    }

    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Handle to the most recently created peer connection.
    pub fn last_peer(&self) -> Option<MockPeer> {
        self.state.peers.lock().expect("lock poisoned").last().cloned()
    }

    /// Handle to the most recently acquired capture.
    pub fn last_capture(&self) -> Option<MockCapture> {
        self.state
            .captures
            .lock()
            .expect("lock poisoned")
            .last()
            .cloned()
    }

    /// Connectivity servers each link was built with, in creation order.
    pub fn ice_servers_seen(&self) -> Vec<Vec<IceServerInfo>> {
        self.state
            .ice_servers_seen
            .lock()
            .expect("lock poisoned")
            .clone()
    }

    /// Inject an engine event into the most recent link.
    pub fn emit(&self, event: EngineEvent) -> bool {
        match self.last_peer() {
            Some(peer) => peer.emit(event),
            None => false,
        }
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaEngine for MockEngine {
    type Capture = MockCapture;
    type Peer = MockPeer;

    async fn probe(&self) -> Result<(), CallError> {
        if self.state.fail_probe.load(Ordering::SeqCst) {
            return Err(CallError::engine("mock probe failure"));
        }
        Ok(())
    }

    async fn acquire_capture(&self, media: &MediaConfig) -> Result<Self::Capture, CallError> {
        if self.state.fail_acquire.load(Ordering::SeqCst) {
            return Err(CallError::engine("mock capture failure"));
        }
        self.state.acquires.fetch_add(1, Ordering::SeqCst);

        let mut info = MediaStreamInfo::new(media.stream_label.clone());
        if media.audio {
            info.tracks.push(TrackInfo {
                id: "audio".to_string(),
                kind: TrackKind::Audio,
            });
        }
        if media.video {
            info.tracks.push(TrackInfo {
                id: "video".to_string(),
                kind: TrackKind::Video,
            });
        }

        let capture = MockCapture {
            state: Arc::new(CaptureState {
                info,
                stopped: AtomicBool::new(false),
            }),
        };
        self.state
            .captures
            .lock()
            .expect("lock poisoned")
            .push(capture.clone());
        Ok(capture)
    }

    async fn connect_peer(
        &self,
        ice_servers: &[IceServerInfo],
        generation: u64,
    ) -> Result<(Self::Peer, mpsc::UnboundedReceiver<EngineEvent>), CallError> {
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(CallError::engine("mock connect failure"));
        }
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        self.state
            .ice_servers_seen
            .lock()
            .expect("lock poisoned")
            .push(ice_servers.to_vec());

        let (tx, rx) = mpsc::unbounded_channel();
        let peer = MockPeer {
            state: Arc::new(PeerState {
                generation,
                engine: Arc::clone(&self.state),
                offers: AtomicUsize::new(0),
                answers: AtomicUsize::new(0),
                remote_descriptions: Mutex::new(Vec::new()),
                candidates: Mutex::new(Vec::new()),
                attached: AtomicBool::new(false),
                detached: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                events: Mutex::new(Some(tx)),
            }),
        };
        self.state
            .peers
            .lock()
            .expect("lock poisoned")
            .push(peer.clone());
        Ok((peer, rx))
    }

    async fn attach_capture(
        &self,
        peer: &Self::Peer,
        _capture: &Self::Capture,
    ) -> Result<(), CallError> {
        if self.state.fail_attach.load(Ordering::SeqCst) {
            return Err(CallError::engine("mock attach failure"));
        }
        peer.state.attached.store(true, Ordering::SeqCst);
        Ok(())
    }
}
