//! Call session lifecycle and public command surface.
//!
//! A [`Session`] is a cheap cloneable handle over shared inner state. One
//! dispatcher task drains the transport and feeds the state machine in
//! delivery order; per-link pumps feed engine events back in. Sessions
//! are closed explicitly with [`Session::close`].

use crate::config::CallConfig;
use crate::engine::{LocalMedia, MediaEngine};
use crate::errors::CallError;
use crate::events::{CallEvent, EventBus, EventKind, EventSubscription};
use crate::signaling::message::SignalMessage;
use crate::signaling::negotiation::CallState;
use crate::transport::SignalingTransport;
use crate::types::{MediaStreamInfo, NegotiationState, PeerInfo, SessionStats};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;

pub(crate) struct SessionInner<E: MediaEngine, T: SignalingTransport> {
    pub(crate) session_id: String,
    pub(crate) role: String,
    pub(crate) local_peer: PeerInfo,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) config: CallConfig,
    pub(crate) engine: E,
    pub(crate) transport: T,
    pub(crate) events: EventBus,
    pub(crate) state: Mutex<CallState<E>>,
    pub(crate) closed: AtomicBool,
    pub(crate) link_generation: AtomicU64,
    pub(crate) probe_failure: Option<CallError>,
    pub(crate) weak: Weak<SessionInner<E, T>>,
}

/// One client's participation in a room.
pub struct Session<E: MediaEngine, T: SignalingTransport> {
    inner: Arc<SessionInner<E, T>>,
}

impl<E: MediaEngine, T: SignalingTransport> Clone for Session<E, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: MediaEngine, T: SignalingTransport> Session<E, T> {
    /// Start a session over an already-connected transport. Generates any
    /// absent identifiers, probes the engine once (a probe failure does
    /// not fail construction; it surfaces when media is first requested)
    /// and begins dispatching inbound signaling.
    pub async fn start(mut config: CallConfig, engine: E, transport: T) -> Result<Self, CallError> {
        config.validate().map_err(CallError::invalid_argument)?;
        let (session_id, peer_id) = config.ensure_identity();

        let probe_failure = match engine.probe().await {
            Ok(()) => None,
            Err(e) => {
                log::warn!("media capability probe failed: {}", e);
                Some(e)
            }
        };

        let local_peer = PeerInfo {
            peer_id,
            display_name: Some(config.session.display_name.clone()),
        };
        let role = config.session.role.clone();

        let inner = Arc::new_cyclic(|weak| SessionInner {
            session_id: session_id.clone(),
            role,
            local_peer,
            created_at: Utc::now(),
            config,
            engine,
            transport,
            events: EventBus::default(),
            state: Mutex::new(CallState::new()),
            closed: AtomicBool::new(false),
            link_generation: AtomicU64::new(0),
            probe_failure,
            weak: weak.clone(),
        });

        let session = Self { inner };
        session.spawn_dispatch_pump();
        log::info!(
            "session {} started as peer {}",
            session_id,
            session.inner.local_peer.peer_id
        );
        Ok(session)
    }

    /// Drain the transport into the state machine, one message at a time.
    /// Exits when the transport closes.
    fn spawn_dispatch_pump(&self) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            while let Some(message) = inner.transport.recv().await {
                inner.handle_message(message).await;
            }
            log::info!("signaling transport closed; dispatcher exiting");
        });
    }

    /// Room identifier.
    pub fn id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn local_peer_id(&self) -> &str {
        &self.inner.local_peer.peer_id
    }

    pub fn display_name(&self) -> Option<&str> {
        self.inner.local_peer.display_name.as_deref()
    }

    /// Application-defined tag, opaque to the negotiation core.
    pub fn role(&self) -> &str {
        &self.inner.role
    }

    pub fn config(&self) -> &CallConfig {
        &self.inner.config
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Event surface for the application layer.
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn subscribe(&self, kind: EventKind) -> EventSubscription {
        self.inner.events.subscribe(kind)
    }

    pub fn subscribe_all(&self) -> EventSubscription {
        self.inner.events.subscribe_all()
    }

    pub async fn negotiation_state(&self) -> NegotiationState {
        self.inner.state.lock().await.state
    }

    pub async fn remote_peer(&self) -> Option<PeerInfo> {
        self.inner.state.lock().await.remote_peer.clone()
    }

    /// Descriptor of the acquired local capture, if any.
    pub async fn local_media(&self) -> Option<MediaStreamInfo> {
        self.inner
            .state
            .lock()
            .await
            .local_media
            .as_ref()
            .map(|capture| capture.info())
    }

    /// Descriptor of the current remote stream, if any.
    pub async fn remote_media(&self) -> Option<MediaStreamInfo> {
        self.inner.state.lock().await.remote_media.clone()
    }

    /// Point-in-time diagnostic snapshot.
    pub async fn stats(&self) -> SessionStats {
        self.inner.stats().await
    }

    /// Acquire local capture. Memoized: while a capture is held, further
    /// calls return it without a second device request. Emits
    /// `localStreamReady` once per successful acquisition, or a client
    /// error; never returns an error itself.
    pub async fn acquire_local_media(&self) -> bool {
        self.inner.acquire_local_media().await
    }

    /// Offer a call to the known remote peer. See the state machine rules
    /// for preconditions; failures surface as client error events.
    pub async fn join_room(&self) -> bool {
        self.inner.join_room().await
    }

    /// Announce departure (best-effort) and tear the call down. Always
    /// reports success once teardown has run.
    pub async fn leave_room(&self) -> bool {
        self.inner.leave_room().await
    }

    /// Forward a raw signaling message. Silent no-op on a closed session.
    pub async fn send(&self, message: &SignalMessage) {
        self.inner.send(message).await;
    }

    /// Wrap `payload` as an information message addressed to the current
    /// remote peer. Reports a client error and sends nothing when no
    /// remote peer is present.
    pub async fn send_directed(&self, payload: serde_json::Value) -> bool {
        self.inner.send_directed(payload).await
    }

    /// Tear down any call, release media, mark the session closed and
    /// close the transport. Idempotent.
    pub async fn close(&self) {
        self.inner.close().await;
    }
}

impl<E: MediaEngine, T: SignalingTransport> SessionInner<E, T> {
    pub(crate) async fn acquire_local_media(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            self.events.emit(CallEvent::ClientError {
                reason: "session is closed".to_string(),
                detail: None,
            });
            return false;
        }

        let mut state = self.state.lock().await;
        if state.local_media.is_some() {
            log::debug!("local media already acquired");
            return true;
        }
        if let Some(err) = self.probe_failure.as_ref() {
            log::warn!("media capability probe failed at session start: {}", err);
            self.events.emit(CallEvent::ClientError {
                reason: "media capture is unavailable on this host".to_string(),
                detail: Some(err.to_string()),
            });
            return false;
        }

        match self.engine.acquire_capture(&self.config.media).await {
            Ok(capture) => {
                let info = capture.info();
                state.local_media = Some(capture);
                log::info!("local media acquired: {}", info.stream_id);
                self.events.emit(CallEvent::LocalStreamReady(info));
                true
            }
            Err(e) => {
                log::warn!("local media acquisition failed: {}", e);
                self.events.emit(CallEvent::ClientError {
                    reason: "failed to acquire local media".to_string(),
                    detail: Some(e.to_string()),
                });
                false
            }
        }
    }

    pub(crate) async fn send(&self, message: &SignalMessage) {
        if self.closed.load(Ordering::SeqCst) {
            log::debug!("session closed; dropping outbound {} message", message.kind());
            return;
        }
        if let Err(e) = self.transport.send(message).await {
            log::warn!("outbound {} send failed: {}", message.kind(), e);
            self.events.emit(CallEvent::ClientError {
                reason: "failed to send message".to_string(),
                detail: Some(e.to_string()),
            });
        }
    }

    pub(crate) async fn send_directed(&self, payload: serde_json::Value) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            log::debug!("session closed; dropping directed message");
            return false;
        }
        let target = {
            let state = self.state.lock().await;
            state.remote_peer.as_ref().map(|p| p.peer_id.clone())
        };
        let Some(target) = target else {
            log::warn!("directed message requested with no remote peer");
            self.events.emit(CallEvent::ClientError {
                reason: "no remote peer for directed message".to_string(),
                detail: None,
            });
            return false;
        };
        self.send(&SignalMessage::information_to(target, payload)).await;
        true
    }

    pub(crate) async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            log::debug!("session already closed");
            return;
        }

        let mut state = self.state.lock().await;
        if state.link.is_some() {
            self.teardown_locked(&mut state).await;
        } else if let Some(media) = state.local_media.take() {
            media.stop();
        }
        state.remote_peer = None;
        state.remote_media = None;
        state.state = NegotiationState::Closed;
        drop(state);

        self.transport.close().await;
        log::info!("session {} closed", self.session_id);
    }

    pub(crate) async fn stats(&self) -> SessionStats {
        let state = self.state.lock().await;
        SessionStats {
            session_id: self.session_id.clone(),
            local_peer_id: self.local_peer.peer_id.clone(),
            state: state.state,
            remote_peer: state.remote_peer.clone(),
            has_peer_link: state.link.is_some(),
            has_local_media: state.local_media.is_some(),
            has_remote_media: state.remote_media.is_some(),
            created_at: self.created_at,
        }
    }
}

/// Production session: WebSocket signaling plus the webrtc engine.
pub type CallSession =
    Session<crate::engine::webrtc::WebRtcEngine, crate::transport::ws::WsTransport>;

impl CallSession {
    /// Connect to the relay named in `config` and start a session over
    /// the socket. Fails if the configuration is invalid, the websocket
    /// handshake fails, or the engine cannot be constructed.
    pub async fn connect(mut config: CallConfig) -> Result<Self, CallError> {
        config.validate().map_err(CallError::invalid_argument)?;
        let (session_id, peer_id) = config.ensure_identity();

        let transport = crate::transport::ws::WsTransport::connect(
            &config.signaling,
            &session_id,
            &peer_id,
            &config.session.display_name,
        )
        .await?;
        let engine = crate::engine::webrtc::WebRtcEngine::new()?;

        Session::start(config, engine, transport).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{settle, MockEngine, MockTransport};

    fn test_config() -> CallConfig {
        let mut config = CallConfig::default();
        config.session.display_name = "Alice".to_string();
        config
    }

    #[tokio::test]
    async fn test_start_assigns_identity() {
        let engine = MockEngine::new();
        let transport = MockTransport::new();
        let session = Session::start(test_config(), engine, transport)
            .await
            .unwrap();

        assert_eq!(session.id().len(), 6, "room id should be six digits");
        assert_eq!(session.local_peer_id().len(), 36, "peer id should be a uuid");
        assert_eq!(session.display_name(), Some("Alice"));
        assert!(!session.is_closed());
        assert_eq!(session.negotiation_state().await, NegotiationState::Idle);

        session.close().await;
    }

    #[tokio::test]
    async fn test_acquire_local_media_is_memoized() {
        let engine = MockEngine::new();
        let transport = MockTransport::new();
        let session = Session::start(test_config(), engine.clone(), transport)
            .await
            .unwrap();
        let mut ready = session.subscribe(EventKind::LocalStreamReady);

        assert!(session.acquire_local_media().await);
        assert!(session.acquire_local_media().await);

        assert_eq!(engine.acquire_count(), 1, "one device request only");
        assert!(ready.poll().is_some(), "ready event emitted once");
        assert!(ready.poll().is_none(), "no duplicate ready event");

        session.close().await;
    }

    #[tokio::test]
    async fn test_probe_failure_surfaces_on_acquire() {
        let engine = MockEngine::new();
        engine.fail_probe();
        let transport = MockTransport::new();
        let session = Session::start(test_config(), engine.clone(), transport)
            .await
            .unwrap();
        let mut errors = session.subscribe(EventKind::ClientError);

        assert!(!session.acquire_local_media().await);
        assert_eq!(engine.acquire_count(), 0, "capture is never requested");
        assert!(errors.poll().is_some());

        session.close().await;
    }

    #[tokio::test]
    async fn test_send_directed_requires_remote_peer() {
        let engine = MockEngine::new();
        let transport = MockTransport::new();
        let session = Session::start(test_config(), engine, transport.clone())
            .await
            .unwrap();
        let mut errors = session.subscribe(EventKind::ClientError);

        assert!(!session.send_directed(serde_json::json!({"hi": 1})).await);
        assert!(transport.sent().is_empty(), "nothing goes out without a target");
        assert!(errors.poll().is_some());

        session.close().await;
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_silences_send() {
        let engine = MockEngine::new();
        let transport = MockTransport::new();
        let session = Session::start(test_config(), engine, transport.clone())
            .await
            .unwrap();

        session.close().await;
        session.close().await;
        settle().await;

        assert!(session.is_closed());
        assert!(!transport.is_open());
        assert_eq!(session.negotiation_state().await, NegotiationState::Closed);

        session
            .send(&SignalMessage::leave_to(Some("p2".to_string())))
            .await;
        assert!(transport.sent().is_empty(), "closed session discards sends");
    }
}
