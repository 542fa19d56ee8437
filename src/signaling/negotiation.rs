//! Negotiation state machine.
//!
//! Inbound signaling is dispatched here strictly in delivery order. All
//! call-state mutation happens under the session's single state mutex,
//! held across the asynchronous engine steps of a negotiation attempt so
//! no second negotiation-affecting event can interleave. Engine events
//! carry the generation of the link that produced them and are dropped
//! once that link is gone.

use crate::engine::{EngineEvent, LocalMedia, MediaEngine, PeerHandle};
use crate::errors::CallError;
use crate::events::CallEvent;
use crate::signaling::message::SignalMessage;
use crate::signaling::session::SessionInner;
use crate::transport::SignalingTransport;
use crate::types::{
    CandidateInfo, MediaStreamInfo, NegotiationState, PeerInfo, SessionDescription, TrackInfo,
};
use std::sync::atomic::Ordering;
use tokio::sync::mpsc;

/// Mutable call state, guarded by the session's state mutex.
pub(crate) struct CallState<E: MediaEngine> {
    pub(crate) remote_peer: Option<PeerInfo>,
    pub(crate) link: Option<PeerLink<E::Peer>>,
    pub(crate) local_media: Option<E::Capture>,
    pub(crate) remote_media: Option<MediaStreamInfo>,
    pub(crate) state: NegotiationState,
}

/// The live peer connection plus who initiated it.
pub(crate) struct PeerLink<P: PeerHandle> {
    pub(crate) peer: P,
    pub(crate) generation: u64,
    pub(crate) offerer: bool,
    pub(crate) remote_peer_id: String,
}

impl<E: MediaEngine> CallState<E> {
    pub(crate) fn new() -> Self {
        Self {
            remote_peer: None,
            link: None,
            local_media: None,
            remote_media: None,
            state: NegotiationState::Idle,
        }
    }

    /// State a session settles into once no link exists, derived from
    /// whether a remote peer is still known.
    pub(crate) fn settled(&self) -> NegotiationState {
        if self.remote_peer.is_some() {
            NegotiationState::PeerKnown
        } else {
            NegotiationState::Idle
        }
    }

    /// Fold a received track into the remote stream record. Grouped
    /// tracks replace any differing stream; ungrouped tracks accumulate
    /// onto one locally constructed stream.
    pub(crate) fn record_remote_track(
        &mut self,
        track: TrackInfo,
        stream_id: Option<String>,
        generation: u64,
    ) -> MediaStreamInfo {
        let stream = match (stream_id, self.remote_media.take()) {
            (Some(id), Some(mut existing))
                if existing.stream_id == id && !existing.constructed =>
            {
                if !existing.tracks.iter().any(|t| t.id == track.id) {
                    existing.tracks.push(track);
                }
                existing
            }
            (Some(id), _) => MediaStreamInfo {
                stream_id: id,
                tracks: vec![track],
                constructed: false,
            },
            (None, Some(mut existing)) if existing.constructed => {
                if !existing.tracks.iter().any(|t| t.id == track.id) {
                    existing.tracks.push(track);
                }
                existing
            }
            (None, _) => MediaStreamInfo {
                stream_id: format!("remote-{}", generation),
                tracks: vec![track],
                constructed: true,
            },
        };
        let snapshot = stream.clone();
        self.remote_media = Some(stream);
        snapshot
    }
}

impl<E: MediaEngine, T: SignalingTransport> SessionInner<E, T> {
    /// Route one inbound signaling message. Runs to completion before the
    /// dispatcher hands over the next message.
    pub(crate) async fn handle_message(&self, message: SignalMessage) {
        match message {
            SignalMessage::Login { details } => self.handle_login(details).await,
            SignalMessage::Offer { offer, peer, name } => {
                self.handle_offer(offer, peer, name).await
            }
            SignalMessage::Answer { answer, .. } => self.handle_answer(answer).await,
            SignalMessage::Candidate { candidate, .. } => self.handle_candidate(candidate).await,
            SignalMessage::Leave { .. } => self.handle_leave().await,
            SignalMessage::PeerLeft => self.handle_peer_left().await,
            SignalMessage::Information { msg, .. } => {
                self.events.emit(CallEvent::Information { payload: msg });
            }
            SignalMessage::Notify { notification } => {
                log::warn!("relay notification: {}", notification);
                self.events.emit(CallEvent::ServerError {
                    reason: notification,
                    detail: None,
                });
            }
            SignalMessage::Error { reason } => {
                log::error!("relay error: {}", reason);
                self.events.emit(CallEvent::ServerError {
                    reason,
                    detail: None,
                });
            }
            SignalMessage::Unknown => {
                log::debug!("ignoring unrecognized signaling message");
            }
        }
    }

    async fn handle_login(&self, details: Option<PeerInfo>) {
        let mut state = self.state.lock().await;
        match details {
            Some(peer) => {
                if let Some(link) = &state.link {
                    if link.remote_peer_id != peer.peer_id {
                        log::warn!(
                            "membership update names {} while a link to {} is live; tearing down",
                            peer.peer_id,
                            link.remote_peer_id
                        );
                        self.teardown_locked(&mut state).await;
                        self.events.emit(CallEvent::PeerHangUp);
                    }
                }
                log::info!(
                    "remote peer present: {} ({})",
                    peer.peer_id,
                    peer.display_name.as_deref().unwrap_or("unnamed")
                );
                let display_name = peer.display_name.clone();
                state.remote_peer = Some(peer);
                if state.link.is_none() {
                    state.state = NegotiationState::PeerKnown;
                }
                self.events.emit(CallEvent::PeerJoined { display_name });
            }
            None => {
                if state.link.is_some() {
                    self.teardown_locked(&mut state).await;
                    self.events.emit(CallEvent::PeerHangUp);
                }
                if state.remote_peer.take().is_some() {
                    log::info!("room no longer holds a remote peer");
                }
                state.state = NegotiationState::Idle;
                self.events.emit(CallEvent::PeerJoined { display_name: None });
            }
        }
    }

    /// Answer an inbound offer. An offer may race the membership update,
    /// so the remote peer is (re)set from the offer's sender metadata. A
    /// live link is replaced, never kept alongside a second one.
    async fn handle_offer(&self, offer: SessionDescription, peer_id: String, name: Option<String>) {
        let mut state = self.state.lock().await;

        if state.local_media.is_none() {
            log::warn!("offer from {} arrived before local media was acquired", peer_id);
            self.events.emit(CallEvent::ClientError {
                reason: "cannot answer an offer before local media is acquired".to_string(),
                detail: None,
            });
            return;
        }

        self.replace_link_locked(&mut state).await;

        let remote = PeerInfo {
            peer_id: peer_id.clone(),
            display_name: name,
        };
        state.remote_peer = Some(remote.clone());
        state.state = NegotiationState::Answering;

        let generation = self.next_generation();
        let (peer, engine_events) = match self
            .engine
            .connect_peer(&self.config.ice.servers, generation)
            .await
        {
            Ok(pair) => pair,
            Err(e) => {
                log::warn!("failed to build a peer connection for inbound offer: {}", e);
                state.state = state.settled();
                self.events.emit(CallEvent::ClientError {
                    reason: "failed to answer incoming offer".to_string(),
                    detail: Some(e.to_string()),
                });
                return;
            }
        };
        self.spawn_link_pump(engine_events);

        let answer = match self.answer_with(&state, &peer, offer).await {
            Ok(answer) => answer,
            Err(e) => {
                self.abandon_link(&mut state, peer, "failed to answer incoming offer", e)
                    .await;
                return;
            }
        };

        if let Err(e) = self
            .transport
            .send(&SignalMessage::answer_to(&peer_id, answer))
            .await
        {
            self.abandon_link(&mut state, peer, "failed to send answer", e).await;
            return;
        }

        log::info!("answered offer from {}; negotiation active", peer_id);
        state.link = Some(PeerLink {
            peer,
            generation,
            offerer: false,
            remote_peer_id: peer_id,
        });
        state.state = NegotiationState::Active;
        self.events.emit(CallEvent::OfferReceived { peer: remote });
    }

    async fn handle_answer(&self, answer: SessionDescription) {
        let mut state = self.state.lock().await;
        let Some(link) = state.link.as_ref() else {
            log::error!("answer received but no peer link exists");
            return;
        };
        if !link.offerer {
            log::error!("answer received on a link this session did not offer on");
            return;
        }
        if let Err(e) = link.peer.set_remote_description(answer).await {
            log::warn!("applying remote answer failed: {}", e);
            self.teardown_locked(&mut state).await;
            self.events.emit(CallEvent::ClientError {
                reason: "failed to apply remote answer".to_string(),
                detail: Some(e.to_string()),
            });
            return;
        }
        state.state = NegotiationState::Active;
        log::info!("remote answer applied; negotiation active");
    }

    async fn handle_candidate(&self, candidate: CandidateInfo) {
        let state = self.state.lock().await;
        let Some(link) = state.link.as_ref() else {
            log::error!("candidate received before any peer connection exists");
            return;
        };
        if let Err(e) = link.peer.add_candidate(candidate).await {
            log::warn!("failed to apply remote candidate: {}", e);
            self.events.emit(CallEvent::ClientError {
                reason: "failed to apply remote candidate".to_string(),
                detail: Some(e.to_string()),
            });
        }
    }

    /// The remote peer hung up. Its room membership survives the call, so
    /// the remote peer record is retained.
    async fn handle_leave(&self) {
        let mut state = self.state.lock().await;
        if self.teardown_locked(&mut state).await {
            log::info!("remote peer ended the call");
            self.events.emit(CallEvent::PeerHangUp);
        }
    }

    /// The remote peer disconnected from the room entirely.
    async fn handle_peer_left(&self) {
        let mut state = self.state.lock().await;
        if state.link.is_some() {
            self.teardown_locked(&mut state).await;
            self.events.emit(CallEvent::PeerHangUp);
        }
        if state.remote_peer.take().is_some() {
            log::info!("remote peer disconnected from the room");
        }
        state.state = NegotiationState::Idle;
        self.events.emit(CallEvent::PeerJoined { display_name: None });
    }

    /// Start a call toward the known remote peer: fetch connectivity
    /// servers, build a link, attach local tracks, send the offer.
    /// Returns false (after emitting a client error) when a precondition
    /// fails or any step of the attempt errors; no retries.
    pub(crate) async fn join_room(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            self.events.emit(CallEvent::ClientError {
                reason: "session is closed".to_string(),
                detail: None,
            });
            return false;
        }

        let mut state = self.state.lock().await;

        let Some(remote) = state.remote_peer.clone() else {
            log::warn!("join requested but no remote peer is present");
            self.events.emit(CallEvent::ClientError {
                reason: "no remote peer available for call".to_string(),
                detail: None,
            });
            return false;
        };
        if state.local_media.is_none() {
            log::warn!("join requested before local media was acquired");
            self.events.emit(CallEvent::ClientError {
                reason: "local media has not been acquired".to_string(),
                detail: None,
            });
            return false;
        }
        if state.link.is_some() {
            log::warn!("join requested while a negotiation is already in progress");
            self.events.emit(CallEvent::ClientError {
                reason: "negotiation already in progress".to_string(),
                detail: None,
            });
            return false;
        }

        let ice_servers = if self.config.ice.fetch_from_relay {
            match self.transport.request_ice_servers().await {
                Ok(servers) => servers,
                Err(e) => {
                    log::warn!("connectivity-server fetch failed: {}", e);
                    self.events.emit(CallEvent::ClientError {
                        reason: "failed to fetch ice servers".to_string(),
                        detail: Some(e.to_string()),
                    });
                    return false;
                }
            }
        } else {
            self.config.ice.servers.clone()
        };

        let generation = self.next_generation();
        let (peer, engine_events) = match self.engine.connect_peer(&ice_servers, generation).await
        {
            Ok(pair) => pair,
            Err(e) => {
                log::warn!("failed to build a peer connection: {}", e);
                self.events.emit(CallEvent::ClientError {
                    reason: "failed to establish peer connection".to_string(),
                    detail: Some(e.to_string()),
                });
                return false;
            }
        };
        self.spawn_link_pump(engine_events);

        let offer = match self.offer_with(&state, &peer).await {
            Ok(offer) => offer,
            Err(e) => {
                self.abandon_link(&mut state, peer, "failed to establish peer connection", e)
                    .await;
                return false;
            }
        };

        if let Err(e) = self
            .transport
            .send(&SignalMessage::offer_to(&remote.peer_id, offer))
            .await
        {
            self.abandon_link(&mut state, peer, "failed to send offer", e).await;
            return false;
        }

        log::info!("offer sent to {}; awaiting answer", remote.peer_id);
        state.link = Some(PeerLink {
            peer,
            generation,
            offerer: true,
            remote_peer_id: remote.peer_id,
        });
        state.state = NegotiationState::Offering;
        true
    }

    /// Leave the room. The departure announcement is best-effort; teardown
    /// always runs and the call reports success either way.
    pub(crate) async fn leave_room(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            log::debug!("leave requested on a closed session");
            return true;
        }

        let mut state = self.state.lock().await;
        state.state = NegotiationState::Leaving;

        let target = state.remote_peer.as_ref().map(|p| p.peer_id.clone());
        if let Err(e) = self.transport.send(&SignalMessage::leave_to(target)).await {
            log::warn!("failed to announce departure: {}", e);
            self.events.emit(CallEvent::ClientError {
                reason: "failed to send leave message".to_string(),
                detail: Some(e.to_string()),
            });
        }

        self.teardown_locked(&mut state).await;
        state.remote_peer = None;
        state.state = NegotiationState::Idle;
        log::info!("left the room");
        true
    }

    /// Idempotent teardown: detach engine handlers before anything else so
    /// no callback fires into a disposed link, stop media, close the link,
    /// clear stream state. With no link present this logs at error level
    /// and does nothing, per the lifecycle rules.
    pub(crate) async fn teardown_locked(&self, state: &mut CallState<E>) -> bool {
        let Some(link) = state.link.take() else {
            log::error!("teardown requested but no peer link exists");
            return false;
        };
        link.peer.detach();
        if let Some(media) = state.local_media.take() {
            media.stop();
        }
        state.remote_media = None;
        if let Err(e) = link.peer.close().await {
            log::warn!("peer link close failed during teardown: {}", e);
        }
        state.state = state.settled();
        true
    }

    /// Replace-path teardown for an inbound offer racing a live link: the
    /// old link is detached and closed, but the session's local capture is
    /// kept for immediate reattachment to the replacement.
    async fn replace_link_locked(&self, state: &mut CallState<E>) {
        let Some(link) = state.link.take() else {
            return;
        };
        log::warn!(
            "inbound offer replaces the live peer link (generation {})",
            link.generation
        );
        link.peer.detach();
        state.remote_media = None;
        if let Err(e) = link.peer.close().await {
            log::warn!("peer link close failed during replacement: {}", e);
        }
    }

    /// Dispose a link that never made it into the call state, then settle
    /// per the teardown rules and report the failure as a client error.
    async fn abandon_link(
        &self,
        state: &mut CallState<E>,
        peer: E::Peer,
        reason: &str,
        err: CallError,
    ) {
        log::warn!("{}: {}", reason, err);
        peer.detach();
        if let Err(e) = peer.close().await {
            log::warn!("peer link close failed: {}", e);
        }
        if let Some(media) = state.local_media.take() {
            media.stop();
        }
        state.remote_media = None;
        state.state = state.settled();
        self.events.emit(CallEvent::ClientError {
            reason: reason.to_string(),
            detail: Some(err.to_string()),
        });
    }

    async fn answer_with(
        &self,
        state: &CallState<E>,
        peer: &E::Peer,
        offer: SessionDescription,
    ) -> Result<SessionDescription, CallError> {
        peer.set_remote_description(offer).await?;
        if let Some(capture) = state.local_media.as_ref() {
            self.engine.attach_capture(peer, capture).await?;
        }
        peer.create_answer().await
    }

    async fn offer_with(
        &self,
        state: &CallState<E>,
        peer: &E::Peer,
    ) -> Result<SessionDescription, CallError> {
        if let Some(capture) = state.local_media.as_ref() {
            self.engine.attach_capture(peer, capture).await?;
        }
        peer.create_offer().await
    }

    /// Apply one engine event. Events from a replaced or torn-down link
    /// are identified by generation and dropped without touching state.
    pub(crate) async fn apply_engine_event(&self, event: EngineEvent) {
        let mut state = self.state.lock().await;
        let Some(link) = state.link.as_ref() else {
            log::debug!(
                "dropping engine event for a torn-down link (generation {})",
                event.generation()
            );
            return;
        };
        if link.generation != event.generation() {
            log::debug!(
                "dropping stale engine event (generation {}, current {})",
                event.generation(),
                link.generation
            );
            return;
        }

        match event {
            EngineEvent::CandidateDiscovered { candidate, .. } => {
                let target = link.remote_peer_id.clone();
                if let Err(e) = self
                    .transport
                    .send(&SignalMessage::candidate_to(target, candidate))
                    .await
                {
                    log::warn!("failed to send local candidate: {}", e);
                    self.events.emit(CallEvent::ClientError {
                        reason: "failed to send candidate".to_string(),
                        detail: Some(e.to_string()),
                    });
                }
            }
            EngineEvent::TrackReceived {
                track,
                stream_id,
                generation,
            } => {
                let stream = state.record_remote_track(track, stream_id, generation);
                log::info!(
                    "remote media updated: {} ({} tracks)",
                    stream.stream_id,
                    stream.tracks.len()
                );
                self.events.emit(CallEvent::RemoteStreamReady(stream));
            }
        }
    }

    pub(crate) fn next_generation(&self) -> u64 {
        self.link_generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Drain one link's engine events into the state machine. The pump
    /// exits when the link is detached and its channel closes.
    pub(crate) fn spawn_link_pump(&self, mut events: mpsc::UnboundedReceiver<EngineEvent>) {
        let Some(inner) = self.weak.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                inner.apply_engine_event(event).await;
            }
        });
    }
}
