//! Production media engine backed by the `webrtc` crate.
//!
//! Capture tracks are sample-fed: the embedding application writes media
//! samples into the tracks exposed by [`WebRtcCapture`]; this crate only
//! negotiates them. Remote tracks are surfaced as engine events plus
//! handles on the peer for the application to consume.

use crate::config::MediaConfig;
use crate::engine::{EngineEvent, LocalMedia, MediaEngine, PeerHandle};
use crate::errors::CallError;
use crate::types::{
    CandidateInfo, IceServerInfo, MediaStreamInfo, SdpKind, SessionDescription, TrackInfo,
    TrackKind,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine as RtcMediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

type EventSlot = Arc<Mutex<Option<mpsc::UnboundedSender<EngineEvent>>>>;

/// Engine factory. Building it registers codecs and interceptors once;
/// that registration is the capability probe.
pub struct WebRtcEngine {
    api: API,
}

impl WebRtcEngine {
    pub fn new() -> Result<Self, CallError> {
        let mut media_engine = RtcMediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| CallError::engine(format!("codec registration failed: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| CallError::engine(format!("interceptor registration failed: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self { api })
    }
}

/// Sample-fed local capture: an opus audio track and/or a VP8 video track
/// grouped under one stream label.
pub struct WebRtcCapture {
    info: MediaStreamInfo,
    audio: Option<Arc<TrackLocalStaticSample>>,
    video: Option<Arc<TrackLocalStaticSample>>,
    stopped: AtomicBool,
}

impl WebRtcCapture {
    /// Track the application writes audio samples into.
    pub fn audio_track(&self) -> Option<Arc<TrackLocalStaticSample>> {
        self.audio.clone()
    }

    /// Track the application writes video samples into.
    pub fn video_track(&self) -> Option<Arc<TrackLocalStaticSample>> {
        self.video.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl LocalMedia for WebRtcCapture {
    fn info(&self) -> MediaStreamInfo {
        self.info.clone()
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            log::info!("local capture stopped: {}", self.info.stream_id);
        }
    }
}

/// One live `RTCPeerConnection`.
pub struct WebRtcPeer {
    generation: u64,
    pc: Arc<RTCPeerConnection>,
    events: EventSlot,
    remote_tracks: Arc<Mutex<Vec<Arc<TrackRemote>>>>,
}

impl WebRtcPeer {
    /// Remote tracks received so far, for the application to read RTP from.
    pub fn remote_tracks(&self) -> Vec<Arc<TrackRemote>> {
        self.remote_tracks.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl PeerHandle for WebRtcPeer {
    fn generation(&self) -> u64 {
        self.generation
    }

    async fn create_offer(&self) -> Result<SessionDescription, CallError> {
        log::info!("creating offer (link generation {})", self.generation);
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| CallError::engine(format!("failed to create offer: {}", e)))?;
        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(|e| CallError::engine(format!("failed to set local description: {}", e)))?;
        to_session_description(&offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, CallError> {
        log::info!("creating answer (link generation {})", self.generation);
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| CallError::engine(format!("failed to create answer: {}", e)))?;
        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(|e| CallError::engine(format!("failed to set local description: {}", e)))?;
        to_session_description(&answer)
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), CallError> {
        log::info!("setting remote {} (link generation {})", desc.kind, self.generation);
        let rtc_desc = from_session_description(desc)?;
        self.pc
            .set_remote_description(rtc_desc)
            .await
            .map_err(|e| CallError::engine(format!("failed to set remote description: {}", e)))
    }

    async fn add_candidate(&self, candidate: CandidateInfo) -> Result<(), CallError> {
        log::debug!("adding remote candidate: {}", candidate.candidate);
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| CallError::engine(format!("failed to add candidate: {}", e)))
    }

    fn detach(&self) {
        if self
            .events
            .lock()
            .expect("lock poisoned")
            .take()
            .is_some()
        {
            log::debug!("detached engine handlers (link generation {})", self.generation);
        }
        self.pc.on_ice_candidate(Box::new(|_| Box::pin(async {})));
        self.pc.on_track(Box::new(|_, _, _| Box::pin(async {})));
    }

    async fn close(&self) -> Result<(), CallError> {
        log::info!("closing peer connection (link generation {})", self.generation);
        self.pc
            .close()
            .await
            .map_err(|e| CallError::engine(format!("failed to close peer connection: {}", e)))
    }
}

#[async_trait]
impl MediaEngine for WebRtcEngine {
    type Capture = WebRtcCapture;
    type Peer = WebRtcPeer;

    async fn probe(&self) -> Result<(), CallError> {
        // Codec and interceptor registration already succeeded in new();
        // a constructed engine can always mint sample-fed tracks.
        Ok(())
    }

    async fn acquire_capture(&self, media: &MediaConfig) -> Result<Self::Capture, CallError> {
        if !media.audio && !media.video {
            return Err(CallError::engine("no capture kinds enabled"));
        }

        let mut info = MediaStreamInfo::new(media.stream_label.clone());
        let audio = media.audio.then(|| {
            Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_owned(),
                    clock_rate: 48000,
                    channels: 2,
                    ..Default::default()
                },
                "audio".to_owned(),
                media.stream_label.clone(),
            ))
        });
        let video = media.video.then(|| {
            Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_VP8.to_owned(),
                    clock_rate: 90000,
                    ..Default::default()
                },
                "video".to_owned(),
                media.stream_label.clone(),
            ))
        });

        if audio.is_some() {
            info.tracks.push(TrackInfo {
                id: "audio".to_string(),
                kind: TrackKind::Audio,
            });
        }
        if video.is_some() {
            info.tracks.push(TrackInfo {
                id: "video".to_string(),
                kind: TrackKind::Video,
            });
        }

        log::info!(
            "local capture ready: {} ({} tracks)",
            info.stream_id,
            info.tracks.len()
        );
        Ok(WebRtcCapture {
            info,
            audio,
            video,
            stopped: AtomicBool::new(false),
        })
    }

    async fn connect_peer(
        &self,
        ice_servers: &[IceServerInfo],
        generation: u64,
    ) -> Result<(Self::Peer, mpsc::UnboundedReceiver<EngineEvent>), CallError> {
        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers.iter().map(to_rtc_ice_server).collect(),
            ..Default::default()
        };
        let pc = Arc::new(
            self.api
                .new_peer_connection(rtc_config)
                .await
                .map_err(|e| CallError::engine(format!("failed to create peer connection: {}", e)))?,
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let events: EventSlot = Arc::new(Mutex::new(Some(tx)));
        let remote_tracks = Arc::new(Mutex::new(Vec::new()));

        let candidate_events = Arc::clone(&events);
        pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
            if let Some(c) = cand {
                match c.to_json() {
                    Ok(init) => {
                        let guard = candidate_events.lock().expect("lock poisoned");
                        if let Some(tx) = guard.as_ref() {
                            let _ = tx.send(EngineEvent::CandidateDiscovered {
                                generation,
                                candidate: CandidateInfo {
                                    candidate: init.candidate,
                                    sdp_mid: init.sdp_mid,
                                    sdp_mline_index: init.sdp_mline_index,
                                    username_fragment: init.username_fragment,
                                },
                            });
                        }
                    }
                    Err(e) => log::warn!("failed to serialize local candidate: {}", e),
                }
            }
            Box::pin(async {})
        }));

        let track_events = Arc::clone(&events);
        let track_registry = Arc::clone(&remote_tracks);
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _, _| {
            let kind = match track.kind() {
                RTPCodecType::Audio => Some(TrackKind::Audio),
                RTPCodecType::Video => Some(TrackKind::Video),
                _ => None,
            };
            let Some(kind) = kind else {
                log::warn!("ignoring remote track of unspecified kind");
                return Box::pin(async {});
            };

            let stream_id = track.stream_id();
            let stream_id = (!stream_id.is_empty()).then_some(stream_id);
            track_registry
                .lock()
                .expect("lock poisoned")
                .push(Arc::clone(&track));

            let guard = track_events.lock().expect("lock poisoned");
            if let Some(tx) = guard.as_ref() {
                let _ = tx.send(EngineEvent::TrackReceived {
                    generation,
                    track: TrackInfo {
                        id: track.id(),
                        kind,
                    },
                    stream_id,
                });
            }
            Box::pin(async {})
        }));

        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            log::info!("peer connection state: {}", state);
            Box::pin(async {})
        }));

        Ok((
            WebRtcPeer {
                generation,
                pc,
                events,
                remote_tracks,
            },
            rx,
        ))
    }

    async fn attach_capture(
        &self,
        peer: &Self::Peer,
        capture: &Self::Capture,
    ) -> Result<(), CallError> {
        let tracks = [capture.audio.clone(), capture.video.clone()];
        for track in tracks.into_iter().flatten() {
            let rtp_sender = peer
                .pc
                .add_track(track as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| CallError::engine(format!("failed to add local track: {}", e)))?;

            // Interceptors stall without an RTCP reader on the sender.
            tokio::spawn(async move {
                let mut rtcp_buf = vec![0u8; 1500];
                while rtp_sender.read(&mut rtcp_buf).await.is_ok() {}
            });
        }
        Ok(())
    }
}

fn to_rtc_ice_server(server: &IceServerInfo) -> RTCIceServer {
    RTCIceServer {
        urls: server.urls.clone(),
        username: server.username.clone().unwrap_or_default(),
        credential: server.credential.clone().unwrap_or_default(),
        ..Default::default()
    }
}

fn to_session_description(desc: &RTCSessionDescription) -> Result<SessionDescription, CallError> {
    use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
    let kind = match desc.sdp_type {
        RTCSdpType::Offer => SdpKind::Offer,
        RTCSdpType::Answer => SdpKind::Answer,
        other => {
            return Err(CallError::engine(format!(
                "unsupported sdp type: {}",
                other
            )))
        }
    };
    Ok(SessionDescription {
        kind,
        sdp: desc.sdp.clone(),
    })
}

fn from_session_description(desc: SessionDescription) -> Result<RTCSessionDescription, CallError> {
    match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp)
            .map_err(|e| CallError::engine(format!("invalid SDP offer: {}", e))),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp)
            .map_err(|e| CallError::engine(format!("invalid SDP answer: {}", e))),
    }
}
