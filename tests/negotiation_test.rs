#[cfg(test)]
mod negotiation_tests {
    use crabcall::config::CallConfig;
    use crabcall::events::{CallEvent, EventKind};
    use crabcall::signaling::{Session, SignalMessage};
    use crabcall::testing::{settle, MockEngine, MockTransport};
    use crabcall::types::{CandidateInfo, NegotiationState, PeerInfo, SessionDescription};

    fn test_config() -> CallConfig {
        let mut config = CallConfig::default();
        config.session.session_id = Some("123456".to_string());
        config.session.peer_id = Some("local-peer".to_string());
        config.session.display_name = "Alice".to_string();
        config
    }

    async fn start_session() -> (
        Session<MockEngine, MockTransport>,
        MockEngine,
        MockTransport,
    ) {
        let engine = MockEngine::new();
        let transport = MockTransport::new();
        let session = Session::start(test_config(), engine.clone(), transport.clone())
            .await
            .expect("session should start");
        (session, engine, transport)
    }

    fn remote_login() -> SignalMessage {
        SignalMessage::Login {
            details: Some(PeerInfo::new("remote-peer", "Bob")),
        }
    }

    fn sample_candidate() -> CandidateInfo {
        CandidateInfo {
            candidate: "candidate:1 1 udp 2130706431 192.0.2.1 54321 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }

    #[tokio::test]
    async fn test_membership_update_announces_remote_peer() {
        let (session, _engine, transport) = start_session().await;
        let mut joined = session.subscribe(EventKind::PeerJoined);

        transport.push_inbound(remote_login());
        settle().await;

        assert_eq!(
            session.negotiation_state().await,
            NegotiationState::PeerKnown,
            "a known remote peer without a link should settle in peer_known"
        );
        let remote = session.remote_peer().await.expect("remote peer recorded");
        assert_eq!(remote.peer_id, "remote-peer");
        assert_eq!(remote.display_name.as_deref(), Some("Bob"));

        match joined.poll() {
            Some(CallEvent::PeerJoined { display_name }) => {
                assert_eq!(display_name.as_deref(), Some("Bob"));
            }
            other => panic!("expected peerJoined, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_membership_update_clears_remote_peer() {
        let (session, _engine, transport) = start_session().await;
        let mut joined = session.subscribe(EventKind::PeerJoined);

        transport.push_inbound(remote_login());
        settle().await;
        transport.push_inbound(SignalMessage::Login { details: None });
        settle().await;

        assert_eq!(session.negotiation_state().await, NegotiationState::Idle);
        assert!(session.remote_peer().await.is_none());

        // Two membership events: the arrival, then the departure with no name.
        assert!(joined.poll().is_some());
        match joined.poll() {
            Some(CallEvent::PeerJoined { display_name }) => assert!(display_name.is_none()),
            other => panic!("expected empty peerJoined, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_join_room_sends_offer_to_remote_peer() {
        let (session, engine, transport) = start_session().await;

        transport.push_inbound(remote_login());
        settle().await;
        assert!(session.acquire_local_media().await);
        assert!(session.join_room().await, "join should succeed");

        assert_eq!(
            session.negotiation_state().await,
            NegotiationState::Offering
        );

        let peer = engine.last_peer().expect("engine connected a peer");
        assert_eq!(peer.offers(), 1, "exactly one offer should be created");
        assert!(
            peer.has_local_tracks(),
            "local capture should be attached before offering"
        );

        match transport.last_sent() {
            Some(SignalMessage::Offer { peer, name, .. }) => {
                assert_eq!(peer, "remote-peer", "offer should address the remote peer");
                assert!(name.is_none(), "outbound offers carry no display name");
            }
            other => panic!("expected outbound offer, got {:?}", other),
        }

        // The relay was asked for connectivity servers and they reached the engine.
        let seen = engine.ice_servers_seen();
        assert_eq!(seen.len(), 1);
        assert!(!seen[0].is_empty());
    }

    #[tokio::test]
    async fn test_remote_answer_completes_negotiation() {
        let (session, engine, transport) = start_session().await;
        let mut errors = session.subscribe(EventKind::ClientError);

        transport.push_inbound(remote_login());
        settle().await;
        assert!(session.acquire_local_media().await);
        assert!(session.join_room().await);

        transport.push_inbound(SignalMessage::Answer {
            answer: SessionDescription::answer("v=0\r\nremote-answer"),
            peer: None,
        });
        settle().await;

        assert_eq!(session.negotiation_state().await, NegotiationState::Active);
        let peer = engine.last_peer().expect("peer link exists");
        assert_eq!(peer.remote_descriptions().len(), 1);
        assert_eq!(peer.remote_descriptions()[0].sdp, "v=0\r\nremote-answer");
        assert!(errors.poll().is_none(), "happy path should emit no errors");
    }

    #[tokio::test]
    async fn test_inbound_offer_is_answered() {
        let (session, engine, transport) = start_session().await;
        let mut offers = session.subscribe(EventKind::OfferReceived);

        assert!(session.acquire_local_media().await);
        transport.push_inbound(SignalMessage::Offer {
            offer: SessionDescription::offer("v=0\r\ncaller-offer"),
            peer: "remote-peer".to_string(),
            name: Some("Bob".to_string()),
        });
        settle().await;

        assert_eq!(session.negotiation_state().await, NegotiationState::Active);

        let peer = engine.last_peer().expect("peer connection created");
        assert_eq!(peer.answers(), 1);
        assert_eq!(
            peer.remote_descriptions().len(),
            1,
            "the caller's offer should be applied as the remote description"
        );
        assert!(peer.has_local_tracks());

        match transport.last_sent() {
            Some(SignalMessage::Answer { peer, .. }) => {
                assert_eq!(peer.as_deref(), Some("remote-peer"));
            }
            other => panic!("expected outbound answer, got {:?}", other),
        }

        // The offer's sender metadata doubles as the membership record.
        let remote = session.remote_peer().await.expect("remote recorded");
        assert_eq!(remote.display_name.as_deref(), Some("Bob"));
        match offers.poll() {
            Some(CallEvent::OfferReceived { peer }) => assert_eq!(peer.peer_id, "remote-peer"),
            other => panic!("expected offerReceived, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_offer_before_media_is_rejected() {
        let (session, engine, transport) = start_session().await;
        let mut errors = session.subscribe(EventKind::ClientError);

        transport.push_inbound(SignalMessage::Offer {
            offer: SessionDescription::offer("v=0\r\nearly"),
            peer: "remote-peer".to_string(),
            name: None,
        });
        settle().await;

        assert_eq!(
            engine.connect_count(),
            0,
            "no peer connection should be attempted without local media"
        );
        assert!(
            transport.sent().is_empty(),
            "no answer should go out for a rejected offer"
        );
        match errors.poll() {
            Some(CallEvent::ClientError { reason, .. }) => {
                assert!(reason.contains("local media"), "got reason: {}", reason);
            }
            other => panic!("expected clientError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_remote_hangup_tears_down_but_keeps_membership() {
        let (session, engine, transport) = start_session().await;
        let mut hangups = session.subscribe(EventKind::PeerHangUp);

        transport.push_inbound(remote_login());
        settle().await;
        assert!(session.acquire_local_media().await);
        assert!(session.join_room().await);
        let peer = engine.last_peer().expect("link established");
        let capture = engine.last_capture().expect("capture acquired");

        transport.push_inbound(SignalMessage::Leave { peer: None });
        settle().await;

        assert!(peer.is_detached(), "handlers must be detached on teardown");
        assert!(peer.is_closed(), "peer link must be closed on teardown");
        assert!(capture.is_stopped(), "local tracks stop when the call ends");
        assert!(
            session.remote_peer().await.is_some(),
            "hangup ends the call, not the room membership"
        );
        assert_eq!(
            session.negotiation_state().await,
            NegotiationState::PeerKnown
        );
        assert!(matches!(hangups.poll(), Some(CallEvent::PeerHangUp)));
    }

    #[tokio::test]
    async fn test_peer_left_clears_membership() {
        let (session, engine, transport) = start_session().await;
        let mut hangups = session.subscribe(EventKind::PeerHangUp);
        let mut joined = session.subscribe(EventKind::PeerJoined);

        transport.push_inbound(remote_login());
        settle().await;
        assert!(session.acquire_local_media().await);
        assert!(session.join_room().await);

        transport.push_inbound(SignalMessage::PeerLeft);
        settle().await;

        let peer = engine.last_peer().expect("link existed");
        assert!(peer.is_closed());
        assert!(session.remote_peer().await.is_none());
        assert_eq!(session.negotiation_state().await, NegotiationState::Idle);
        assert!(matches!(hangups.poll(), Some(CallEvent::PeerHangUp)));

        // Arrival event first, then the departure notification.
        assert!(joined.poll().is_some());
        match joined.poll() {
            Some(CallEvent::PeerJoined { display_name }) => assert!(display_name.is_none()),
            other => panic!("expected empty peerJoined, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_peer_left_without_link_emits_no_hangup() {
        let (session, _engine, transport) = start_session().await;
        let mut hangups = session.subscribe(EventKind::PeerHangUp);

        transport.push_inbound(remote_login());
        settle().await;
        transport.push_inbound(SignalMessage::PeerLeft);
        settle().await;

        assert!(hangups.poll().is_none(), "no call was live, so no hangup");
        assert_eq!(session.negotiation_state().await, NegotiationState::Idle);
    }

    #[tokio::test]
    async fn test_leave_room_announces_and_tears_down() {
        let (session, engine, transport) = start_session().await;

        transport.push_inbound(remote_login());
        settle().await;
        assert!(session.acquire_local_media().await);
        assert!(session.join_room().await);

        assert!(session.leave_room().await, "leave always reports success");

        match transport.last_sent() {
            Some(SignalMessage::Leave { peer }) => {
                assert_eq!(peer.as_deref(), Some("remote-peer"));
            }
            other => panic!("expected outbound leave, got {:?}", other),
        }
        let peer = engine.last_peer().expect("link existed");
        assert!(peer.is_detached());
        assert!(peer.is_closed());
        assert!(session.remote_peer().await.is_none());
        assert_eq!(session.negotiation_state().await, NegotiationState::Idle);
    }

    #[tokio::test]
    async fn test_leave_room_survives_send_failure() {
        let (session, engine, transport) = start_session().await;
        let mut errors = session.subscribe(EventKind::ClientError);

        transport.push_inbound(remote_login());
        settle().await;
        assert!(session.acquire_local_media().await);
        assert!(session.join_room().await);

        transport.fail_next_send();
        assert!(
            session.leave_room().await,
            "teardown must run even when the announcement cannot be sent"
        );

        let peer = engine.last_peer().expect("link existed");
        assert!(peer.is_closed());
        assert_eq!(session.negotiation_state().await, NegotiationState::Idle);
        match errors.poll() {
            Some(CallEvent::ClientError { reason, .. }) => {
                assert!(reason.contains("leave"), "got reason: {}", reason);
            }
            other => panic!("expected clientError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_candidate_without_link_is_discarded() {
        let (session, engine, transport) = start_session().await;
        let mut errors = session.subscribe(EventKind::ClientError);

        transport.push_inbound(SignalMessage::Candidate {
            candidate: sample_candidate(),
            peer: None,
        });
        settle().await;

        assert_eq!(engine.connect_count(), 0);
        assert!(errors.poll().is_none(), "early candidates are logged, not evented");
        assert_eq!(session.negotiation_state().await, NegotiationState::Idle);
    }

    #[tokio::test]
    async fn test_candidate_applies_to_live_link() {
        let (session, engine, transport) = start_session().await;

        assert!(session.acquire_local_media().await);
        transport.push_inbound(SignalMessage::Offer {
            offer: SessionDescription::offer("v=0\r\ncaller"),
            peer: "remote-peer".to_string(),
            name: None,
        });
        settle().await;

        transport.push_inbound(SignalMessage::Candidate {
            candidate: sample_candidate(),
            peer: None,
        });
        settle().await;

        let peer = engine.last_peer().expect("link exists");
        assert_eq!(peer.candidates().len(), 1);
        assert_eq!(peer.candidates()[0].sdp_mid.as_deref(), Some("0"));
    }

    #[tokio::test]
    async fn test_answer_without_link_is_discarded() {
        let (session, engine, transport) = start_session().await;
        let mut errors = session.subscribe(EventKind::ClientError);

        transport.push_inbound(SignalMessage::Answer {
            answer: SessionDescription::answer("v=0\r\nstray"),
            peer: None,
        });
        settle().await;

        assert_eq!(engine.connect_count(), 0);
        assert!(errors.poll().is_none());
    }

    #[tokio::test]
    async fn test_notify_and_error_surface_as_server_errors() {
        let (session, _engine, transport) = start_session().await;
        let mut server_errors = session.subscribe(EventKind::ServerError);

        transport.push_inbound(SignalMessage::Notify {
            notification: "room is full".to_string(),
        });
        transport.push_inbound(SignalMessage::Error {
            reason: "unknown room".to_string(),
        });
        settle().await;

        match server_errors.poll() {
            Some(CallEvent::ServerError { reason, .. }) => assert_eq!(reason, "room is full"),
            other => panic!("expected serverError, got {:?}", other),
        }
        match server_errors.poll() {
            Some(CallEvent::ServerError { reason, .. }) => assert_eq!(reason, "unknown room"),
            other => panic!("expected serverError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_information_payload_passes_through() {
        let (session, _engine, transport) = start_session().await;
        let mut info = session.subscribe(EventKind::Information);

        transport.push_inbound(SignalMessage::Information {
            peer: None,
            msg: serde_json::json!({"mute": true}),
        });
        settle().await;

        match info.poll() {
            Some(CallEvent::Information { payload }) => {
                assert_eq!(payload["mute"], serde_json::json!(true));
            }
            other => panic!("expected information event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_message_is_ignored() {
        let (session, engine, transport) = start_session().await;
        let mut all = session.subscribe_all();

        transport.push_inbound(SignalMessage::Unknown);
        settle().await;

        assert!(all.poll().is_none());
        assert_eq!(engine.connect_count(), 0);
        assert_eq!(session.negotiation_state().await, NegotiationState::Idle);
    }

    #[tokio::test]
    async fn test_membership_flip_while_active_tears_down() {
        let (session, engine, transport) = start_session().await;
        let mut hangups = session.subscribe(EventKind::PeerHangUp);

        transport.push_inbound(remote_login());
        settle().await;
        assert!(session.acquire_local_media().await);
        assert!(session.join_room().await);
        let first_peer = engine.last_peer().expect("first link");

        // The room now names a different remote while our link is live.
        transport.push_inbound(SignalMessage::Login {
            details: Some(PeerInfo::new("other-peer", "Carol")),
        });
        settle().await;

        assert!(first_peer.is_closed(), "stale link must not survive");
        assert!(matches!(hangups.poll(), Some(CallEvent::PeerHangUp)));
        assert_eq!(
            session.negotiation_state().await,
            NegotiationState::PeerKnown
        );
        let remote = session.remote_peer().await.expect("new remote recorded");
        assert_eq!(remote.peer_id, "other-peer");
    }

    #[tokio::test]
    async fn test_engine_candidate_is_relayed_outbound() {
        let (session, engine, transport) = start_session().await;

        assert!(session.acquire_local_media().await);
        transport.push_inbound(SignalMessage::Offer {
            offer: SessionDescription::offer("v=0\r\ncaller"),
            peer: "remote-peer".to_string(),
            name: None,
        });
        settle().await;

        assert!(engine.emit(crabcall::engine::EngineEvent::CandidateDiscovered {
            generation: 1,
            candidate: sample_candidate(),
        }));
        settle().await;

        let kinds = transport.sent_kinds();
        assert!(
            kinds.contains(&"candidate"),
            "discovered candidate should be trickled to the relay, sent: {:?}",
            kinds
        );
        match transport.last_sent() {
            Some(SignalMessage::Candidate { peer, .. }) => {
                assert_eq!(peer.as_deref(), Some("remote-peer"));
            }
            other => panic!("expected outbound candidate, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stale_engine_event_is_dropped() {
        let (session, engine, transport) = start_session().await;

        assert!(session.acquire_local_media().await);
        transport.push_inbound(SignalMessage::Offer {
            offer: SessionDescription::offer("v=0\r\ncaller"),
            peer: "remote-peer".to_string(),
            name: None,
        });
        settle().await;
        let before = transport.sent().len();

        // Generation 0 never existed; the event must not reach the relay.
        assert!(engine.emit(crabcall::engine::EngineEvent::CandidateDiscovered {
            generation: 0,
            candidate: sample_candidate(),
        }));
        settle().await;

        assert_eq!(transport.sent().len(), before);
    }

    #[tokio::test]
    async fn test_received_track_becomes_remote_stream() {
        let (session, engine, transport) = start_session().await;
        let mut streams = session.subscribe(EventKind::RemoteStreamReady);

        assert!(session.acquire_local_media().await);
        transport.push_inbound(SignalMessage::Offer {
            offer: SessionDescription::offer("v=0\r\ncaller"),
            peer: "remote-peer".to_string(),
            name: None,
        });
        settle().await;

        assert!(engine.emit(crabcall::engine::EngineEvent::TrackReceived {
            generation: 1,
            track: crabcall::types::TrackInfo {
                id: "t-audio".to_string(),
                kind: crabcall::types::TrackKind::Audio,
            },
            stream_id: Some("remote-stream".to_string()),
        }));
        settle().await;

        match streams.poll() {
            Some(CallEvent::RemoteStreamReady(stream)) => {
                assert_eq!(stream.stream_id, "remote-stream");
                assert_eq!(stream.tracks.len(), 1);
                assert!(!stream.constructed);
            }
            other => panic!("expected remoteStreamReady, got {:?}", other),
        }
        let remote = session.remote_media().await.expect("remote stream recorded");
        assert!(remote.has_kind(crabcall::types::TrackKind::Audio));
    }
}
