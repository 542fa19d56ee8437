//! Tests for CrabCall core types
//!
//! Ensures type safety and correct wire behavior of fundamental data structures.

use crabcall::types::{
    generate_peer_id, generate_session_id, CandidateInfo, IceServerInfo, MediaStreamInfo,
    NegotiationState, PeerInfo, SdpKind, SessionDescription, SessionStats, TrackInfo, TrackKind,
};
use serde_json::json;

#[cfg(test)]
mod identity_tests {
    use super::*;

    #[test]
    fn test_peer_info_wire_casing() {
        let peer = PeerInfo::new("peer-1", "Alice");
        let value = serde_json::to_value(&peer).unwrap();
        assert_eq!(value["peerId"], json!("peer-1"));
        assert_eq!(value["displayName"], json!("Alice"));

        let parsed: PeerInfo =
            serde_json::from_str(r#"{"peerId":"peer-2"}"#).expect("displayName is optional");
        assert_eq!(parsed.peer_id, "peer-2");
        assert!(parsed.display_name.is_none());
    }

    #[test]
    fn test_generated_identifiers() {
        let peer_id = generate_peer_id();
        assert_eq!(peer_id.len(), 36, "peer ids are uuids");
        assert_ne!(peer_id, generate_peer_id());

        for _ in 0..20 {
            let session_id = generate_session_id();
            assert_eq!(session_id.len(), 6, "room ids read like short codes");
            assert!(session_id.chars().all(|c| c.is_ascii_digit()));
        }
    }
}

#[cfg(test)]
mod description_tests {
    use super::*;

    #[test]
    fn test_session_description_wire_shape() {
        let offer = SessionDescription::offer("v=0\r\nsdp-body");
        assert_eq!(offer.kind, SdpKind::Offer);

        let value = serde_json::to_value(&offer).unwrap();
        assert_eq!(value["type"], json!("offer"));
        assert_eq!(value["sdp"], json!("v=0\r\nsdp-body"));

        let answer: SessionDescription =
            serde_json::from_str(r#"{"type":"answer","sdp":"v=0"}"#).unwrap();
        assert_eq!(answer.kind, SdpKind::Answer);
    }

    #[test]
    fn test_candidate_round_trip() {
        let original = CandidateInfo {
            candidate: "candidate:1 1 udp 2130706431 192.0.2.5 50000 typ host".to_string(),
            sdp_mid: Some("audio".to_string()),
            sdp_mline_index: Some(1),
            username_fragment: None,
        };
        let text = serde_json::to_string(&original).unwrap();
        assert!(text.contains("sdpMid"));
        assert!(text.contains("sdpMLineIndex"));

        let parsed: CandidateInfo = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_ice_server_stun_constructor() {
        let server = IceServerInfo::stun("stun:stun.example.org:3478");
        assert_eq!(server.urls, vec!["stun:stun.example.org:3478"]);
        assert!(server.username.is_none());
        assert!(server.credential.is_none());

        // TURN entries carry credentials through untouched.
        let turn: IceServerInfo = serde_json::from_str(
            r#"{"urls":["turn:turn.example.org"],"username":"u","credential":"c"}"#,
        )
        .unwrap();
        assert_eq!(turn.username.as_deref(), Some("u"));
    }
}

#[cfg(test)]
mod media_tests {
    use super::*;

    #[test]
    fn test_track_kinds() {
        assert_eq!(TrackKind::Audio.as_str(), "audio");
        assert_eq!(TrackKind::Video.as_str(), "video");
        assert_eq!(
            serde_json::to_value(TrackKind::Audio).unwrap(),
            json!("audio")
        );
    }

    #[test]
    fn test_media_stream_info_has_kind() {
        let mut stream = MediaStreamInfo::new("s-1");
        assert!(!stream.has_kind(TrackKind::Audio));

        stream.tracks.push(TrackInfo {
            id: "t1".to_string(),
            kind: TrackKind::Video,
        });
        assert!(stream.has_kind(TrackKind::Video));
        assert!(!stream.has_kind(TrackKind::Audio));

        let value = serde_json::to_value(&stream).unwrap();
        assert_eq!(value["streamId"], json!("s-1"));
        assert_eq!(value["constructed"], json!(false));
    }
}

#[cfg(test)]
mod state_tests {
    use super::*;

    #[test]
    fn test_negotiation_state_names() {
        let cases = [
            (NegotiationState::Idle, "idle"),
            (NegotiationState::PeerKnown, "peer_known"),
            (NegotiationState::Offering, "offering"),
            (NegotiationState::Answering, "answering"),
            (NegotiationState::Active, "active"),
            (NegotiationState::Leaving, "leaving"),
            (NegotiationState::Closed, "closed"),
        ];
        for (state, expected) in cases {
            assert_eq!(state.as_str(), expected);
            assert_eq!(state.to_string(), expected);
            assert_eq!(serde_json::to_value(state).unwrap(), json!(expected));
        }
    }

    #[test]
    fn test_session_stats_serialization() {
        let stats = SessionStats {
            session_id: "123456".to_string(),
            local_peer_id: generate_peer_id(),
            state: NegotiationState::Idle,
            remote_peer: None,
            has_peer_link: false,
            has_local_media: false,
            has_remote_media: false,
            created_at: chrono::Utc::now(),
        };
        let value = serde_json::to_value(&stats).unwrap();
        assert_eq!(value["sessionId"], json!("123456"));
        assert_eq!(value["state"], json!("idle"));
        assert_eq!(value["hasPeerLink"], json!(false));
        assert!(value["createdAt"].is_string());
    }
}
