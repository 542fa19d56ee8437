#[cfg(test)]
mod commands_config_tests {
    use crabcall::commands::config::{get_call_config, get_media_config, get_signaling_config};

    #[tokio::test]
    async fn test_get_call_config_returns_valid_config() {
        let config = get_call_config().await.expect("config should load");
        assert!(config.validate().is_ok(), "the served config must be valid");
        assert!(
            config.signaling.endpoint.starts_with("ws://")
                || config.signaling.endpoint.starts_with("wss://")
                || config.signaling.endpoint.starts_with("http://")
                || config.signaling.endpoint.starts_with("https://"),
            "endpoint should be a URL, got: {}",
            config.signaling.endpoint
        );
    }

    #[tokio::test]
    async fn test_section_getters_agree_with_full_config() {
        let full = get_call_config().await.expect("config should load");
        let signaling = get_signaling_config().await.expect("section should load");
        let media = get_media_config().await.expect("section should load");

        assert_eq!(signaling.endpoint, full.signaling.endpoint);
        assert_eq!(signaling.request_timeout_ms, full.signaling.request_timeout_ms);
        assert_eq!(media.audio, full.media.audio);
        assert_eq!(media.video, full.media.video);
        assert_eq!(media.stream_label, full.media.stream_label);
    }
}

#[cfg(test)]
mod commands_session_tests {
    use crabcall::commands::session::{
        acquire_local_media, close_call_session, get_call_stats, get_negotiation_state, join_room,
        leave_room, list_call_sessions, poll_call_event, send_information,
    };

    #[tokio::test]
    async fn test_unknown_session_is_reported_by_name() {
        let result = get_call_stats("no-such-room".to_string()).await;
        match result {
            Err(error) => {
                assert!(
                    error.contains("no-such-room"),
                    "error should name the session: {}",
                    error
                );
                assert!(error.contains("No call session"), "got: {}", error);
            }
            Ok(_) => panic!("stats for an unknown session must fail"),
        }
    }

    #[tokio::test]
    async fn test_commands_require_existing_session() {
        assert!(acquire_local_media("missing".to_string()).await.is_err());
        assert!(join_room("missing".to_string()).await.is_err());
        assert!(leave_room("missing".to_string()).await.is_err());
        assert!(poll_call_event("missing".to_string()).await.is_err());
        assert!(get_negotiation_state("missing".to_string()).await.is_err());
        assert!(close_call_session("missing".to_string()).await.is_err());
        assert!(
            send_information("missing".to_string(), serde_json::json!({"x": 1}))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_list_call_sessions_succeeds_when_empty() {
        let listed = list_call_sessions().await.expect("listing should work");
        for stats in &listed {
            assert!(!stats.session_id.is_empty());
        }
    }
}
