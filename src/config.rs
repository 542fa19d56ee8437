//! Configuration management for crabcall
//!
//! Provides configuration loading, saving, and validation for relay
//! endpoints, session identity, connectivity servers, and media selection.

use crate::errors::CallError;
use crate::types::{generate_peer_id, generate_session_id, IceServerInfo};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallConfig {
    pub signaling: SignalingConfig,
    pub session: SessionIdentityConfig,
    pub ice: IceConfig,
    pub media: MediaConfig,
}

/// Relay endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingConfig {
    /// Relay endpoint URL (ws://, wss://, http:// or https://)
    pub endpoint: String,
    /// Timeout for request/response queries in milliseconds
    pub request_timeout_ms: u64,
}

/// Identity for this participant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionIdentityConfig {
    /// Room identifier; generated when absent
    #[serde(default)]
    pub session_id: Option<String>,
    /// Local peer identifier; generated when absent
    #[serde(default)]
    pub peer_id: Option<String>,
    /// Name shown to the remote peer
    pub display_name: String,
    /// Application-defined tag, opaque to the core
    #[serde(default)]
    pub role: String,
}

/// Connectivity-server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceConfig {
    /// Servers used when the relay is not asked for them (answering side,
    /// or when `fetch_from_relay` is off)
    pub servers: Vec<IceServerInfo>,
    /// Ask the relay for connectivity servers before offering
    pub fetch_from_relay: bool,
}

/// Local capture selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Capture a microphone track
    pub audio: bool,
    /// Capture a camera track
    pub video: bool,
    /// Stream label local tracks are grouped under
    pub stream_label: String,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            signaling: SignalingConfig {
                endpoint: "ws://127.0.0.1:4443".to_string(),
                request_timeout_ms: 10_000,
            },
            session: SessionIdentityConfig {
                session_id: None,
                peer_id: None,
                display_name: "Anonymous".to_string(),
                role: String::new(),
            },
            ice: IceConfig {
                servers: vec![IceServerInfo::stun("stun:stun.l.google.com:19302")],
                fetch_from_relay: true,
            },
            media: MediaConfig {
                audio: true,
                video: true,
                stream_label: "crabcall".to_string(),
            },
        }
    }
}

impl CallConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, CallError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).map_err(|e| {
            CallError::invalid_argument(format!("Failed to read config file: {}", e))
        })?;

        let config: CallConfig = toml::from_str(&contents).map_err(|e| {
            CallError::invalid_argument(format!("Failed to parse config file: {}", e))
        })?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), CallError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                CallError::invalid_argument(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(self).map_err(|e| {
            CallError::invalid_argument(format!("Failed to serialize config: {}", e))
        })?;

        fs::write(path, toml_string).map_err(|e| {
            CallError::invalid_argument(format!("Failed to write config file: {}", e))
        })?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("crabcall.toml")
    }

    /// Load from default location or create with defaults
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Fill in absent session/peer identifiers with generated ones and
    /// return the effective pair.
    pub fn ensure_identity(&mut self) -> (String, String) {
        let session_id = self
            .session
            .session_id
            .get_or_insert_with(generate_session_id)
            .clone();
        let peer_id = self
            .session
            .peer_id
            .get_or_insert_with(generate_peer_id)
            .clone();
        (session_id, peer_id)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.signaling.endpoint.is_empty() {
            return Err("Relay endpoint must not be empty".to_string());
        }
        let has_scheme = ["ws://", "wss://", "http://", "https://"]
            .iter()
            .any(|scheme| self.signaling.endpoint.starts_with(scheme));
        if !has_scheme {
            return Err("Relay endpoint must use ws, wss, http or https".to_string());
        }
        if self.signaling.request_timeout_ms == 0 || self.signaling.request_timeout_ms > 120_000 {
            return Err("Request timeout must be between 1 and 120000 ms".to_string());
        }

        if self.session.display_name.is_empty() {
            return Err("Display name must not be empty".to_string());
        }
        if let Some(session_id) = &self.session.session_id {
            if session_id.is_empty() {
                return Err("Session id must not be empty when set".to_string());
            }
        }

        for server in &self.ice.servers {
            if server.urls.is_empty() {
                return Err("Connectivity server entry has no urls".to_string());
            }
        }

        if !self.media.audio && !self.media.video {
            return Err("At least one of audio or video capture must be enabled".to_string());
        }
        if self.media.stream_label.is_empty() {
            return Err("Stream label must not be empty".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CallConfig::default();
        assert!(config.signaling.endpoint.starts_with("ws://"));
        assert!(config.media.audio);
        assert!(config.media.video);
        assert!(config.ice.fetch_from_relay);
    }

    #[test]
    fn test_config_validation() {
        let config = CallConfig::default();
        assert!(config.validate().is_ok());

        let mut bad_endpoint = config.clone();
        bad_endpoint.signaling.endpoint = "ftp://relay".to_string();
        assert!(bad_endpoint.validate().is_err());

        let mut no_media = CallConfig::default();
        no_media.media.audio = false;
        no_media.media.video = false;
        assert!(no_media.validate().is_err());

        let mut blank_name = CallConfig::default();
        blank_name.session.display_name = String::new();
        assert!(blank_name.validate().is_err());
    }

    #[test]
    fn test_ensure_identity_fills_blanks() {
        let mut config = CallConfig::default();
        assert!(config.session.session_id.is_none());
        assert!(config.session.peer_id.is_none());

        let (session_id, peer_id) = config.ensure_identity();
        assert_eq!(config.session.session_id.as_deref(), Some(session_id.as_str()));
        assert_eq!(config.session.peer_id.as_deref(), Some(peer_id.as_str()));

        // Already-set identifiers are kept
        let again = config.ensure_identity();
        assert_eq!(again, (session_id, peer_id));
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = std::env::temp_dir();
        let config_path = temp_dir.join("test_crabcall.toml");

        // Clean up any existing test file
        let _ = fs::remove_file(&config_path);

        let config = CallConfig::default();
        assert!(config.save_to_file(&config_path).is_ok());

        let loaded = CallConfig::load_from_file(&config_path).unwrap();
        assert_eq!(loaded.signaling.endpoint, config.signaling.endpoint);
        assert_eq!(loaded.media.stream_label, config.media.stream_label);

        // Clean up
        let _ = fs::remove_file(&config_path);
    }

    #[test]
    fn test_config_toml_format() {
        let config = CallConfig::default();
        let toml_string = toml::to_string_pretty(&config).unwrap();

        assert!(toml_string.contains("[signaling]"));
        assert!(toml_string.contains("[session]"));
        assert!(toml_string.contains("[ice]"));
        assert!(toml_string.contains("[media]"));
        assert!(toml_string.contains("endpoint"));
        assert!(toml_string.contains("stream_label"));
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = CallConfig::load_from_file("nonexistent_file.toml");
        assert!(result.is_ok()); // Should return default
        assert!(result.unwrap().media.audio);
    }
}
