use crate::config::CallConfig;
use std::sync::{Arc, RwLock};
use tauri::command;

lazy_static::lazy_static! {
    static ref GLOBAL_CONFIG: Arc<RwLock<CallConfig>> = Arc::new(RwLock::new(CallConfig::load_or_default()));
}

/// Snapshot of the global configuration for other command modules.
pub(crate) fn current_config() -> Result<CallConfig, String> {
    let config = GLOBAL_CONFIG.read().map_err(|e| e.to_string())?;
    Ok(config.clone())
}

/// Get the current configuration
#[command]
pub async fn get_call_config() -> Result<CallConfig, String> {
    current_config()
}

/// Update configuration
#[command]
pub async fn update_call_config(new_config: CallConfig) -> Result<(), String> {
    // Validate first
    new_config.validate().map_err(|e| e.to_string())?;

    {
        let mut config = GLOBAL_CONFIG.write().map_err(|e| e.to_string())?;
        *config = new_config.clone();
    }

    // Save to file
    new_config
        .save_to_file(CallConfig::default_path())
        .map_err(|e| e.to_string())?;

    Ok(())
}

/// Reset configuration to defaults
#[command]
pub async fn reset_call_config() -> Result<CallConfig, String> {
    let default_config = CallConfig::default();

    {
        let mut config = GLOBAL_CONFIG
            .write()
            .map_err(|e| format!("Failed to write config: {}", e))?;
        *config = default_config.clone();
    }

    // Save defaults to file
    default_config
        .save_to_file(CallConfig::default_path())
        .map_err(|e| e.to_string())?;

    Ok(default_config)
}

/// Get the signaling section of the configuration
#[command]
pub async fn get_signaling_config() -> Result<crate::config::SignalingConfig, String> {
    let config = GLOBAL_CONFIG.read().map_err(|e| e.to_string())?;
    Ok(config.signaling.clone())
}

/// Get the media section of the configuration
#[command]
pub async fn get_media_config() -> Result<crate::config::MediaConfig, String> {
    let config = GLOBAL_CONFIG.read().map_err(|e| e.to_string())?;
    Ok(config.media.clone())
}
