//! CrabCall: Two-party WebRTC call signaling for Tauri applications
//!
//! This crate connects to a signaling relay over WebSocket, pairs with a
//! single remote peer in a named room, and drives WebRTC offer/answer
//! negotiation with trickle ICE.
//!
//! # Features
//! - Room-based pairing over a WebSocket signaling relay
//! - Offer/answer negotiation with trickle ICE exchange
//! - Memoized local capture shared across successive calls
//! - Thread-safe session management
//! - Typed call events for frontend consumption
//!
//! # Usage
//! Add this to your `Cargo.toml`:
//! ```toml
//! [dependencies]
//! crabcall = "0.1"
//! tauri = "2.0"
//! ```
//!
//! Then in your Tauri app:
//! ```rust,ignore
//! use crabcall;
//!
//! fn main() {
//!     tauri::Builder::default()
//!         .plugin(crabcall::init())
//!         .run(tauri::generate_context!())
//!         .expect("error while running tauri application");
//! }
//! ```
pub mod commands;
pub mod config;
pub mod engine;
pub mod errors;
pub mod events;
pub mod signaling;
pub mod transport;
pub mod types;

// Testing utilities - mock engine and transport for offline testing
pub mod testing;

// Re-exports for convenience
pub use config::CallConfig;
pub use errors::{CallError, CallErrorKind};
pub use events::{CallEvent, EventKind, EventSubscription};
pub use signaling::{CallSession, Session, SignalMessage};
pub use types::{
    MediaStreamInfo, NegotiationState, PeerInfo, SessionDescription, SessionStats, TrackKind,
};

use tauri::{
    plugin::{Builder, TauriPlugin},
    Runtime,
};

/// Initialize the CrabCall plugin with all commands
pub fn init<R: Runtime>() -> TauriPlugin<R> {
    Builder::new("crabcall")
        .invoke_handler(tauri::generate_handler![
            // Session lifecycle commands
            commands::session::create_call_session,
            commands::session::acquire_local_media,
            commands::session::join_room,
            commands::session::leave_room,
            commands::session::close_call_session,
            commands::session::list_call_sessions,
            // Messaging commands
            commands::session::send_signal_message,
            commands::session::send_information,
            // Event commands
            commands::session::poll_call_event,
            commands::session::wait_for_call_event,
            // Inspection commands
            commands::session::get_call_stats,
            commands::session::get_negotiation_state,
            // Configuration commands
            commands::config::get_call_config,
            commands::config::update_call_config,
            commands::config::reset_call_config,
            commands::config::get_signaling_config,
            commands::config::get_media_config,
        ])
        .build()
}

/// Initialize logging for the call system
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "crabcall=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}
