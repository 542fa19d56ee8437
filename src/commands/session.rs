use crate::config::CallConfig;
use crate::events::{CallEvent, EventSubscription};
use crate::signaling::message::SignalMessage;
use crate::signaling::session::CallSession;
use crate::types::{NegotiationState, SessionStats};
use std::collections::HashMap;
use std::sync::Arc;
use tauri::command;
use tokio::sync::{Mutex, RwLock};

// Global call session state management
lazy_static::lazy_static! {
    static ref SESSIONS: RwLock<HashMap<String, Arc<SessionEntry>>> = RwLock::new(HashMap::new());
}

struct SessionEntry {
    session: CallSession,
    events: Mutex<EventSubscription>,
}

async fn entry(session_id: &str) -> Result<Arc<SessionEntry>, String> {
    let sessions = SESSIONS.read().await;
    sessions
        .get(session_id)
        .cloned()
        .ok_or_else(|| format!("No call session {}", session_id))
}

/// Connect to the signaling relay and register a new call session.
/// Uses the global configuration when none is provided.
#[command]
pub async fn create_call_session(config: Option<CallConfig>) -> Result<SessionStats, String> {
    let config = match config {
        Some(config) => config,
        None => super::config::current_config()?,
    };

    let session = CallSession::connect(config).await.map_err(|e| {
        log::error!("Failed to create call session: {}", e);
        e.to_string()
    })?;
    let events = Mutex::new(session.subscribe_all());
    let session_id = session.id().to_string();
    let stats = session.stats().await;

    {
        let mut sessions = SESSIONS.write().await;
        if sessions.contains_key(&session_id) {
            session.close().await;
            return Err(format!("Call session {} already exists", session_id));
        }
        sessions.insert(session_id.clone(), Arc::new(SessionEntry { session, events }));
    }

    log::info!("Call session {} created", session_id);
    Ok(stats)
}

/// Acquire local capture for a session
#[command]
pub async fn acquire_local_media(session_id: String) -> Result<bool, String> {
    let entry = entry(&session_id).await?;
    Ok(entry.session.acquire_local_media().await)
}

/// Offer a call to the remote peer in the room
#[command]
pub async fn join_room(session_id: String) -> Result<bool, String> {
    log::info!("Joining call in room {}", session_id);
    let entry = entry(&session_id).await?;
    Ok(entry.session.join_room().await)
}

/// Hang up and announce departure
#[command]
pub async fn leave_room(session_id: String) -> Result<bool, String> {
    log::info!("Leaving call in room {}", session_id);
    let entry = entry(&session_id).await?;
    Ok(entry.session.leave_room().await)
}

/// Forward a raw signaling message to the relay
#[command]
pub async fn send_signal_message(
    session_id: String,
    message: SignalMessage,
) -> Result<(), String> {
    let entry = entry(&session_id).await?;
    entry.session.send(&message).await;
    Ok(())
}

/// Send an opaque application payload to the remote peer
#[command]
pub async fn send_information(
    session_id: String,
    payload: serde_json::Value,
) -> Result<bool, String> {
    let entry = entry(&session_id).await?;
    Ok(entry.session.send_directed(payload).await)
}

/// Next queued session event, without waiting
#[command]
pub async fn poll_call_event(session_id: String) -> Result<Option<CallEvent>, String> {
    let entry = entry(&session_id).await?;
    let mut events = entry.events.lock().await;
    Ok(events.poll())
}

/// Wait for the next session event
#[command]
pub async fn wait_for_call_event(session_id: String) -> Result<Option<CallEvent>, String> {
    let entry = entry(&session_id).await?;
    let mut events = entry.events.lock().await;
    Ok(events.wait().await)
}

/// Diagnostic snapshot of one session
#[command]
pub async fn get_call_stats(session_id: String) -> Result<SessionStats, String> {
    let entry = entry(&session_id).await?;
    Ok(entry.session.stats().await)
}

/// Current negotiation state of one session
#[command]
pub async fn get_negotiation_state(session_id: String) -> Result<NegotiationState, String> {
    let entry = entry(&session_id).await?;
    Ok(entry.session.negotiation_state().await)
}

/// Diagnostic snapshots of every registered session
#[command]
pub async fn list_call_sessions() -> Result<Vec<SessionStats>, String> {
    let sessions = SESSIONS.read().await;
    let entries: Vec<Arc<SessionEntry>> = sessions.values().cloned().collect();
    drop(sessions);

    let mut stats = Vec::with_capacity(entries.len());
    for entry in entries {
        stats.push(entry.session.stats().await);
    }
    Ok(stats)
}

/// Close a session and remove it from the registry
#[command]
pub async fn close_call_session(session_id: String) -> Result<(), String> {
    let removed = {
        let mut sessions = SESSIONS.write().await;
        sessions.remove(&session_id)
    };
    match removed {
        Some(entry) => {
            entry.session.close().await;
            log::info!("Call session {} closed", session_id);
            Ok(())
        }
        None => Err(format!("No call session {}", session_id)),
    }
}
