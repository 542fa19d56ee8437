//! Application-facing call events and the session-owned event bus.
//!
//! The session has a bus rather than being one: subscribers register per
//! event kind (or for everything) and receive events over unbounded channels.

use crate::types::{MediaStreamInfo, PeerInfo};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Event kinds, addressable for subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    LocalStreamReady,
    RemoteStreamReady,
    PeerJoined,
    PeerHangUp,
    OfferReceived,
    Information,
    ServerError,
    ClientError,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::LocalStreamReady => "localStreamReady",
            EventKind::RemoteStreamReady => "remoteStreamReady",
            EventKind::PeerJoined => "peerJoined",
            EventKind::PeerHangUp => "peerHangUp",
            EventKind::OfferReceived => "offerReceived",
            EventKind::Information => "information",
            EventKind::ServerError => "serverError",
            EventKind::ClientError => "clientError",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Events emitted by the negotiation core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "payload",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum CallEvent {
    /// Local capture is ready and attached to the session.
    LocalStreamReady(MediaStreamInfo),
    /// Remote media arrived (may fire once per received track).
    RemoteStreamReady(MediaStreamInfo),
    /// Room membership changed. `display_name` is absent when the room
    /// holds no remote peer.
    PeerJoined { display_name: Option<String> },
    /// The remote peer ended the call or departed.
    PeerHangUp,
    /// An inbound offer was accepted and is being answered.
    OfferReceived { peer: PeerInfo },
    /// Opaque application payload relayed from the remote peer.
    Information { payload: serde_json::Value },
    /// Relay-originated advisory or failure.
    ServerError {
        reason: String,
        detail: Option<String>,
    },
    /// Local precondition or engine failure.
    ClientError {
        reason: String,
        detail: Option<String>,
    },
}

impl CallEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            CallEvent::LocalStreamReady(_) => EventKind::LocalStreamReady,
            CallEvent::RemoteStreamReady(_) => EventKind::RemoteStreamReady,
            CallEvent::PeerJoined { .. } => EventKind::PeerJoined,
            CallEvent::PeerHangUp => EventKind::PeerHangUp,
            CallEvent::OfferReceived { .. } => EventKind::OfferReceived,
            CallEvent::Information { .. } => EventKind::Information,
            CallEvent::ServerError { .. } => EventKind::ServerError,
            CallEvent::ClientError { .. } => EventKind::ClientError,
        }
    }
}

struct Subscriber {
    id: u64,
    tx: mpsc::UnboundedSender<CallEvent>,
}

/// Receiving end of a subscription.
pub struct EventSubscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<CallEvent>,
}

impl EventSubscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Get the next event without waiting.
    pub fn poll(&mut self) -> Option<CallEvent> {
        self.rx.try_recv().ok()
    }

    /// Wait for the next event. Returns `None` once the bus is dropped.
    pub async fn wait(&mut self) -> Option<CallEvent> {
        self.rx.recv().await
    }
}

/// Subscriber registry owned by a session.
pub struct EventBus {
    by_kind: Mutex<HashMap<EventKind, Vec<Subscriber>>>,
    firehose: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            by_kind: Mutex::new(HashMap::new()),
            firehose: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe to a single event kind.
    pub fn subscribe(&self, kind: EventKind) -> EventSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.by_kind
            .lock()
            .expect("lock poisoned")
            .entry(kind)
            .or_default()
            .push(Subscriber { id, tx });
        EventSubscription { id, rx }
    }

    /// Subscribe to every event kind.
    pub fn subscribe_all(&self) -> EventSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.firehose
            .lock()
            .expect("lock poisoned")
            .push(Subscriber { id, tx });
        EventSubscription { id, rx }
    }

    /// Drop a subscription by id. Unknown ids are a no-op.
    pub fn unsubscribe(&self, id: u64) {
        let mut by_kind = self.by_kind.lock().expect("lock poisoned");
        for subscribers in by_kind.values_mut() {
            subscribers.retain(|s| s.id != id);
        }
        self.firehose
            .lock()
            .expect("lock poisoned")
            .retain(|s| s.id != id);
    }

    /// Deliver an event to kind subscribers and firehose subscribers.
    /// Subscribers whose receiver is gone are pruned.
    pub(crate) fn emit(&self, event: CallEvent) {
        log::debug!("emitting {} event", event.kind().as_str());
        let mut by_kind = self.by_kind.lock().expect("lock poisoned");
        if let Some(subscribers) = by_kind.get_mut(&event.kind()) {
            subscribers.retain(|s| s.tx.send(event.clone()).is_ok());
        }
        drop(by_kind);
        self.firehose
            .lock()
            .expect("lock poisoned")
            .retain(|s| s.tx.send(event.clone()).is_ok());
    }

    /// Number of live subscriptions across all kinds.
    pub fn subscriber_count(&self) -> usize {
        let by_kind = self.by_kind.lock().expect("lock poisoned");
        let kinds: usize = by_kind.values().map(|v| v.len()).sum();
        kinds + self.firehose.lock().expect("lock poisoned").len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
