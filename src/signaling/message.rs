//! Wire protocol spoken with the signaling relay.
//!
//! A closed set of JSON messages discriminated by `type`. Field names and
//! casing are fixed by the relay protocol; unknown types deserialize to
//! `Unknown` so newer relays do not break older clients.

use crate::errors::CallError;
use crate::types::{CandidateInfo, IceServerInfo, PeerInfo, SessionDescription};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SignalMessage {
    /// Membership update. `details` is `null` when the room holds no
    /// remote peer.
    #[serde(rename = "login")]
    Login {
        #[serde(default)]
        details: Option<PeerInfo>,
    },

    /// Session-description offer. Inbound carries the sender id in `peer`
    /// and a relay-injected `name`; outbound addresses the target peer.
    #[serde(rename = "offer")]
    Offer {
        offer: SessionDescription,
        peer: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },

    /// Session-description answer. `peer` is only present outbound.
    #[serde(rename = "answer")]
    Answer {
        answer: SessionDescription,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        peer: Option<String>,
    },

    /// Trickled connectivity candidate. `peer` is only present outbound.
    #[serde(rename = "candidate")]
    Candidate {
        candidate: CandidateInfo,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        peer: Option<String>,
    },

    /// The remote peer hung up (inbound) or we are hanging up (outbound,
    /// addressed when the remote is known).
    #[serde(rename = "leave")]
    Leave {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        peer: Option<String>,
    },

    /// Opaque application payload.
    #[serde(rename = "information")]
    Information {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        peer: Option<String>,
        msg: serde_json::Value,
    },

    /// Relay-originated advisory, non-fatal.
    #[serde(rename = "notify")]
    Notify { notification: String },

    /// The remote peer disconnected unexpectedly.
    #[serde(rename = "peerLeft")]
    PeerLeft,

    /// Relay-originated fatal notice for this session.
    #[serde(rename = "error")]
    Error { reason: String },

    /// Forward-compatible catch-all. Ignored by the dispatcher.
    #[serde(other)]
    Unknown,
}

impl SignalMessage {
    pub fn offer_to(peer_id: impl Into<String>, offer: SessionDescription) -> Self {
        SignalMessage::Offer {
            offer,
            peer: peer_id.into(),
            name: None,
        }
    }

    pub fn answer_to(peer_id: impl Into<String>, answer: SessionDescription) -> Self {
        SignalMessage::Answer {
            answer,
            peer: Some(peer_id.into()),
        }
    }

    pub fn candidate_to(peer_id: impl Into<String>, candidate: CandidateInfo) -> Self {
        SignalMessage::Candidate {
            candidate,
            peer: Some(peer_id.into()),
        }
    }

    pub fn leave_to(peer_id: Option<String>) -> Self {
        SignalMessage::Leave { peer: peer_id }
    }

    pub fn information_to(peer_id: impl Into<String>, msg: serde_json::Value) -> Self {
        SignalMessage::Information {
            peer: Some(peer_id.into()),
            msg,
        }
    }

    /// Wire discriminator, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            SignalMessage::Login { .. } => "login",
            SignalMessage::Offer { .. } => "offer",
            SignalMessage::Answer { .. } => "answer",
            SignalMessage::Candidate { .. } => "candidate",
            SignalMessage::Leave { .. } => "leave",
            SignalMessage::Information { .. } => "information",
            SignalMessage::Notify { .. } => "notify",
            SignalMessage::PeerLeft => "peerLeft",
            SignalMessage::Error { .. } => "error",
            SignalMessage::Unknown => "unknown",
        }
    }
}

/// Synchronous queries answered by the relay over the request/response
/// channel, as opposed to fire-and-forget signaling messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalRequest {
    FetchIceServers,
}

impl SignalRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            SignalRequest::FetchIceServers => "fetchIceServers",
        }
    }

    pub fn payload(&self) -> serde_json::Value {
        match self {
            SignalRequest::FetchIceServers => serde_json::json!({}),
        }
    }
}

/// Parse a fetchIceServers response. The relay answers with a bare server
/// array; a `{"iceServers": [...]}` wrapper is tolerated.
pub fn parse_ice_servers(data: &serde_json::Value) -> Result<Vec<IceServerInfo>, CallError> {
    let list = match data {
        serde_json::Value::Array(_) => data,
        serde_json::Value::Object(map) => map
            .get("iceServers")
            .ok_or_else(|| CallError::protocol("ice-server response has no server list"))?,
        _ => {
            return Err(CallError::protocol(format!(
                "unexpected ice-server response: {}",
                data
            )))
        }
    };
    serde_json::from_value(list.clone())
        .map_err(|e| CallError::protocol(format!("malformed ice-server response: {}", e)))
}
