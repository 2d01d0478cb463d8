// Nearby Events - the closed vocabulary pushed from the manager to its consumer

use serde::{Deserialize, Serialize};

/// Message carried by the error event when a send could not be delivered
pub const SEND_FAILED: &str = "send_failed";

/// Discovery/session posture reported by status events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusValue {
    Advertising,
    Browsing,
    Connecting,
    Idle,
}

impl std::fmt::Display for StatusValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusValue::Advertising => write!(f, "advertising"),
            StatusValue::Browsing => write!(f, "browsing"),
            StatusValue::Connecting => write!(f, "connecting"),
            StatusValue::Idle => write!(f, "idle"),
        }
    }
}

/// Event emitted by the session manager.
///
/// Serializes to the host-facing record shape, e.g.
/// `{"type":"status","value":"advertising"}` or `{"type":"payload","json":"..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NearbyEvent {
    /// Discovery/session posture changed
    Status { value: StatusValue },
    /// Named peer reached Connected
    Connected { peer: String },
    /// Named peer reached Disconnected
    Disconnected { peer: String },
    /// Application data received from a peer
    Payload { json: String },
    /// The last send succeeded
    Sent,
    /// The last send failed
    Error { message: String },
}

impl NearbyEvent {
    pub fn status(value: StatusValue) -> Self {
        NearbyEvent::Status { value }
    }

    pub fn connected(peer: impl Into<String>) -> Self {
        NearbyEvent::Connected { peer: peer.into() }
    }

    pub fn disconnected(peer: impl Into<String>) -> Self {
        NearbyEvent::Disconnected { peer: peer.into() }
    }

    pub fn payload(json: impl Into<String>) -> Self {
        NearbyEvent::Payload { json: json.into() }
    }

    pub fn send_failed() -> Self {
        NearbyEvent::Error {
            message: SEND_FAILED.to_string(),
        }
    }

    /// Wire tag of the event
    pub fn kind(&self) -> &'static str {
        match self {
            NearbyEvent::Status { .. } => "status",
            NearbyEvent::Connected { .. } => "connected",
            NearbyEvent::Disconnected { .. } => "disconnected",
            NearbyEvent::Payload { .. } => "payload",
            NearbyEvent::Sent => "sent",
            NearbyEvent::Error { .. } => "error",
        }
    }

    /// Whether the event concerns a remote peer rather than the local posture
    pub fn is_peer_event(&self) -> bool {
        matches!(
            self,
            NearbyEvent::Connected { .. } | NearbyEvent::Disconnected { .. } | NearbyEvent::Payload { .. }
        )
    }
}
