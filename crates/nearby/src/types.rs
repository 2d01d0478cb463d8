use crate::{NearbyError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Service identifier shared by advertisers and browsers unless configured otherwise
pub const DEFAULT_SERVICE_TYPE: &str = "tapcapsule";

/// Longest service identifier the local discovery layer accepts
pub const MAX_SERVICE_TYPE_LEN: usize = 15;

/// Identity of a peer for the lifetime of one session generation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerIdentity {
    pub id: String,
    pub display_name: String,
}

impl PeerIdentity {
    /// Create a fresh identity with a random id
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            display_name: display_name.into(),
        }
    }
}

impl std::fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.display_name, self.id)
    }
}

/// Role requested by the caller at start time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Advertises and accepts invitations
    Sender,
    /// Browses and sends invitations
    Receiver,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Sender => "sender",
            Role::Receiver => "receiver",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = NearbyError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sender" => Ok(Role::Sender),
            "receiver" => Ok(Role::Receiver),
            other => Err(NearbyError::InvalidArgument(format!("unknown role: {:?}", other))),
        }
    }
}

/// Top-level posture of the session manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Advertising,
    Browsing,
    Connecting,
    Connected,
    Disconnected,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Advertising => write!(f, "advertising"),
            SessionState::Browsing => write!(f, "browsing"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Connection state of a single remote peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

/// A remote peer seen during the current session generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectedPeer {
    pub identity: PeerIdentity,
    pub connection_state: ConnectionState,
    pub last_changed: DateTime<Utc>,
}

impl ConnectedPeer {
    pub fn new(identity: PeerIdentity, connection_state: ConnectionState) -> Self {
        Self {
            identity,
            connection_state,
            last_changed: Utc::now(),
        }
    }

    /// Move the peer to a new connection state
    pub fn transition(&mut self, connection_state: ConnectionState) {
        self.connection_state = connection_state;
        self.last_changed = Utc::now();
    }
}

/// Service identifier peers must share exactly to discover each other.
///
/// 1-15 characters of ASCII lowercase letters, digits and hyphens. At least one
/// letter, no leading or trailing hyphen, no adjacent hyphens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceType(String);

impl ServiceType {
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        Self::validate(&value)?;
        Ok(Self(value))
    }

    fn validate(value: &str) -> Result<()> {
        let invalid = |reason: &str| NearbyError::InvalidServiceType(format!("{:?}: {}", value, reason));

        if value.is_empty() || value.len() > MAX_SERVICE_TYPE_LEN {
            return Err(invalid("must be 1-15 characters"));
        }
        if !value
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        {
            return Err(invalid("only lowercase letters, digits and hyphens are allowed"));
        }
        if !value.bytes().any(|b| b.is_ascii_lowercase()) {
            return Err(invalid("must contain at least one letter"));
        }
        if value.starts_with('-') || value.ends_with('-') || value.contains("--") {
            return Err(invalid("hyphens must separate other characters"));
        }
        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ServiceType {
    fn default() -> Self {
        Self(DEFAULT_SERVICE_TYPE.to_string())
    }
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ServiceType {
    type Error = NearbyError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ServiceType> for String {
    fn from(value: ServiceType) -> Self {
        value.0
    }
}

/// Encryption requirement a session puts on its peers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncryptionPreference {
    Optional,
    Required,
    None,
}

impl EncryptionPreference {
    /// Two sessions can join only if neither insists on the opposite of the other
    pub fn is_compatible_with(&self, other: EncryptionPreference) -> bool {
        !matches!(
            (self, other),
            (EncryptionPreference::Required, EncryptionPreference::None)
                | (EncryptionPreference::None, EncryptionPreference::Required)
        )
    }
}

/// Transport-assigned session handle id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
