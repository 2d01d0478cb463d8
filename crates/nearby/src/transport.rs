// Transport abstraction layer for nearby sessions
// Observer traits are the callback capability sets the manager implements;
// handle traits are what a concrete transport hands back.

use crate::{EncryptionPreference, PeerIdentity, Result, ServiceType, SessionId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

/// Peer connection state as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportPeerState {
    NotConnected,
    Connecting,
    Connected,
    /// A raw state value this crate does not know about
    Unknown(u32),
}

/// Answer to an incoming invitation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvitationReply {
    /// Join the inviter into the given session
    Accept(SessionId),
    Decline,
}

/// Callbacks of an active advertiser
#[async_trait]
pub trait AdvertiseObserver: Send + Sync {
    /// A browsing peer invited us into its session
    async fn received_invitation(&self, from: PeerIdentity, context: Option<Vec<u8>>) -> InvitationReply;

    /// The advertiser could not be started
    async fn did_not_start_advertising(&self, reason: String);
}

/// Callbacks of an active browser
#[async_trait]
pub trait BrowseObserver: Send + Sync {
    /// An advertiser with our service type is in range
    async fn found_peer(&self, peer: PeerIdentity, discovery_info: Option<HashMap<String, String>>);

    /// A previously found advertiser is gone
    async fn lost_peer(&self, peer: PeerIdentity);

    /// The browser could not be started
    async fn did_not_start_browsing(&self, reason: String);
}

/// Callbacks of an open session
#[async_trait]
pub trait SessionObserver: Send + Sync {
    async fn peer_changed_state(&self, peer: PeerIdentity, state: TransportPeerState);

    async fn received_data(&self, data: Vec<u8>, from: PeerIdentity);

    async fn received_stream(&self, stream_name: String, from: PeerIdentity);

    async fn started_receiving_resource(&self, resource_name: String, from: PeerIdentity);

    async fn finished_receiving_resource(
        &self,
        resource_name: String,
        from: PeerIdentity,
        error: Option<String>,
    );
}

/// An open multi-peer session
#[async_trait]
pub trait TransportSession: Send + Sync + Debug {
    fn id(&self) -> SessionId;

    fn local_peer(&self) -> &PeerIdentity;

    /// Peers currently in the connected state
    async fn connected_peers(&self) -> Vec<PeerIdentity>;

    /// Queue data for every listed peer, reliably and in order. Fails if any of
    /// them cannot be reached.
    async fn send(&self, data: Vec<u8>, to: &[PeerIdentity]) -> Result<()>;

    /// Leave the session, dropping every peer
    async fn disconnect(&self);
}

/// Announces the local peer under a service type
#[async_trait]
pub trait Advertiser: Send + Sync + Debug {
    async fn start(&self) -> Result<()>;

    async fn stop(&self);
}

/// Scans for advertisers under a service type
#[async_trait]
pub trait Browser: Send + Sync + Debug {
    async fn start(&self) -> Result<()>;

    async fn stop(&self);

    /// Invite a found peer into one of our sessions. Outcome arrives through the
    /// session observer.
    async fn invite_peer(
        &self,
        peer: &PeerIdentity,
        session: SessionId,
        context: Option<Vec<u8>>,
        timeout: Duration,
    ) -> Result<()>;
}

/// Factory for sessions and discovery roles.
///
/// Implementations deliver observer callbacks asynchronously and serially per
/// observer. They must never invoke an observer from inside one of these calls.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open_session(
        &self,
        local: &PeerIdentity,
        encryption: EncryptionPreference,
        observer: Arc<dyn SessionObserver>,
    ) -> Result<Arc<dyn TransportSession>>;

    async fn advertiser(
        &self,
        local: &PeerIdentity,
        service_type: &ServiceType,
        observer: Arc<dyn AdvertiseObserver>,
    ) -> Result<Box<dyn Advertiser>>;

    async fn browser(
        &self,
        local: &PeerIdentity,
        service_type: &ServiceType,
        observer: Arc<dyn BrowseObserver>,
    ) -> Result<Box<dyn Browser>>;

    /// Get the transport name
    fn name(&self) -> &str;
}
