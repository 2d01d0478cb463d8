// Peer Session Manager - owns the identity, session and discovery role of one
// start..stop generation and normalizes transport callbacks into NearbyEvents

use crate::sink::{EventSink, EventStream};
use crate::transport::{
    AdvertiseObserver, Advertiser, BrowseObserver, Browser, InvitationReply, SessionObserver, Transport,
    TransportPeerState, TransportSession,
};
use crate::{
    ConnectedPeer, ConnectionState, EncryptionPreference, ErrorContext, NearbyConfig, NearbyEvent, NearbyError,
    PeerIdentity, Result, Role, SessionState, StatusValue,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Active discovery sub-role
#[derive(Debug)]
enum Discovery {
    Advertising(Box<dyn Advertiser>),
    Browsing(Box<dyn Browser>),
}

/// Everything that lives and dies with one start..stop generation
struct ActiveSession {
    generation: u64,
    role: Role,
    identity: PeerIdentity,
    session: Arc<dyn TransportSession>,
    discovery: Discovery,
    peers: HashMap<String, ConnectedPeer>,
}

impl ActiveSession {
    fn posture(&self) -> SessionState {
        let states = || self.peers.values().map(|p| p.connection_state);

        if states().any(|s| s == ConnectionState::Connected) {
            SessionState::Connected
        } else if states().any(|s| s == ConnectionState::Connecting) {
            SessionState::Connecting
        } else if states().any(|s| s == ConnectionState::Disconnected) {
            SessionState::Disconnected
        } else {
            match self.role {
                Role::Sender => SessionState::Advertising,
                Role::Receiver => SessionState::Browsing,
            }
        }
    }

    fn update_peer(&mut self, peer: PeerIdentity, state: ConnectionState) {
        self.peers
            .entry(peer.id.clone())
            .and_modify(|existing| existing.transition(state))
            .or_insert_with(|| ConnectedPeer::new(peer, state));
    }

    fn live_peer_count(&self) -> usize {
        self.peers
            .values()
            .filter(|p| p.connection_state != ConnectionState::Disconnected)
            .count()
    }
}

#[derive(Default)]
struct ManagerState {
    generation: u64,
    active: Option<ActiveSession>,
    /// The consumer has been told `idle` since the last successful start
    idle_reported: bool,
}

impl ManagerState {
    /// The active session, if it belongs to the given generation
    fn current_mut(&mut self, generation: u64) -> Option<&mut ActiveSession> {
        self.active.as_mut().filter(|active| active.generation == generation)
    }
}

struct ManagerInner {
    transport: Arc<dyn Transport>,
    config: NearbyConfig,
    sink: EventSink,
    state: Mutex<ManagerState>,
}

impl ManagerInner {
    /// Release the active generation, if any. Emits nothing.
    async fn teardown(&self, state: &mut ManagerState) -> bool {
        let Some(active) = state.active.take() else {
            return false;
        };
        state.generation += 1;

        match &active.discovery {
            Discovery::Advertising(advertiser) => advertiser.stop().await,
            Discovery::Browsing(browser) => browser.stop().await,
        }
        active.session.disconnect().await;

        info!(
            generation = active.generation,
            role = %active.role,
            peers = active.peers.len(),
            "Nearby session torn down"
        );
        true
    }
}

/// Drives one local peer through discovery, invitation and payload exchange
#[derive(Clone)]
pub struct PeerSessionManager {
    inner: Arc<ManagerInner>,
}

impl PeerSessionManager {
    pub fn new(transport: Arc<dyn Transport>, config: NearbyConfig) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                transport,
                config,
                sink: EventSink::new(),
                state: Mutex::new(ManagerState::default()),
            }),
        }
    }

    /// Register the event consumer, replacing any previous one
    pub async fn listen(&self) -> EventStream {
        self.inner.sink.listen().await
    }

    /// Deregister the event consumer
    pub async fn cancel_listen(&self) {
        self.inner.sink.cancel().await
    }

    pub fn config(&self) -> &NearbyConfig {
        &self.inner.config
    }

    /// Start a fresh generation in the given role.
    ///
    /// Any running generation is torn down first without emitting `idle`.
    pub async fn start(&self, role: Role) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        let replaced = self.inner.teardown(&mut state).await;

        state.generation += 1;
        let generation = state.generation;
        let identity = PeerIdentity::new(self.inner.config.display_name.clone());
        let observer = Arc::new(GenerationObserver {
            generation,
            manager: Arc::downgrade(&self.inner),
        });

        info!(
            generation,
            role = %role,
            peer = %identity,
            transport = self.inner.transport.name(),
            "Starting nearby session"
        );

        let transport = &self.inner.transport;
        let context = ErrorContext::new().with_generation(generation).with_role(role);

        let session = match transport
            .open_session(&identity, EncryptionPreference::Required, observer.clone())
            .await
        {
            Ok(session) => session,
            Err(e) => {
                e.log_with_context(&context.with_info("open_session"));
                self.settle_failed_start(&mut state, replaced).await;
                return Err(e);
            }
        };

        let service_type = &self.inner.config.service_type;
        let activated = match role {
            Role::Sender => match transport.advertiser(&identity, service_type, observer.clone()).await {
                Ok(advertiser) => advertiser
                    .start()
                    .await
                    .map(|_| (Discovery::Advertising(advertiser), StatusValue::Advertising)),
                Err(e) => Err(e),
            },
            Role::Receiver => match transport.browser(&identity, service_type, observer).await {
                Ok(browser) => browser
                    .start()
                    .await
                    .map(|_| (Discovery::Browsing(browser), StatusValue::Browsing)),
                Err(e) => Err(e),
            },
        };

        let (discovery, status) = match activated {
            Ok(activated) => activated,
            Err(e) => {
                e.log_with_context(&context.with_info("discovery"));
                session.disconnect().await;
                self.settle_failed_start(&mut state, replaced).await;
                return Err(e);
            }
        };

        state.active = Some(ActiveSession {
            generation,
            role,
            identity,
            session,
            discovery,
            peers: HashMap::new(),
        });
        state.idle_reported = false;
        self.inner.sink.emit(NearbyEvent::status(status)).await;
        Ok(())
    }

    /// A failed start that replaced a running generation leaves the caller idle
    async fn settle_failed_start(&self, state: &mut ManagerState, replaced: bool) {
        if replaced {
            state.idle_reported = true;
            self.inner.sink.emit(NearbyEvent::status(StatusValue::Idle)).await;
        }
    }

    /// Parse a role string and start. Unknown roles are rejected before anything
    /// is torn down.
    pub async fn start_with_role(&self, role: &str) -> Result<()> {
        let role: Role = role.parse()?;
        self.start(role).await
    }

    /// Stop discovery and leave the session. Idempotent: `idle` is reported
    /// once, including for a manager that was never started.
    pub async fn stop(&self) {
        let mut state = self.inner.state.lock().await;
        let torn_down = self.inner.teardown(&mut state).await;
        if torn_down || !state.idle_reported {
            state.idle_reported = true;
            self.inner.sink.emit(NearbyEvent::status(StatusValue::Idle)).await;
        } else {
            debug!("Stop requested while idle");
        }
    }

    /// Send a payload to every connected peer.
    ///
    /// No-op without a session or connected peers. Otherwise emits exactly one
    /// `sent` or `error` event.
    pub async fn send(&self, payload: &str) {
        let state = self.inner.state.lock().await;
        let Some(active) = state.active.as_ref() else {
            debug!("Send requested without a session");
            return;
        };

        let peers = active.session.connected_peers().await;
        if peers.is_empty() {
            debug!(generation = active.generation, "Send requested with no connected peers");
            return;
        }

        match active
            .session
            .send(payload.as_bytes().to_vec(), &peers)
            .await
        {
            Ok(()) => {
                debug!(generation = active.generation, recipients = peers.len(), bytes = payload.len(), "Payload sent");
                self.inner.sink.emit(NearbyEvent::Sent).await;
            }
            Err(e) => {
                warn!(generation = active.generation, error = %e, "Payload send failed");
                self.inner.sink.emit(NearbyEvent::send_failed()).await;
            }
        }
    }

    /// Current top-level posture
    pub async fn session_state(&self) -> SessionState {
        let state = self.inner.state.lock().await;
        state
            .active
            .as_ref()
            .map(ActiveSession::posture)
            .unwrap_or(SessionState::Idle)
    }

    /// Role of the running generation
    pub async fn role(&self) -> Option<Role> {
        self.inner.state.lock().await.active.as_ref().map(|a| a.role)
    }

    /// Identity of the running generation
    pub async fn local_identity(&self) -> Option<PeerIdentity> {
        self.inner
            .state
            .lock()
            .await
            .active
            .as_ref()
            .map(|a| a.identity.clone())
    }

    /// Every peer seen during the running generation
    pub async fn peers(&self) -> Vec<ConnectedPeer> {
        self.inner
            .state
            .lock()
            .await
            .active
            .as_ref()
            .map(|a| a.peers.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Current generation counter
    pub async fn generation(&self) -> u64 {
        self.inner.state.lock().await.generation
    }

    /// Whether a generation is running
    pub async fn is_active(&self) -> bool {
        self.inner.state.lock().await.active.is_some()
    }
}

/// Observer handed to the transport for one generation. Callbacks from any other
/// generation are discarded.
struct GenerationObserver {
    generation: u64,
    manager: Weak<ManagerInner>,
}

impl GenerationObserver {
    fn stale(&self, callback: &str) {
        debug!(generation = self.generation, callback, "Dropping stale transport callback");
    }
}

#[async_trait]
impl AdvertiseObserver for GenerationObserver {
    async fn received_invitation(&self, from: PeerIdentity, _context: Option<Vec<u8>>) -> InvitationReply {
        let Some(inner) = self.manager.upgrade() else {
            return InvitationReply::Decline;
        };
        let mut state = inner.state.lock().await;
        let Some(active) = state.current_mut(self.generation) else {
            self.stale("received_invitation");
            return InvitationReply::Decline;
        };

        if let Some(max_peers) = inner.config.max_peers {
            if active.live_peer_count() >= max_peers {
                info!(peer = %from, max_peers, "Declining invitation, peer cap reached");
                return InvitationReply::Decline;
            }
        }

        info!(peer = %from, generation = self.generation, "Accepting invitation");
        // Counts against the peer cap until the transport reports the outcome
        active.update_peer(from, ConnectionState::Connecting);
        InvitationReply::Accept(active.session.id())
    }

    async fn did_not_start_advertising(&self, reason: String) {
        warn!(generation = self.generation, reason = %reason, "Advertiser failed to start");
    }
}

#[async_trait]
impl BrowseObserver for GenerationObserver {
    async fn found_peer(&self, peer: PeerIdentity, _discovery_info: Option<HashMap<String, String>>) {
        let Some(inner) = self.manager.upgrade() else {
            return;
        };
        let mut state = inner.state.lock().await;
        let Some(active) = state.current_mut(self.generation) else {
            self.stale("found_peer");
            return;
        };
        let Discovery::Browsing(browser) = &active.discovery else {
            return;
        };

        debug!(peer = %peer, "Found peer, inviting");
        if let Err(e) = browser
            .invite_peer(&peer, active.session.id(), None, inner.config.invite_timeout)
            .await
        {
            e.log_with_context(
                &ErrorContext::new()
                    .with_peer_id(peer.id.clone())
                    .with_generation(self.generation)
                    .with_role(active.role)
                    .with_info("invite_peer"),
            );
        }
    }

    async fn lost_peer(&self, peer: PeerIdentity) {
        debug!(peer = %peer, generation = self.generation, "Lost peer");
    }

    async fn did_not_start_browsing(&self, reason: String) {
        warn!(generation = self.generation, reason = %reason, "Browser failed to start");
    }
}

#[async_trait]
impl SessionObserver for GenerationObserver {
    async fn peer_changed_state(&self, peer: PeerIdentity, peer_state: TransportPeerState) {
        let Some(inner) = self.manager.upgrade() else {
            return;
        };
        let mut state = inner.state.lock().await;
        let Some(active) = state.current_mut(self.generation) else {
            self.stale("peer_changed_state");
            return;
        };

        let name = peer.display_name.clone();
        let event = match peer_state {
            TransportPeerState::Connecting => {
                active.update_peer(peer, ConnectionState::Connecting);
                NearbyEvent::status(StatusValue::Connecting)
            }
            TransportPeerState::Connected => {
                info!(peer = %peer, "Peer connected");
                active.update_peer(peer, ConnectionState::Connected);
                NearbyEvent::connected(name)
            }
            TransportPeerState::NotConnected => {
                info!(peer = %peer, "Peer disconnected");
                active.update_peer(peer, ConnectionState::Disconnected);
                NearbyEvent::disconnected(name)
            }
            TransportPeerState::Unknown(raw) => {
                debug!(peer = %peer, raw, "Ignoring unknown peer state");
                return;
            }
        };
        inner.sink.emit(event).await;
    }

    async fn received_data(&self, data: Vec<u8>, from: PeerIdentity) {
        let Some(inner) = self.manager.upgrade() else {
            return;
        };
        let mut state = inner.state.lock().await;
        if state.current_mut(self.generation).is_none() {
            self.stale("received_data");
            return;
        }

        match String::from_utf8(data) {
            Ok(json) => inner.sink.emit(NearbyEvent::payload(json)).await,
            Err(e) => {
                let error = NearbyError::SerializationError(e.to_string());
                debug!(peer = %from, error = %error, "Dropping undecodable payload");
            }
        }
    }

    async fn received_stream(&self, stream_name: String, from: PeerIdentity) {
        debug!(peer = %from, stream_name = %stream_name, "Ignoring incoming stream");
    }

    async fn started_receiving_resource(&self, resource_name: String, from: PeerIdentity) {
        debug!(peer = %from, resource_name = %resource_name, "Ignoring incoming resource");
    }

    async fn finished_receiving_resource(&self, resource_name: String, from: PeerIdentity, _error: Option<String>) {
        debug!(peer = %from, resource_name = %resource_name, "Ignoring finished resource");
    }
}
