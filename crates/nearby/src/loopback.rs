// Loopback transport - an in-process medium that connects every transport
// created on the same LoopbackNetwork, with per-observer serial callback delivery

use crate::transport::{
    AdvertiseObserver, Advertiser, BrowseObserver, Browser, InvitationReply, SessionObserver, Transport,
    TransportPeerState, TransportSession,
};
use crate::{EncryptionPreference, NearbyError, PeerIdentity, Result, ServiceType, SessionId};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug)]
enum SessionCallback {
    StateChanged(PeerIdentity, TransportPeerState),
    Data(Vec<u8>, PeerIdentity),
}

#[derive(Debug)]
enum AdvertiseCallback {
    Invitation {
        from: PeerIdentity,
        context: Option<Vec<u8>>,
        reply: oneshot::Sender<InvitationReply>,
    },
    DidNotStart(String),
}

#[derive(Debug)]
enum BrowseCallback {
    Found(PeerIdentity),
    Lost(PeerIdentity),
    DidNotStart(String),
}

/// Spawn the task that feeds one observer, in order, until the sender side is
/// dropped or the network shuts down
fn spawn_delivery<C, F, Fut>(shutdown: CancellationToken, mut deliver: F) -> mpsc::UnboundedSender<C>
where
    C: Send + 'static,
    F: FnMut(C) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                callback = rx.recv() => match callback {
                    Some(callback) => deliver(callback).await,
                    None => break,
                },
                _ = shutdown.cancelled() => break,
            }
        }
    });
    tx
}

#[derive(Debug)]
struct SessionSlot {
    id: SessionId,
    local: PeerIdentity,
    encryption: EncryptionPreference,
    callbacks: mpsc::UnboundedSender<SessionCallback>,
    /// Remote peer id -> (identity, remote session)
    connected: RwLock<HashMap<String, (PeerIdentity, SessionId)>>,
    closed: AtomicBool,
}

impl SessionSlot {
    fn notify(&self, callback: SessionCallback) {
        if self.callbacks.send(callback).is_err() {
            debug!(session = %self.id, "Session observer gone, dropping callback");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct AdvertiserSlot {
    id: Uuid,
    local: PeerIdentity,
    service_type: ServiceType,
    callbacks: mpsc::UnboundedSender<AdvertiseCallback>,
}

impl AdvertiserSlot {
    fn notify(&self, callback: AdvertiseCallback) {
        if self.callbacks.send(callback).is_err() {
            debug!(advertiser = %self.id, "Advertise observer gone, dropping callback");
        }
    }
}

#[derive(Debug)]
struct BrowserSlot {
    id: Uuid,
    local: PeerIdentity,
    service_type: ServiceType,
    callbacks: mpsc::UnboundedSender<BrowseCallback>,
}

impl BrowserSlot {
    fn notify(&self, callback: BrowseCallback) {
        if self.callbacks.send(callback).is_err() {
            debug!(browser = %self.id, "Browse observer gone, dropping callback");
        }
    }
}

/// Shared medium every loopback transport attaches to
#[derive(Debug)]
pub struct LoopbackNetwork {
    sessions: DashMap<SessionId, Arc<SessionSlot>>,
    advertisers: DashMap<Uuid, Arc<AdvertiserSlot>>,
    browsers: DashMap<Uuid, Arc<BrowserSlot>>,
    radio_enabled: AtomicBool,
    shutdown: CancellationToken,
}

impl LoopbackNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            advertisers: DashMap::new(),
            browsers: DashMap::new(),
            radio_enabled: AtomicBool::new(true),
            shutdown: CancellationToken::new(),
        })
    }

    /// Simulate the local radio being switched off or on. While off, advertisers
    /// and browsers report that they did not start.
    pub fn set_radio_enabled(&self, enabled: bool) {
        self.radio_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Stop every delivery task on this network
    pub fn shutdown(&self) {
        info!("Shutting down loopback network");
        self.shutdown.cancel();
    }

    /// Number of open sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Number of running advertisers
    pub fn advertiser_count(&self) -> usize {
        self.advertisers.len()
    }

    /// Number of running browsers
    pub fn browser_count(&self) -> usize {
        self.browsers.len()
    }

    fn session(&self, id: &SessionId) -> Option<Arc<SessionSlot>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    fn advertiser_for(&self, peer: &PeerIdentity) -> Option<Arc<AdvertiserSlot>> {
        self.advertisers
            .iter()
            .find(|entry| entry.local.id == peer.id)
            .map(|entry| Arc::clone(entry.value()))
    }

    fn advertisers_for(&self, service_type: &ServiceType) -> Vec<Arc<AdvertiserSlot>> {
        self.advertisers
            .iter()
            .filter(|entry| &entry.service_type == service_type)
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    fn browsers_for(&self, service_type: &ServiceType) -> Vec<Arc<BrowserSlot>> {
        self.browsers
            .iter()
            .filter(|entry| &entry.service_type == service_type)
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Carry one invitation from a browser's session to an advertiser and join
    /// both sessions if it is accepted
    async fn run_invitation(
        self: Arc<Self>,
        peer: PeerIdentity,
        session: SessionId,
        context: Option<Vec<u8>>,
        timeout: Duration,
    ) {
        let Some(inviter) = self.session(&session) else {
            debug!(session = %session, "Inviting session is gone");
            return;
        };
        inviter.notify(SessionCallback::StateChanged(peer.clone(), TransportPeerState::Connecting));

        let joined = match self.ask(&inviter, &peer, context, timeout).await {
            Ok(acceptor) => self.join(&inviter, acceptor).await,
            Err(e) => Err(e),
        };

        match joined {
            Ok(acceptor) => {
                acceptor.notify(SessionCallback::StateChanged(
                    inviter.local.clone(),
                    TransportPeerState::Connecting,
                ));
                acceptor.notify(SessionCallback::StateChanged(
                    inviter.local.clone(),
                    TransportPeerState::Connected,
                ));
                inviter.notify(SessionCallback::StateChanged(
                    acceptor.local.clone(),
                    TransportPeerState::Connected,
                ));
                info!(inviter = %inviter.local, acceptor = %acceptor.local, "Loopback sessions joined");
            }
            Err(e) => {
                debug!(peer = %peer, error = %e, "Invitation failed");
                inviter.notify(SessionCallback::StateChanged(peer, TransportPeerState::NotConnected));
            }
        }
    }

    /// Deliver the invitation and wait for the advertiser's answer
    async fn ask(
        &self,
        inviter: &SessionSlot,
        peer: &PeerIdentity,
        context: Option<Vec<u8>>,
        timeout: Duration,
    ) -> Result<SessionId> {
        let advertiser = self
            .advertiser_for(peer)
            .ok_or_else(|| NearbyError::PeerNotFound(peer.to_string()))?;

        let (tx, rx) = oneshot::channel();
        advertiser
            .callbacks
            .send(AdvertiseCallback::Invitation {
                from: inviter.local.clone(),
                context,
                reply: tx,
            })
            .map_err(|_| NearbyError::ConnectionFailed("advertiser is gone".to_string()))?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(InvitationReply::Accept(acceptor))) => Ok(acceptor),
            Ok(Ok(InvitationReply::Decline)) => Err(NearbyError::ConnectionFailed("invitation declined".to_string())),
            Ok(Err(_)) => Err(NearbyError::ConnectionFailed("advertiser is gone".to_string())),
            Err(_) => Err(NearbyError::Timeout(format!("invitation to {} after {:?}", peer, timeout))),
        }
    }

    /// Join the accepting session. On failure the acceptor learns the inviter
    /// never arrived.
    async fn join(&self, inviter: &SessionSlot, acceptor: SessionId) -> Result<Arc<SessionSlot>> {
        let acceptor = self
            .session(&acceptor)
            .ok_or_else(|| NearbyError::ConnectionFailed("accepting session is gone".to_string()))?;

        match link(inviter, &acceptor).await {
            Ok(()) => Ok(acceptor),
            Err(e) => {
                acceptor.notify(SessionCallback::StateChanged(
                    inviter.local.clone(),
                    TransportPeerState::NotConnected,
                ));
                Err(e)
            }
        }
    }
}

/// Record two sessions as connected to each other. Both peer maps are held
/// while the closed flags are checked; `disconnect` sets its flag under the
/// same lock, so a closing session is never linked.
async fn link(inviter: &SessionSlot, acceptor: &SessionSlot) -> Result<()> {
    if inviter.id == acceptor.id {
        return Err(NearbyError::ConnectionFailed("session cannot join itself".to_string()));
    }
    if !inviter.encryption.is_compatible_with(acceptor.encryption) {
        return Err(NearbyError::ConnectionFailed(format!(
            "encryption {:?} is incompatible with {:?}",
            inviter.encryption, acceptor.encryption
        )));
    }

    // Fixed lock order so two joins over the same pair cannot deadlock
    let (first, second) = if inviter.id.0 < acceptor.id.0 {
        (inviter, acceptor)
    } else {
        (acceptor, inviter)
    };
    let mut first_peers = first.connected.write().await;
    let mut second_peers = second.connected.write().await;

    if first.is_closed() || second.is_closed() {
        return Err(NearbyError::SessionClosed);
    }
    first_peers.insert(second.local.id.clone(), (second.local.clone(), second.id));
    second_peers.insert(first.local.id.clone(), (first.local.clone(), first.id));
    Ok(())
}

/// Session handle on a loopback network
#[derive(Debug)]
pub struct LoopbackSession {
    slot: Arc<SessionSlot>,
    network: Arc<LoopbackNetwork>,
}

#[async_trait]
impl TransportSession for LoopbackSession {
    fn id(&self) -> SessionId {
        self.slot.id
    }

    fn local_peer(&self) -> &PeerIdentity {
        &self.slot.local
    }

    async fn connected_peers(&self) -> Vec<PeerIdentity> {
        self.slot
            .connected
            .read()
            .await
            .values()
            .map(|(peer, _)| peer.clone())
            .collect()
    }

    async fn send(&self, data: Vec<u8>, to: &[PeerIdentity]) -> Result<()> {
        if self.slot.is_closed() {
            return Err(NearbyError::SessionClosed);
        }

        let mut targets = Vec::with_capacity(to.len());
        {
            let connected = self.slot.connected.read().await;
            for peer in to {
                let (_, remote) = connected
                    .get(&peer.id)
                    .ok_or_else(|| NearbyError::SendFailed(format!("{} is not connected", peer)))?;
                let remote = self
                    .network
                    .session(remote)
                    .filter(|remote| !remote.is_closed())
                    .ok_or_else(|| NearbyError::SendFailed(format!("{} left the session", peer)))?;
                targets.push(remote);
            }
        }

        for remote in &targets {
            remote.notify(SessionCallback::Data(data.clone(), self.slot.local.clone()));
        }

        debug!(
            session = %self.slot.id,
            recipients = targets.len(),
            bytes = data.len(),
            "Loopback data queued"
        );
        Ok(())
    }

    async fn disconnect(&self) {
        let peers = {
            let mut connected = self.slot.connected.write().await;
            if self.slot.closed.swap(true, Ordering::SeqCst) {
                return;
            }
            std::mem::take(&mut *connected)
        };
        self.network.sessions.remove(&self.slot.id);

        for (_, (peer, remote_id)) in peers {
            let remote = self.network.session(&remote_id);
            if let Some(remote) = remote {
                remote.connected.write().await.remove(&self.slot.local.id);
                remote.notify(SessionCallback::StateChanged(
                    self.slot.local.clone(),
                    TransportPeerState::NotConnected,
                ));
            }
            self.slot
                .notify(SessionCallback::StateChanged(peer, TransportPeerState::NotConnected));
        }

        debug!(session = %self.slot.id, "Loopback session disconnected");
    }
}

/// Advertiser handle on a loopback network
#[derive(Debug)]
pub struct LoopbackAdvertiser {
    slot: Arc<AdvertiserSlot>,
    network: Arc<LoopbackNetwork>,
}

#[async_trait]
impl Advertiser for LoopbackAdvertiser {
    async fn start(&self) -> Result<()> {
        if !self.network.radio_enabled.load(Ordering::SeqCst) {
            self.slot
                .notify(AdvertiseCallback::DidNotStart("radio is off".to_string()));
            return Ok(());
        }
        if self.network.advertisers.contains_key(&self.slot.id) {
            return Ok(());
        }

        self.network.advertisers.insert(self.slot.id, Arc::clone(&self.slot));
        for browser in self.network.browsers_for(&self.slot.service_type) {
            if browser.local.id != self.slot.local.id {
                browser.notify(BrowseCallback::Found(self.slot.local.clone()));
            }
        }

        debug!(peer = %self.slot.local, service_type = %self.slot.service_type, "Loopback advertising");
        Ok(())
    }

    async fn stop(&self) {
        if self.network.advertisers.remove(&self.slot.id).is_none() {
            return;
        }
        for browser in self.network.browsers_for(&self.slot.service_type) {
            browser.notify(BrowseCallback::Lost(self.slot.local.clone()));
        }
        debug!(peer = %self.slot.local, "Loopback advertising stopped");
    }
}

/// Browser handle on a loopback network
#[derive(Debug)]
pub struct LoopbackBrowser {
    slot: Arc<BrowserSlot>,
    network: Arc<LoopbackNetwork>,
}

#[async_trait]
impl Browser for LoopbackBrowser {
    async fn start(&self) -> Result<()> {
        if !self.network.radio_enabled.load(Ordering::SeqCst) {
            self.slot
                .notify(BrowseCallback::DidNotStart("radio is off".to_string()));
            return Ok(());
        }
        if self.network.browsers.contains_key(&self.slot.id) {
            return Ok(());
        }

        self.network.browsers.insert(self.slot.id, Arc::clone(&self.slot));
        for advertiser in self.network.advertisers_for(&self.slot.service_type) {
            if advertiser.local.id != self.slot.local.id {
                self.slot.notify(BrowseCallback::Found(advertiser.local.clone()));
            }
        }

        debug!(peer = %self.slot.local, service_type = %self.slot.service_type, "Loopback browsing");
        Ok(())
    }

    async fn stop(&self) {
        if self.network.browsers.remove(&self.slot.id).is_some() {
            debug!(peer = %self.slot.local, "Loopback browsing stopped");
        }
    }

    async fn invite_peer(
        &self,
        peer: &PeerIdentity,
        session: SessionId,
        context: Option<Vec<u8>>,
        timeout: Duration,
    ) -> Result<()> {
        if !self.network.browsers.contains_key(&self.slot.id) {
            return Err(NearbyError::TransportError("browser is not running".to_string()));
        }

        let network = Arc::clone(&self.network);
        tokio::spawn(network.run_invitation(peer.clone(), session, context, timeout));
        Ok(())
    }
}

/// Transport whose sessions and discovery roles live on a shared LoopbackNetwork
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    network: Arc<LoopbackNetwork>,
}

impl LoopbackTransport {
    pub fn new(network: Arc<LoopbackNetwork>) -> Self {
        Self { network }
    }

    pub fn network(&self) -> &Arc<LoopbackNetwork> {
        &self.network
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn open_session(
        &self,
        local: &PeerIdentity,
        encryption: EncryptionPreference,
        observer: Arc<dyn SessionObserver>,
    ) -> Result<Arc<dyn TransportSession>> {
        let callbacks = spawn_delivery(self.network.shutdown.clone(), move |callback| {
            let observer = Arc::clone(&observer);
            async move {
                match callback {
                    SessionCallback::StateChanged(peer, state) => observer.peer_changed_state(peer, state).await,
                    SessionCallback::Data(data, from) => observer.received_data(data, from).await,
                }
            }
        });

        let slot = Arc::new(SessionSlot {
            id: SessionId::new(),
            local: local.clone(),
            encryption,
            callbacks,
            connected: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        });
        self.network.sessions.insert(slot.id, Arc::clone(&slot));

        debug!(session = %slot.id, peer = %local, ?encryption, "Loopback session opened");
        Ok(Arc::new(LoopbackSession {
            slot,
            network: Arc::clone(&self.network),
        }))
    }

    async fn advertiser(
        &self,
        local: &PeerIdentity,
        service_type: &ServiceType,
        observer: Arc<dyn AdvertiseObserver>,
    ) -> Result<Box<dyn Advertiser>> {
        let network = Arc::clone(&self.network);
        let callbacks = spawn_delivery(self.network.shutdown.clone(), move |callback| {
            let observer = Arc::clone(&observer);
            let network = Arc::clone(&network);
            async move {
                match callback {
                    AdvertiseCallback::Invitation { from, context, reply } => {
                        let answer = observer.received_invitation(from.clone(), context).await;
                        // Inviter stopped waiting; an accepting session must not keep
                        // counting the peer as connecting
                        if let Err(InvitationReply::Accept(session)) = reply.send(answer) {
                            debug!(peer = %from, "Invitation answered too late");
                            if let Some(acceptor) = network.session(&session) {
                                acceptor.notify(SessionCallback::StateChanged(from, TransportPeerState::NotConnected));
                            }
                        }
                    }
                    AdvertiseCallback::DidNotStart(reason) => observer.did_not_start_advertising(reason).await,
                }
            }
        });

        Ok(Box::new(LoopbackAdvertiser {
            slot: Arc::new(AdvertiserSlot {
                id: Uuid::new_v4(),
                local: local.clone(),
                service_type: service_type.clone(),
                callbacks,
            }),
            network: Arc::clone(&self.network),
        }))
    }

    async fn browser(
        &self,
        local: &PeerIdentity,
        service_type: &ServiceType,
        observer: Arc<dyn BrowseObserver>,
    ) -> Result<Box<dyn Browser>> {
        let callbacks = spawn_delivery(self.network.shutdown.clone(), move |callback| {
            let observer = Arc::clone(&observer);
            async move {
                match callback {
                    BrowseCallback::Found(peer) => observer.found_peer(peer, None).await,
                    BrowseCallback::Lost(peer) => observer.lost_peer(peer).await,
                    BrowseCallback::DidNotStart(reason) => observer.did_not_start_browsing(reason).await,
                }
            }
        });

        Ok(Box::new(LoopbackBrowser {
            slot: Arc::new(BrowserSlot {
                id: Uuid::new_v4(),
                local: local.clone(),
                service_type: service_type.clone(),
                callbacks,
            }),
            network: Arc::clone(&self.network),
        }))
    }

    fn name(&self) -> &str {
        "Loopback"
    }
}
