// Scripted transport for driving the session manager by hand.
// Every handle and observer the manager creates is captured so tests can fire
// callbacks of any generation directly.

#![allow(dead_code)]

use async_trait::async_trait;
use nearby::{
    AdvertiseObserver, Advertiser, BrowseObserver, Browser, EncryptionPreference, EventStream, NearbyConfig,
    NearbyError, NearbyEvent, PeerIdentity, PeerSessionManager, Result, ServiceType, SessionId,
    SessionObserver, Transport, TransportSession,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug)]
pub struct MockSession {
    pub id: SessionId,
    pub local: PeerIdentity,
    pub encryption: EncryptionPreference,
    pub connected: Mutex<Vec<PeerIdentity>>,
    pub sent: Mutex<Vec<(Vec<u8>, Vec<PeerIdentity>)>>,
    pub fail_sends: AtomicBool,
    pub disconnected: AtomicBool,
}

impl MockSession {
    /// Put a peer into the connected set as the transport would
    pub fn connect(&self, peer: &PeerIdentity) {
        self.connected.lock().unwrap().push(peer.clone());
    }

    pub fn sent(&self) -> Vec<(Vec<u8>, Vec<PeerIdentity>)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportSession for MockSession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn local_peer(&self) -> &PeerIdentity {
        &self.local
    }

    async fn connected_peers(&self) -> Vec<PeerIdentity> {
        self.connected.lock().unwrap().clone()
    }

    async fn send(&self, data: Vec<u8>, to: &[PeerIdentity]) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(NearbyError::SendFailed("scripted failure".to_string()));
        }
        self.sent.lock().unwrap().push((data, to.to_vec()));
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
        self.connected.lock().unwrap().clear();
    }
}

/// Discovery role handle; records lifecycle calls and invitations
#[derive(Debug, Default)]
pub struct MockDiscovery {
    pub running: AtomicBool,
    pub stopped: AtomicBool,
    pub invites: Mutex<Vec<(PeerIdentity, SessionId, Duration)>>,
}

impl MockDiscovery {
    pub fn invites(&self) -> Vec<(PeerIdentity, SessionId, Duration)> {
        self.invites.lock().unwrap().clone()
    }
}

#[derive(Debug)]
struct DiscoveryHandle(Arc<MockDiscovery>);

#[async_trait]
impl Advertiser for DiscoveryHandle {
    async fn start(&self) -> Result<()> {
        self.0.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) {
        self.0.running.store(false, Ordering::SeqCst);
        self.0.stopped.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Browser for DiscoveryHandle {
    async fn start(&self) -> Result<()> {
        self.0.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) {
        self.0.running.store(false, Ordering::SeqCst);
        self.0.stopped.store(true, Ordering::SeqCst);
    }

    async fn invite_peer(
        &self,
        peer: &PeerIdentity,
        session: SessionId,
        _context: Option<Vec<u8>>,
        timeout: Duration,
    ) -> Result<()> {
        self.0.invites.lock().unwrap().push((peer.clone(), session, timeout));
        Ok(())
    }
}

/// Everything captured for one start of the manager
#[derive(Clone)]
pub struct Generation {
    pub session: Arc<MockSession>,
    pub session_observer: Arc<dyn SessionObserver>,
    pub advertise_observer: Option<Arc<dyn AdvertiseObserver>>,
    pub browse_observer: Option<Arc<dyn BrowseObserver>>,
    pub discovery: Option<Arc<MockDiscovery>>,
}

#[derive(Default)]
pub struct MockTransport {
    generations: Mutex<Vec<Generation>>,
    pub fail_open: AtomicBool,
    pub fail_discovery: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn generation(&self, index: usize) -> Generation {
        self.generations.lock().unwrap()[index].clone()
    }

    pub fn latest(&self) -> Generation {
        self.generations
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no session opened yet")
    }

    pub fn opened(&self) -> usize {
        self.generations.lock().unwrap().len()
    }

    fn attach_discovery(&self) -> Result<Arc<MockDiscovery>> {
        if self.fail_discovery.load(Ordering::SeqCst) {
            return Err(NearbyError::TransportError("scripted discovery failure".to_string()));
        }
        let discovery = Arc::new(MockDiscovery::default());
        if let Some(last) = self.generations.lock().unwrap().last_mut() {
            last.discovery = Some(Arc::clone(&discovery));
        }
        Ok(discovery)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open_session(
        &self,
        local: &PeerIdentity,
        encryption: EncryptionPreference,
        observer: Arc<dyn SessionObserver>,
    ) -> Result<Arc<dyn TransportSession>> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(NearbyError::TransportError("scripted open failure".to_string()));
        }

        let session = Arc::new(MockSession {
            id: SessionId::new(),
            local: local.clone(),
            encryption,
            connected: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            fail_sends: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
        });
        self.generations.lock().unwrap().push(Generation {
            session: Arc::clone(&session),
            session_observer: observer,
            advertise_observer: None,
            browse_observer: None,
            discovery: None,
        });
        Ok(session)
    }

    async fn advertiser(
        &self,
        _local: &PeerIdentity,
        _service_type: &ServiceType,
        observer: Arc<dyn AdvertiseObserver>,
    ) -> Result<Box<dyn Advertiser>> {
        let discovery = self.attach_discovery()?;
        if let Some(last) = self.generations.lock().unwrap().last_mut() {
            last.advertise_observer = Some(observer);
        }
        Ok(Box::new(DiscoveryHandle(discovery)))
    }

    async fn browser(
        &self,
        _local: &PeerIdentity,
        _service_type: &ServiceType,
        observer: Arc<dyn BrowseObserver>,
    ) -> Result<Box<dyn Browser>> {
        let discovery = self.attach_discovery()?;
        if let Some(last) = self.generations.lock().unwrap().last_mut() {
            last.browse_observer = Some(observer);
        }
        Ok(Box::new(DiscoveryHandle(discovery)))
    }

    fn name(&self) -> &str {
        "Mock"
    }
}

pub fn mock_manager(config: NearbyConfig) -> (PeerSessionManager, Arc<MockTransport>) {
    let transport = MockTransport::new();
    let manager = PeerSessionManager::new(transport.clone(), config);
    (manager, transport)
}

pub fn test_config(name: &str) -> NearbyConfig {
    NearbyConfig::default()
        .with_display_name(name)
        .with_invite_timeout(Duration::from_secs(2))
}

/// Wait for the next event matching the predicate, returning everything seen on the way
pub async fn collect_until<F>(events: &mut EventStream, mut done: F) -> Vec<NearbyEvent>
where
    F: FnMut(&NearbyEvent) -> bool,
{
    let mut seen = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = events.recv().await {
            let finished = done(&event);
            seen.push(event);
            if finished {
                return;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out, saw {:?}", seen));
    seen
}
