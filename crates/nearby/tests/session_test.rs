mod common;

use common::{mock_manager, test_config};
use nearby::{
    ConnectionState, InvitationReply, NearbyEvent, PeerIdentity, Role, SessionState, StatusValue, TransportPeerState,
};
use std::sync::atomic::Ordering;

#[tokio::test]
async fn test_start_sender_advertises() {
    let (manager, transport) = mock_manager(test_config("Alice"));
    let mut events = manager.listen().await;

    manager.start(Role::Sender).await.unwrap();

    assert_eq!(events.drain(), vec![NearbyEvent::status(StatusValue::Advertising)]);
    assert_eq!(manager.session_state().await, SessionState::Advertising);
    assert_eq!(manager.role().await, Some(Role::Sender));

    let generation = transport.latest();
    assert!(generation.advertise_observer.is_some());
    assert!(generation.browse_observer.is_none());
    assert!(generation.discovery.unwrap().running.load(Ordering::SeqCst));
    assert_eq!(generation.session.encryption, nearby::EncryptionPreference::Required);
}

#[tokio::test]
async fn test_start_receiver_browses() {
    let (manager, transport) = mock_manager(test_config("Bob"));
    let mut events = manager.listen().await;

    manager.start(Role::Receiver).await.unwrap();

    assert_eq!(events.drain(), vec![NearbyEvent::status(StatusValue::Browsing)]);
    assert_eq!(manager.session_state().await, SessionState::Browsing);
    assert!(transport.latest().browse_observer.is_some());
}

#[tokio::test]
async fn test_invalid_role_rejected_without_side_effects() {
    let (manager, transport) = mock_manager(test_config("Alice"));
    manager.start(Role::Sender).await.unwrap();
    let mut events = manager.listen().await;

    for role in ["banana", "", "SENDER"] {
        let err = manager.start_with_role(role).await.unwrap_err();
        assert_eq!(err.code(), "bad_args");
    }

    assert!(events.drain().is_empty());
    assert_eq!(transport.opened(), 1);
    assert_eq!(manager.session_state().await, SessionState::Advertising);
    assert!(!transport.latest().session.is_disconnected());
}

#[tokio::test]
async fn test_restart_replaces_generation_without_idle() {
    let (manager, transport) = mock_manager(test_config("Alice"));
    let mut events = manager.listen().await;

    manager.start(Role::Sender).await.unwrap();
    manager.start(Role::Receiver).await.unwrap();

    assert_eq!(
        events.drain(),
        vec![
            NearbyEvent::status(StatusValue::Advertising),
            NearbyEvent::status(StatusValue::Browsing),
        ]
    );

    let first = transport.generation(0);
    assert!(first.session.is_disconnected());
    assert!(first.discovery.unwrap().stopped.load(Ordering::SeqCst));
    assert!(!transport.generation(1).session.is_disconnected());
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let (manager, transport) = mock_manager(test_config("Alice"));
    let mut events = manager.listen().await;

    // A fresh manager reports idle once, then stays quiet
    manager.stop().await;
    manager.stop().await;
    assert_eq!(events.drain(), vec![NearbyEvent::status(StatusValue::Idle)]);

    manager.start(Role::Sender).await.unwrap();
    manager.stop().await;
    manager.stop().await;

    assert_eq!(
        events.drain(),
        vec![
            NearbyEvent::status(StatusValue::Advertising),
            NearbyEvent::status(StatusValue::Idle),
        ]
    );
    assert_eq!(manager.session_state().await, SessionState::Idle);
    assert!(manager.local_identity().await.is_none());
    assert!(transport.latest().session.is_disconnected());
}

#[tokio::test]
async fn test_send_without_session_or_peers_is_noop() {
    let (manager, transport) = mock_manager(test_config("Alice"));
    let mut events = manager.listen().await;

    let payloads = ["{\"x\":1}", "", "{\"x\":", "not json", "héllo ✓"];
    for payload in payloads {
        manager.send(payload).await;
    }
    assert!(events.drain().is_empty());

    manager.start(Role::Sender).await.unwrap();
    events.drain();

    for payload in payloads {
        manager.send(payload).await;
    }
    assert!(events.drain().is_empty());
    assert!(transport.latest().session.sent().is_empty());
}

#[tokio::test]
async fn test_send_reaches_every_connected_peer() {
    let (manager, transport) = mock_manager(test_config("Alice"));
    manager.start(Role::Sender).await.unwrap();
    let mut events = manager.listen().await;

    let session = transport.latest().session;
    let bob = PeerIdentity::new("Bob");
    let carol = PeerIdentity::new("Carol");
    session.connect(&bob);
    session.connect(&carol);

    manager.send("{\"x\":1}").await;

    assert_eq!(events.drain(), vec![NearbyEvent::Sent]);
    let sent = session.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, b"{\"x\":1}".to_vec());
    assert_eq!(sent[0].1, vec![bob, carol]);
}

#[tokio::test]
async fn test_send_failure_reports_error_and_keeps_session() {
    let (manager, transport) = mock_manager(test_config("Alice"));
    manager.start(Role::Sender).await.unwrap();
    let mut events = manager.listen().await;

    let session = transport.latest().session;
    session.connect(&PeerIdentity::new("Bob"));
    session.fail_sends.store(true, Ordering::SeqCst);

    manager.send("{}").await;
    assert_eq!(events.drain(), vec![NearbyEvent::send_failed()]);
    assert!(manager.is_active().await);

    session.fail_sends.store(false, Ordering::SeqCst);
    manager.send("{}").await;
    assert_eq!(events.drain(), vec![NearbyEvent::Sent]);
}

#[tokio::test]
async fn test_peer_state_changes_become_events() {
    let (manager, transport) = mock_manager(test_config("Bob"));
    manager.start(Role::Receiver).await.unwrap();
    let mut events = manager.listen().await;

    let observer = transport.latest().session_observer;
    let alice = PeerIdentity::new("Alice");

    observer
        .peer_changed_state(alice.clone(), TransportPeerState::Connecting)
        .await;
    assert_eq!(manager.session_state().await, SessionState::Connecting);

    observer
        .peer_changed_state(alice.clone(), TransportPeerState::Connected)
        .await;
    assert_eq!(manager.session_state().await, SessionState::Connected);

    observer
        .peer_changed_state(alice.clone(), TransportPeerState::Unknown(42))
        .await;

    observer
        .peer_changed_state(alice.clone(), TransportPeerState::NotConnected)
        .await;
    assert_eq!(manager.session_state().await, SessionState::Disconnected);

    assert_eq!(
        events.drain(),
        vec![
            NearbyEvent::status(StatusValue::Connecting),
            NearbyEvent::connected("Alice"),
            NearbyEvent::disconnected("Alice"),
        ]
    );

    let peers = manager.peers().await;
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].identity, alice);
    assert_eq!(peers[0].connection_state, ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_any_connected_peer_wins_posture() {
    let (manager, transport) = mock_manager(test_config("Alice"));
    manager.start(Role::Sender).await.unwrap();

    let observer = transport.latest().session_observer;
    observer
        .peer_changed_state(PeerIdentity::new("Bob"), TransportPeerState::Connected)
        .await;
    observer
        .peer_changed_state(PeerIdentity::new("Carol"), TransportPeerState::Connecting)
        .await;
    observer
        .peer_changed_state(PeerIdentity::new("Dave"), TransportPeerState::NotConnected)
        .await;

    assert_eq!(manager.session_state().await, SessionState::Connected);
}

#[tokio::test]
async fn test_received_data_becomes_payload() {
    let (manager, transport) = mock_manager(test_config("Bob"));
    manager.start(Role::Receiver).await.unwrap();
    let mut events = manager.listen().await;

    let observer = transport.latest().session_observer;
    let alice = PeerIdentity::new("Alice");

    observer
        .received_data(b"{\"x\":1}".to_vec(), alice.clone())
        .await;
    // Not UTF-8, dropped
    observer.received_data(vec![0xff, 0xfe, 0x00], alice.clone()).await;
    // Streams and resources are ignored
    observer.received_stream("video".to_string(), alice.clone()).await;
    observer
        .started_receiving_resource("photo.jpg".to_string(), alice.clone())
        .await;
    observer
        .finished_receiving_resource("photo.jpg".to_string(), alice, None)
        .await;

    assert_eq!(events.drain(), vec![NearbyEvent::payload("{\"x\":1}")]);
}

#[tokio::test]
async fn test_receiver_invites_found_peers() {
    let (manager, transport) = mock_manager(test_config("Bob"));
    manager.start(Role::Receiver).await.unwrap();
    let mut events = manager.listen().await;

    let generation = transport.latest();
    let alice = PeerIdentity::new("Alice");
    let browse = generation.browse_observer.unwrap();
    browse.found_peer(alice.clone(), None).await;
    browse.lost_peer(alice.clone()).await;
    browse.did_not_start_browsing("radio off".to_string()).await;

    let invites = generation.discovery.unwrap().invites();
    assert_eq!(invites.len(), 1);
    assert_eq!(invites[0].0, alice);
    assert_eq!(invites[0].1, generation.session.id);
    assert_eq!(invites[0].2, manager.config().invite_timeout);

    // Discovery callbacks never reach the consumer
    assert!(events.drain().is_empty());
}

#[tokio::test]
async fn test_sender_accepts_invitations() {
    let (manager, transport) = mock_manager(test_config("Alice"));
    manager.start(Role::Sender).await.unwrap();

    let generation = transport.latest();
    let advertise = generation.advertise_observer.unwrap();

    for name in ["Bob", "Carol", "Dave"] {
        let reply = advertise.received_invitation(PeerIdentity::new(name), None).await;
        assert_eq!(reply, InvitationReply::Accept(generation.session.id));
    }
}

#[tokio::test]
async fn test_peer_cap_declines_extra_invitations() {
    let (manager, transport) = mock_manager(test_config("Alice").with_max_peers(1));
    manager.start(Role::Sender).await.unwrap();

    let generation = transport.latest();
    let advertise = generation.advertise_observer.unwrap();
    let bob = PeerIdentity::new("Bob");

    let reply = advertise.received_invitation(bob.clone(), None).await;
    assert_eq!(reply, InvitationReply::Accept(generation.session.id));

    generation
        .session_observer
        .peer_changed_state(bob.clone(), TransportPeerState::Connected)
        .await;
    let reply = advertise.received_invitation(PeerIdentity::new("Carol"), None).await;
    assert_eq!(reply, InvitationReply::Decline);

    // A disconnected peer frees its slot
    generation
        .session_observer
        .peer_changed_state(bob, TransportPeerState::NotConnected)
        .await;
    let reply = advertise.received_invitation(PeerIdentity::new("Carol"), None).await;
    assert_eq!(reply, InvitationReply::Accept(generation.session.id));
}

#[tokio::test]
async fn test_accepted_invitations_count_against_cap() {
    let (manager, transport) = mock_manager(test_config("Alice").with_max_peers(1));
    manager.start(Role::Sender).await.unwrap();

    let generation = transport.latest();
    let advertise = generation.advertise_observer.unwrap();

    // Back-to-back invitations before the transport reports any peer state
    let first = advertise.received_invitation(PeerIdentity::new("Bob"), None).await;
    let second = advertise.received_invitation(PeerIdentity::new("Carol"), None).await;

    assert_eq!(first, InvitationReply::Accept(generation.session.id));
    assert_eq!(second, InvitationReply::Decline);
    assert_eq!(manager.session_state().await, SessionState::Connecting);
}

#[tokio::test]
async fn test_send_payload_bytes_unchanged() {
    let (manager, transport) = mock_manager(test_config("Alice"));
    manager.start(Role::Sender).await.unwrap();
    let session = transport.latest().session;
    session.connect(&PeerIdentity::new("Bob"));

    for payload in ["", "{\"x\":", "{\"m\":\"héllo ✓ 日本\"}"] {
        manager.send(payload).await;
        let sent = session.sent();
        assert_eq!(sent.last().unwrap().0, payload.as_bytes().to_vec());
    }
}

#[tokio::test]
async fn test_failed_open_leaves_manager_idle() {
    let (manager, transport) = mock_manager(test_config("Alice"));
    let mut events = manager.listen().await;
    transport.fail_open.store(true, Ordering::SeqCst);

    let err = manager.start(Role::Sender).await.unwrap_err();
    assert_eq!(err.code(), "transport_error");
    assert!(events.drain().is_empty());
    assert_eq!(manager.session_state().await, SessionState::Idle);
}

#[tokio::test]
async fn test_failed_restart_reports_idle_once() {
    let (manager, transport) = mock_manager(test_config("Alice"));
    manager.start(Role::Sender).await.unwrap();
    let mut events = manager.listen().await;

    transport.fail_discovery.store(true, Ordering::SeqCst);
    assert!(manager.start(Role::Receiver).await.is_err());

    assert_eq!(events.drain(), vec![NearbyEvent::status(StatusValue::Idle)]);
    assert_eq!(manager.session_state().await, SessionState::Idle);
    // The half-opened session of the failed start is released too
    assert!(transport.generation(1).session.is_disconnected());

    manager.stop().await;
    assert!(events.drain().is_empty());
}

#[tokio::test]
async fn test_new_listener_replaces_previous() {
    let (manager, transport) = mock_manager(test_config("Alice"));
    let mut first = manager.listen().await;
    manager.start(Role::Sender).await.unwrap();

    let mut second = manager.listen().await;
    transport
        .latest()
        .session_observer
        .received_data(b"{}".to_vec(), PeerIdentity::new("Bob"))
        .await;

    assert_eq!(first.recv().await, Some(NearbyEvent::status(StatusValue::Advertising)));
    assert_eq!(first.recv().await, None);
    assert_eq!(second.drain(), vec![NearbyEvent::payload("{}")]);

    manager.cancel_listen().await;
    manager.stop().await;
    assert_eq!(second.recv().await, None);
}
