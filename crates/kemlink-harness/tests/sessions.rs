//! Pairwise handshakes and messages between parties on a shared relay.

#![allow(clippy::unwrap_used)]

mod common;

use std::{sync::Arc, time::Duration};

use common::{CountingKem, WAIT, World, eventually, peer};
use kemlink_client::{ClientAction, ClientConfig, ClientError, HandshakeRole};
use kemlink_core::{Transport, TransportError};
use kemlink_harness::{HarnessError, Observed};
use kemlink_proto::MessageContent;

#[tokio::test]
async fn both_sides_derive_the_same_key() {
    let world = World::new(1);
    let alice = world.join("alice").await;
    let mut bob = world.join("bob").await;

    alice.client().establish(&peer("bob")).await.unwrap();
    bob.expect(WAIT, "session from alice", |a| {
        matches!(a, ClientAction::SessionEstablished { role: HandshakeRole::Responder, .. })
    })
    .await
    .unwrap();

    let a = alice.client().session_key(&peer("bob")).unwrap();
    let b = bob.client().session_key(&peer("alice")).unwrap();
    assert_eq!(a.as_bytes(), b.as_bytes());
    assert_eq!(alice.client().session(&peer("bob")).unwrap().role, HandshakeRole::Initiator);
}

#[tokio::test]
async fn hello_reaches_the_peer() {
    let world = World::new(2);
    let alice = world.join("alice").await;
    let mut bob = world.join("bob").await;

    alice.client().send_message(&peer("bob"), &MessageContent::text("Hello!")).await.unwrap();

    let delivered = bob
        .expect(WAIT, "hello", |a| matches!(a, ClientAction::DeliverMessage { .. }))
        .await
        .unwrap();
    assert_eq!(
        delivered,
        ClientAction::DeliverMessage { from: peer("alice"), content: MessageContent::text("Hello!") }
    );
    assert!(bob.take_errors().is_empty());
}

#[tokio::test]
async fn replies_use_the_responder_session() {
    let world = World::new(3);
    let mut alice = world.join("alice").await;
    let mut bob = world.join("bob").await;

    alice.client().send_message(&peer("bob"), &MessageContent::text("ping")).await.unwrap();
    bob.expect(WAIT, "ping", |a| matches!(a, ClientAction::DeliverMessage { .. })).await.unwrap();

    bob.client().send_message(&peer("alice"), &MessageContent::text("pong")).await.unwrap();
    let reply = alice
        .expect(WAIT, "pong", |a| matches!(a, ClientAction::DeliverMessage { .. }))
        .await
        .unwrap();
    assert_eq!(
        reply,
        ClientAction::DeliverMessage { from: peer("bob"), content: MessageContent::text("pong") }
    );
}

#[tokio::test]
async fn repeated_establish_costs_no_crypto() {
    let world = World::new(4);
    let kem = Arc::new(CountingKem::default());
    let alice = world.join_with("alice", kem.clone(), ClientConfig::default()).await;
    let _bob = world.join("bob").await;

    alice.client().establish(&peer("bob")).await.unwrap();
    let first = alice.client().session_key(&peer("bob")).unwrap();
    assert_eq!(kem.ops(), 1);

    for _ in 0..3 {
        alice.client().establish(&peer("bob")).await.unwrap();
    }
    assert_eq!(kem.ops(), 1);
    assert_eq!(alice.client().session_key(&peer("bob")).unwrap().as_bytes(), first.as_bytes());
}

#[tokio::test]
async fn simultaneous_establish_keeps_one_key_each() {
    let world = World::new(5);
    let mut alice = world.join("alice").await;
    let mut bob = world.join("bob").await;

    let (to_bob, to_alice) = (peer("bob"), peer("alice"));
    let (a, b) = tokio::join!(alice.client().establish(&to_bob), bob.client().establish(&to_alice));
    a.unwrap();
    b.unwrap();

    let alice_key = alice.client().session_key(&peer("bob")).unwrap();
    let bob_key = bob.client().session_key(&peer("alice")).unwrap();

    // Let the crossing ciphertexts arrive; neither may replace a stored key.
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(alice.client().session_key(&peer("bob")).unwrap().as_bytes(), alice_key.as_bytes());
    assert_eq!(bob.client().session_key(&peer("alice")).unwrap().as_bytes(), bob_key.as_bytes());
    assert!(alice.take_errors().is_empty());
    assert!(bob.take_errors().is_empty());
}

#[tokio::test]
async fn concurrent_establish_calls_share_one_handshake() {
    let world = World::new(6);
    let kem = Arc::new(CountingKem::default());
    let alice = world.join_with("alice", kem.clone(), ClientConfig::default()).await;
    let _bob = world.join("bob").await;

    let bob = peer("bob");
    let (a, b, c) = tokio::join!(
        alice.client().establish(&bob),
        alice.client().establish(&bob),
        alice.client().establish(&bob),
    );
    a.unwrap();
    b.unwrap();
    c.unwrap();
    assert_eq!(kem.ops(), 1);
}

#[tokio::test]
async fn unknown_peer_is_unavailable() {
    let world = World::new(7);
    let alice = world.join("alice").await;

    let err = alice.client().establish(&peer("ghost")).await.unwrap_err();
    assert!(matches!(err, ClientError::PeerUnavailable { ref peer, .. } if *peer == common::peer("ghost")));
    assert!(!alice.client().has_session(&peer("ghost")));
}

#[tokio::test]
async fn peer_without_published_key_is_unavailable() {
    let world = World::new(8);
    let alice = world.join("alice").await;
    let (_handle, _inbox) = world.relay.register(&peer("mute")).unwrap();

    let err = alice
        .client()
        .establish_with_timeout(&peer("mute"), Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::PeerUnavailable { .. }));
}

#[tokio::test]
async fn message_without_session_is_reported() {
    let world = World::new(9);
    let mut bob = world.join("bob").await;
    let alice = world.join("alice").await;

    assert!(common::knows(&alice, &["bob"]).await);
    alice.client().establish(&peer("bob")).await.unwrap();
    bob.expect(WAIT, "session", |a| matches!(a, ClientAction::SessionEstablished { .. }))
        .await
        .unwrap();

    assert!(bob.client().reset_session(&peer("alice")));
    alice.client().send_message(&peer("bob"), &MessageContent::text("lost")).await.unwrap();

    let mut errors = Vec::new();
    let reported = eventually(|| {
        errors.extend(bob.take_errors());
        errors.iter().any(|e| matches!(e, ClientError::NoSession { peer } if *peer == common::peer("alice")))
    })
    .await;
    assert!(reported, "{errors:?}");
}

#[tokio::test]
async fn auto_establish_handshakes_with_the_directory() {
    let world = World::new(10);
    let mut bob = world.join("bob").await;
    let mut carol = world.join("carol").await;

    let config = ClientConfig { auto_establish: true, ..ClientConfig::default() };
    let mut alice = world.join_with("alice", Arc::new(kemlink_crypto::MlKem512), config).await;

    for name in ["bob", "carol"] {
        alice
            .expect(WAIT, name, |a| {
                matches!(a, ClientAction::SessionEstablished { peer, role: HandshakeRole::Initiator } if *peer == common::peer(name))
            })
            .await
            .unwrap();
    }
    for party in [&mut bob, &mut carol] {
        party
            .expect(WAIT, "session from alice", |a| {
                matches!(a, ClientAction::SessionEstablished { role: HandshakeRole::Responder, .. })
            })
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn presence_follows_the_relay() {
    let world = World::new(11);
    let mut alice = world.join("alice").await;
    let _bob = world.join("bob").await;

    assert!(eventually(|| alice.client().online_peers() == vec![peer("bob")]).await);
    alice.drain();

    assert!(world.relay.disconnect(&peer("bob")));
    alice
        .expect(WAIT, "bob gone", |a| matches!(a, ClientAction::PeersChanged { online } if online.is_empty()))
        .await
        .unwrap();
}

#[tokio::test]
async fn taken_name_is_refused() {
    let world = World::new(12);
    let _alice = world.join("alice").await;

    let result = kemlink_harness::Party::join(
        &world.relay,
        &peer("alice"),
        world.env.fork(),
        Arc::new(kemlink_crypto::MlKem512),
        ClientConfig::default(),
    )
    .await;
    assert!(matches!(
        result,
        Err(HarnessError::Transport(TransportError::UsernameTaken { .. }))
    ));
}

#[tokio::test]
async fn errors_do_not_stop_the_pump() {
    let world = World::new(13);
    let mut bob = world.join("bob").await;
    let alice = world.join("alice").await;

    let (mallory, _inbox) = world.relay.register(&peer("mallory")).unwrap();
    mallory.send_to_peer(&peer("bob"), vec![0xff; 8]).await.unwrap();

    alice.client().send_message(&peer("bob"), &MessageContent::text("still here")).await.unwrap();
    bob.expect(WAIT, "message after garbage", |a| matches!(a, ClientAction::DeliverMessage { .. }))
        .await
        .unwrap();
    assert!(bob.drain().iter().any(|o| matches!(o, Observed::Error(ClientError::Protocol(_)))));
}
