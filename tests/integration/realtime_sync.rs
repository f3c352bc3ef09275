// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! Integration tests for the client core against a live socket and REST
//! service.
//!
//! These tests validate:
//! - Authenticating loads the roster (without the local user) and asks for
//!   the presence snapshot once the socket is open
//! - Selecting a peer loads normalized history in service order
//! - A send shows immediately and is replaced by the persisted record
//! - The recipient sees the push and acknowledges delivery exactly once
//! - Read receipts travel back to the sender's conversation
//! - Broadcasts reach every other user regardless of selection
//! - A rejected credential is reported, and logging out releases the socket

mod common;

use common::{FakeService, eventually, start_client, wait_for};
use parley::connection::ConnectionState;
use parley::net::ClientCommand;
use parley::state::ClientNotice;
use parley_proto::message::MessageId;

#[tokio::test]
async fn authenticate_loads_roster_and_presence() {
    let service = FakeService::start(&["alice", "bob", "carol"]).await;

    let mut alice = start_client(&service, "alice").await;
    let snapshot = wait_for(&mut alice, "alice connected with roster", |s| {
        s.connection == ConnectionState::Connected && s.roster.len() == 2
    })
    .await;
    assert_eq!(snapshot.local_user_id.as_deref(), Some("alice"));
    let ids: Vec<&str> = snapshot.roster.iter().map(|u| u.id.as_str()).collect();
    assert_eq!(ids, ["bob", "carol"]);
    assert_eq!(snapshot.roster[0].username, "BOB");

    // The presence snapshot is asked for once the socket is open.
    eventually("presence snapshot requested", || {
        service
            .frames()
            .iter()
            .any(|(user, frame)| user == "alice" && frame["type"] == "get_online_users")
    })
    .await;

    let mut bob = start_client(&service, "bob").await;
    wait_for(&mut bob, "bob connected", |s| {
        s.connection == ConnectionState::Connected
    })
    .await;

    // The snapshot the service sends bob includes alice but never bob.
    let bob_view = wait_for(&mut bob, "bob sees alice online", |s| s.is_online("alice")).await;
    assert!(!bob_view.is_online("bob"));

    let alice_view = wait_for(&mut alice, "alice sees bob online", |s| s.is_online("bob")).await;
    assert!(!alice_view.is_online("alice"));
    assert!(!alice_view.is_online("carol"));

    bob.send(ClientCommand::Shutdown).await;
    bob.task.await.unwrap();
    wait_for(&mut alice, "alice sees bob go offline", |s| !s.is_online("bob")).await;

    alice.send(ClientCommand::Shutdown).await;
    alice.task.await.unwrap();
}

#[tokio::test]
async fn selecting_a_peer_loads_history() {
    let service = FakeService::start(&["alice", "bob", "carol"]).await;
    let first = service.seed("alice", "bob", "hello bob");
    let second = service.seed("bob", "alice", "hi alice");
    service.seed("carol", "alice", "not in this conversation");

    let mut alice = start_client(&service, "alice").await;
    wait_for(&mut alice, "roster", |s| s.roster.len() == 2).await;

    alice
        .send(ClientCommand::SelectPeer {
            peer_id: "bob".into(),
        })
        .await;
    let snapshot = wait_for(&mut alice, "history loaded", |s| {
        s.selected_peer.as_deref() == Some("bob") && !s.is_loading_messages && !s.messages.is_empty()
    })
    .await;

    let ids: Vec<&str> = snapshot.messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, [first.as_str(), second.as_str()]);
    assert_eq!(snapshot.messages[1].sender_id, "bob");
    assert_eq!(snapshot.messages[1].content, "hi alice");
    assert_eq!(snapshot.messages[1].created_at, "2026-01-01T12:00:00Z");

    // History is not a realtime push: nothing is acknowledged.
    assert!(service.receipts().is_empty());
}

#[tokio::test]
async fn conversation_round_trip_with_receipts() {
    let service = FakeService::start(&["alice", "bob"]).await;

    let mut alice = start_client(&service, "alice").await;
    let mut bob = start_client(&service, "bob").await;
    for (client, peer) in [(&mut alice, "bob"), (&mut bob, "alice")] {
        wait_for(client, "connected", |s| {
            s.connection == ConnectionState::Connected && s.roster.len() == 1
        })
        .await;
        client
            .send(ClientCommand::SelectPeer {
                peer_id: peer.into(),
            })
            .await;
        wait_for(client, "empty history loaded", |s| {
            s.selected_peer.as_deref() == Some(peer) && !s.is_loading_messages
        })
        .await;
    }

    alice
        .send(ClientCommand::SendMessage {
            recipient_id: "bob".into(),
            content: "are you there?".into(),
            media_url: None,
            is_broadcast: false,
        })
        .await;

    // The durable write replaces the optimistic entry in place.
    let sent = wait_for(&mut alice, "send reconciled", |s| {
        s.messages.len() == 1 && !s.messages[0].id.is_optimistic()
    })
    .await;
    let id = sent.messages[0].id.clone();
    assert!(id.as_str().starts_with("srv-"));
    assert_eq!(sent.messages[0].content, "are you there?");

    // The realtime copy went out over alice's socket as well.
    eventually("realtime copy recorded", || {
        service
            .frames()
            .iter()
            .any(|(user, frame)| user == "alice" && frame["type"] == "message")
    })
    .await;
    let frames = service.frames();
    let (_, frame) = frames.iter().find(|(_, f)| f["type"] == "message").unwrap();
    assert_eq!(frame["payload"]["content"], "are you there?");
    assert_eq!(frame["payload"]["recipient_id"], "bob");

    // Bob has alice selected, so the push is shown and acknowledged.
    let received = wait_for(&mut bob, "bob receives", |s| s.messages.len() == 1).await;
    assert_eq!(received.messages[0].id, id);
    assert_eq!(received.messages[0].sender_id, "alice");
    eventually("delivery receipt stored", || {
        service
            .record(id.as_str())
            .is_some_and(|r| r["Delivered"] == true)
    })
    .await;
    wait_for(&mut bob, "bob's copy marked delivered", |s| s.messages[0].delivered).await;

    bob.send(ClientCommand::MarkRead {
        message_id: id.clone(),
    })
    .await;
    let read = wait_for(&mut alice, "alice sees read receipt", |s| {
        s.messages.first().is_some_and(|m| m.read)
    })
    .await;
    assert_eq!(read.messages[0].id, id);

    // Marking it read again is a no-op once the flag is set.
    bob.send(ClientCommand::MarkRead {
        message_id: id.clone(),
    })
    .await;
    wait_for(&mut bob, "bob's copy marked read", |s| s.messages[0].read).await;

    let receipts = service.receipts();
    let kinds: Vec<&str> = receipts.iter().map(|r| r.kind.as_str()).collect();
    assert_eq!(kinds, ["delivered", "read"]);
    assert!(receipts.iter().all(|r| r.recipient_id == "bob"));
}

#[tokio::test]
async fn broadcast_reaches_everyone_but_is_not_acknowledged() {
    let service = FakeService::start(&["alice", "bob", "carol"]).await;

    let mut alice = start_client(&service, "alice").await;
    let mut bob = start_client(&service, "bob").await;
    wait_for(&mut alice, "alice connected", |s| {
        s.connection == ConnectionState::Connected
    })
    .await;
    wait_for(&mut bob, "bob connected", |s| {
        s.connection == ConnectionState::Connected && s.roster.len() == 2
    })
    .await;

    // Bob is looking at carol; the broadcast still appears.
    bob.send(ClientCommand::SelectPeer {
        peer_id: "carol".into(),
    })
    .await;
    wait_for(&mut bob, "bob selected carol", |s| {
        s.selected_peer.as_deref() == Some("carol") && !s.is_loading_messages
    })
    .await;

    alice
        .send(ClientCommand::SendMessage {
            recipient_id: String::new(),
            content: "lunch?".into(),
            media_url: None,
            is_broadcast: true,
        })
        .await;

    let snapshot = wait_for(&mut bob, "broadcast shown", |s| !s.messages.is_empty()).await;
    assert!(snapshot.messages[0].is_broadcast);
    assert_eq!(snapshot.messages[0].content, "lunch?");
    assert_eq!(snapshot.messages[0].sender_id, "alice");

    // Not a direct message from the selected peer: no delivery receipt.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert!(service.receipts().is_empty());
}

#[tokio::test]
async fn message_for_another_conversation_is_not_shown() {
    let service = FakeService::start(&["alice", "bob", "carol"]).await;

    let mut alice = start_client(&service, "alice").await;
    wait_for(&mut alice, "connected", |s| {
        s.connection == ConnectionState::Connected && s.roster.len() == 2
    })
    .await;
    alice
        .send(ClientCommand::SelectPeer {
            peer_id: "bob".into(),
        })
        .await;
    wait_for(&mut alice, "bob selected", |s| {
        s.selected_peer.as_deref() == Some("bob") && !s.is_loading_messages
    })
    .await;

    service.push(
        "alice",
        &serde_json::json!({"type": "message", "payload": {
            "ID": "srv-carol", "SenderID": "carol", "RecipientID": "alice", "Content": "psst"
        }}),
    );
    service.push(
        "alice",
        &serde_json::json!({"type": "message", "payload": {
            "ID": "srv-bob", "SenderID": "bob", "RecipientID": "alice", "Content": "hey"
        }}),
    );

    let snapshot = wait_for(&mut alice, "bob's push shown", |s| !s.messages.is_empty()).await;
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(snapshot.messages[0].id, MessageId::new("srv-bob"));
    assert_eq!(snapshot.messages[0].sender_id, "bob");
}

#[tokio::test]
async fn rejected_credential_is_reported_and_logout_clears_session() {
    let service = FakeService::start(&["alice", "bob"]).await;
    service.reject_credentials(true);

    let mut alice = start_client(&service, "alice").await;
    let notice = tokio::time::timeout(std::time::Duration::from_secs(10), alice.notices.recv())
        .await
        .expect("timed out waiting for notice")
        .expect("notice channel closed");
    assert_eq!(notice, ClientNotice::AuthenticationInvalid);
    assert_eq!(alice.snapshot().local_user_id.as_deref(), Some("alice"));

    // Clearing the credential is the application's call.
    alice.send(ClientCommand::Logout).await;
    let snapshot = wait_for(&mut alice, "session cleared", |s| {
        s.local_user_id.is_none() && s.connection == ConnectionState::Disconnected
    })
    .await;
    assert!(snapshot.roster.is_empty());
    assert!(snapshot.messages.is_empty());

    eventually("socket released", || service.open_sockets() == 0).await;
}
