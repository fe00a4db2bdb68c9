mod common;

use common::*;
use futures::SinkExt;
use std::collections::HashSet;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use uuid::Uuid;

fn online_set(ev: &serde_json::Value) -> HashSet<String> {
    ev["online"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect()
}

fn ids(users: &[&Session]) -> HashSet<String> {
    users.iter().map(|u| u.id.to_string()).collect()
}

async fn type_to(ws: &mut Ws, receiver: Uuid, draft_len: usize) {
    let frame = serde_json::json!({ "t": "typing", "receiver": receiver, "draft_len": draft_len });
    ws.send(WsMessage::Text(frame.to_string())).await.unwrap();
}

#[tokio::test]
async fn presence_follows_connections() {
    let (addr, server, _state, _tmp) = spawn_server().await;
    let client = reqwest::Client::new();
    let alice = login(&client, addr, "alice@example.com").await;
    let bob = login(&client, addr, "bob@example.com").await;

    let mut alice_ws = connect(addr, &alice.token).await;
    let ev = expect_event(&mut alice_ws, "presence-changed").await;
    assert_eq!(online_set(&ev), ids(&[&alice]));

    let mut bob_tab1 = connect(addr, &bob.token).await;
    let ev = expect_event(&mut alice_ws, "presence-changed").await;
    assert_eq!(online_set(&ev), ids(&[&alice, &bob]));
    let mut bob_tab2 = connect(addr, &bob.token).await;
    expect_event(&mut alice_ws, "presence-changed").await;

    let online: Vec<Uuid> = client
        .get(format!("http://{}/api/online", addr))
        .bearer_auth(&alice.token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(online.len(), 2);

    // bob stays online while one tab remains
    bob_tab1.close(None).await.unwrap();
    let ev = expect_event(&mut alice_ws, "presence-changed").await;
    assert_eq!(online_set(&ev), ids(&[&alice, &bob]));
    bob_tab2.close(None).await.unwrap();
    let ev = expect_event(&mut alice_ws, "presence-changed").await;
    assert_eq!(online_set(&ev), ids(&[&alice]));

    server.abort();
}

#[tokio::test]
async fn typing_is_relayed_and_debounced() {
    let (addr, server, _state, _tmp) = spawn_server().await;
    let client = reqwest::Client::new();
    let alice = login(&client, addr, "alice@example.com").await;
    let bob = login(&client, addr, "bob@example.com").await;
    add_contact(&client, addr, &alice, &bob.email).await;
    let mut alice_ws = connect(addr, &alice.token).await;
    let mut bob_ws = connect(addr, &bob.token).await;

    type_to(&mut alice_ws, bob.id, 3).await;
    let ev = expect_event(&mut bob_ws, "typing").await;
    assert_eq!(ev["sender"], alice.id.to_string());
    assert_eq!(ev["draft_len"], 3);

    // still typing inside the window: swallowed, then the stop goes through
    type_to(&mut alice_ws, bob.id, 4).await;
    type_to(&mut alice_ws, bob.id, 0).await;
    let ev = expect_event(&mut bob_ws, "typing").await;
    assert_eq!(ev["draft_len"], 0);

    // junk frames are ignored and the socket stays usable
    alice_ws
        .send(WsMessage::Text("{\"t\":\"dance\"}".into()))
        .await
        .unwrap();
    alice_ws
        .send(WsMessage::Text("{\"t\":\"ping\"}".into()))
        .await
        .unwrap();
    type_to(&mut alice_ws, bob.id, 1).await;
    let ev = expect_event(&mut bob_ws, "typing").await;
    assert_eq!(ev["draft_len"], 1);

    server.abort();
}

#[tokio::test]
async fn typing_needs_a_contact_edge() {
    let (addr, server, _state, _tmp) = spawn_server().await;
    let client = reqwest::Client::new();
    let carol = login(&client, addr, "carol@example.com").await;
    let bob = login(&client, addr, "bob@example.com").await;
    let mut carol_ws = connect(addr, &carol.token).await;
    let mut bob_ws = connect(addr, &bob.token).await;

    type_to(&mut carol_ws, bob.id, 5).await;
    assert_silent(&mut bob_ws, "typing", Duration::from_millis(300)).await;

    server.abort();
}

#[tokio::test]
async fn disconnect_clears_typing() {
    let (addr, server, _state, _tmp) = spawn_server().await;
    let client = reqwest::Client::new();
    let alice = login(&client, addr, "alice@example.com").await;
    let bob = login(&client, addr, "bob@example.com").await;
    add_contact(&client, addr, &alice, &bob.email).await;
    let mut alice_ws = connect(addr, &alice.token).await;
    let mut bob_ws = connect(addr, &bob.token).await;

    type_to(&mut alice_ws, bob.id, 2).await;
    expect_event(&mut bob_ws, "typing").await;
    alice_ws.close(None).await.unwrap();
    let ev = expect_event(&mut bob_ws, "typing").await;
    assert_eq!(ev["sender"], alice.id.to_string());
    assert_eq!(ev["draft_len"], 0);

    server.abort();
}

#[tokio::test]
async fn socket_requires_token() {
    let (addr, server, _state, _tmp) = spawn_server().await;
    let result = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr)).await;
    assert!(result.is_err());

    // browsers pass the token as a query parameter
    let client = reqwest::Client::new();
    let alice = login(&client, addr, "alice@example.com").await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws?token={}", addr, alice.token))
        .await
        .unwrap();
    let hello = next_event(&mut ws).await;
    assert_eq!(hello["t"], "hello");
    assert_eq!(hello["user_id"], alice.id.to_string());

    server.abort();
}
