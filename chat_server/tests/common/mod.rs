#![allow(dead_code)]

use chat_server::{
    api::{build_router, AppState},
    auth,
    config::{Config, JwtSecret},
};
use futures::StreamExt;
use serde_json::Value;
use std::net::{SocketAddr, TcpListener};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async, tungstenite::client::IntoClientRequest, tungstenite::Message as WsMessage,
    MaybeTlsStream, WebSocketStream,
};
use uuid::Uuid;

pub const SECRET: &[u8] = b"integration-secret";

pub type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub async fn spawn_server() -> (SocketAddr, JoinHandle<()>, AppState, tempfile::TempDir) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    listener.set_nonblocking(true).unwrap();

    let tmp = tempfile::tempdir().unwrap();
    let config = Config {
        bind: addr.to_string(),
        data_dir: tmp.path().to_path_buf(),
        logging_enabled: false,
        jwt_secret: JwtSecret(SECRET.to_vec()),
        typing_debounce: Duration::from_secs(1),
    };
    let state = AppState::new(config).await.unwrap();
    let app = build_router(state.clone());
    let server = tokio::spawn(async move {
        axum::Server::from_tcp(listener)
            .unwrap()
            .serve(app.into_make_service())
            .await
            .unwrap();
    });
    (addr, server, state, tmp)
}

pub struct Session {
    pub id: Uuid,
    pub email: String,
    pub token: String,
}

/// Mint a token for a fresh user and make the first authenticated call so
/// the account exists.
pub async fn login(client: &reqwest::Client, addr: SocketAddr, email: &str) -> Session {
    let id = Uuid::new_v4();
    let token = auth::issue_jwt(SECRET, &id, email, time::Duration::minutes(10)).unwrap();
    let resp = client
        .get(format!("http://{}/api/me", addr))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    Session {
        id,
        email: email.into(),
        token,
    }
}

pub async fn add_contact(client: &reqwest::Client, addr: SocketAddr, who: &Session, email: &str) {
    let resp = client
        .post(format!("http://{}/api/contact", addr))
        .bearer_auth(&who.token)
        .json(&serde_json::json!({ "email": email }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::CREATED);
}

pub async fn send_text(
    client: &reqwest::Client,
    addr: SocketAddr,
    from: &Session,
    to: &Session,
    text: &str,
) -> Value {
    let resp = client
        .post(format!("http://{}/api/message", addr))
        .bearer_auth(&from.token)
        .json(&serde_json::json!({ "receiver": to.id, "text": text }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::CREATED);
    resp.json().await.unwrap()
}

pub async fn fetch_conversation(
    client: &reqwest::Client,
    addr: SocketAddr,
    who: &Session,
    with: &Session,
) -> Vec<Value> {
    let resp = client
        .get(format!("http://{}/api/messages/{}", addr, with.id))
        .bearer_auth(&who.token)
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    resp.json().await.unwrap()
}

/// Open a socket and consume the hello frame. Once hello has arrived the
/// connection is registered.
pub async fn connect(addr: SocketAddr, token: &str) -> Ws {
    let mut req = format!("ws://{}/ws", addr).into_client_request().unwrap();
    req.headers_mut()
        .append("Authorization", format!("Bearer {}", token).parse().unwrap());
    let (mut ws, _) = connect_async(req).await.unwrap();
    let hello = next_event(&mut ws).await;
    assert_eq!(hello["t"], "hello");
    ws
}

pub async fn next_event(ws: &mut Ws) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for event")
            .expect("socket closed")
            .unwrap();
        if let WsMessage::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Skip events until one of the given kind arrives.
pub async fn expect_event(ws: &mut Ws, kind: &str) -> Value {
    loop {
        let ev = next_event(ws).await;
        if ev["t"] == kind {
            return ev;
        }
    }
}

/// Fail if an event of `kind` arrives within `window`.
pub async fn assert_silent(ws: &mut Ws, kind: &str, window: Duration) {
    let deadline = tokio::time::Instant::now() + window;
    loop {
        match tokio::time::timeout_at(deadline, ws.next()).await {
            Err(_) => return,
            Ok(None) => return,
            Ok(Some(frame)) => {
                if let Ok(WsMessage::Text(text)) = frame {
                    let ev: Value = serde_json::from_str(&text).unwrap();
                    assert_ne!(ev["t"], kind, "unexpected event {}", ev);
                }
            }
        }
    }
}

/// Wait for the server to end the socket, skipping any frames still queued.
pub async fn assert_closed(ws: &mut Ws) {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for close");
        match frame {
            None | Some(Err(_)) | Some(Ok(WsMessage::Close(_))) => return,
            Some(Ok(_)) => {}
        }
    }
}
