//! End-to-end tests against a live server on an ephemeral port.

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tryst_core::{MatchRelation, MemoryStore};
use tryst_protocol::{codec, Event, EventKind, MatchId, PresenceStatus, UserId};
use tryst_server::auth::{issue_token, Claims};
use tryst_server::config::Config;
use tryst_server::handlers::{serve, AppState};

const SECRET: &str = "e2e-secret";
const WAIT: Duration = Duration::from_secs(5);

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Server {
    addr: SocketAddr,
    a: UserId,
    b: UserId,
    outsider: UserId,
    ab: MatchId,
}

async fn start() -> Server {
    let store = Arc::new(MemoryStore::new());
    let (a, b, outsider) = (UserId::new_v4(), UserId::new_v4(), UserId::new_v4());
    let ab = MatchId::new_v4();
    store.add_match(MatchRelation::new(ab, a, b));

    let mut config = Config::default();
    config.auth.jwt_secret = SECRET.to_string();
    config.metrics.enabled = false;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(AppState::new(config, store));
    tokio::spawn(serve(listener, state));

    Server {
        addr,
        a,
        b,
        outsider,
        ab,
    }
}

fn token(user: UserId) -> String {
    issue_token(
        SECRET.as_bytes(),
        &Claims::new(user, "e2e@tryst.test", chrono::Duration::minutes(5)),
    )
    .unwrap()
}

async fn connect_with_query(addr: SocketAddr, user: UserId) -> Ws {
    let url = format!("ws://{}/ws?token={}", addr, token(user));
    connect_async(url).await.unwrap().0
}

async fn connect_with_header(addr: SocketAddr, user: UserId) -> Ws {
    let mut request = format!("ws://{}/ws", addr).into_client_request().unwrap();
    request.headers_mut().insert(
        AUTHORIZATION,
        format!("Bearer {}", token(user)).parse().unwrap(),
    );
    connect_async(request).await.unwrap().0
}

async fn next_of_kind(ws: &mut Ws, kind: EventKind) -> Event {
    loop {
        let message = timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = message {
            let event = codec::decode(text.as_bytes()).unwrap();
            if event.kind == kind {
                return event;
            }
        }
    }
}

/// GET `path` on the server; returns status and JSON body.
async fn get_json(addr: SocketAddr, path: &str, bearer: Option<&str>) -> (StatusCode, Value) {
    let client = reqwest::Client::new();
    let mut request = client.get(format!("http://{}{}", addr, path));
    if let Some(token) = bearer {
        request = request.bearer_auth(token);
    }

    let response = timeout(WAIT, request.send()).await.unwrap().unwrap();
    let status = response.status();
    let body = response.json::<Value>().await.unwrap();
    (status, body)
}

#[tokio::test]
async fn test_message_flow_between_matched_users() {
    let server = start().await;
    let mut a = connect_with_query(server.addr, server.a).await;
    let mut b = connect_with_header(server.addr, server.b).await;

    let frame = codec::encode(&Event::send_message(server.ab, "hi")).unwrap();
    a.send(Message::Text(String::from_utf8(frame.to_vec()).unwrap()))
        .await
        .unwrap();

    let event = next_of_kind(&mut b, EventKind::NewMessage).await;
    assert_eq!(event.match_id, Some(server.ab));
    let stored = event.stored_message().expect("message in data");
    assert_eq!(stored.message, "hi");
    assert_eq!(stored.sender_id, server.a);

    // Closing B announces it offline to A
    b.close(None).await.unwrap();
    loop {
        let event = next_of_kind(&mut a, EventKind::UserStatus).await;
        if event.status() == Some(PresenceStatus::Offline) {
            assert_eq!(event.user_id, Some(server.b));
            break;
        }
    }
}

#[tokio::test]
async fn test_upgrade_without_token_is_rejected() {
    let server = start().await;

    match connect_async(format!("ws://{}/ws", server.addr)).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 401),
        other => panic!("expected 401, got {:?}", other.map(|(_, r)| r.status())),
    }

    let bad = format!("ws://{}/ws?token=not-a-jwt", server.addr);
    assert!(connect_async(bad).await.is_err());
}

#[tokio::test]
async fn test_history_endpoint_checks_participation() {
    let server = start().await;
    let mut a = connect_with_query(server.addr, server.a).await;

    let frame = codec::encode(&Event::send_message(server.ab, "remember me")).unwrap();
    a.send(Message::Text(String::from_utf8(frame.to_vec()).unwrap()))
        .await
        .unwrap();

    let path = format!("/api/v1/matches/{}/messages", server.ab);
    let a_token = token(server.a);

    // The message is persisted asynchronously
    let mut messages = Vec::new();
    for _ in 0..50 {
        let (status, body) = get_json(server.addr, &path, Some(&a_token)).await;
        assert_eq!(status, StatusCode::OK);
        messages = body["messages"].as_array().cloned().unwrap_or_default();
        if !messages.is_empty() {
            assert_eq!(body["match_id"], server.ab.to_string());
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["message"], "remember me");
    assert_eq!(messages[0]["sender_id"], server.a.to_string());

    let (status, body) = get_json(server.addr, &path, Some(&token(server.outsider))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Access denied to this match");

    let (status, _) = get_json(server.addr, &path, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = get_json(server.addr, "/api/v1/matches", Some(&a_token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["matches"][0]["id"], server.ab.to_string());

    let (status, body) = get_json(server.addr, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["online"], 1);
}
