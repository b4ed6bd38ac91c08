#![allow(clippy::unwrap_used)]
// Integration tests for `HubConnection` against an in-process fake hub.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use homedash_api::{
    Auth, ConnectOptions, ConnectionEvent, Credentials, EntityMap, Error, HubConnection,
    ReconnectConfig, ReconnectFailure,
};

// ── Fake hub ────────────────────────────────────────────────────────

struct FakeHub {
    url: Url,
    token: Arc<Mutex<String>>,
    entities: Arc<Mutex<Value>>,
    kick: Arc<Notify>,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl FakeHub {
    async fn start(token: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("http://{}", listener.local_addr().unwrap())).unwrap();
        let token = Arc::new(Mutex::new(token.to_owned()));
        let entities = Arc::new(Mutex::new(json!({
            "light.kitchen": {"s": "on", "a": {"friendly_name": "Kitchen"}, "c": "c1", "lc": 1_700_000_000.0}
        })));
        let kick = Arc::new(Notify::new());
        let connections = Arc::new(AtomicUsize::new(0));

        let task = {
            let token = Arc::clone(&token);
            let entities = Arc::clone(&entities);
            let kick = Arc::clone(&kick);
            let connections = Arc::clone(&connections);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(session(
                        stream,
                        Arc::clone(&token),
                        Arc::clone(&entities),
                        Arc::clone(&kick),
                    ));
                }
            })
        };

        Self {
            url,
            token,
            entities,
            kick,
            connections,
            task,
        }
    }

    /// Drop every open session.
    fn kick(&self) {
        self.kick.notify_waiters();
    }

    fn set_token(&self, token: &str) {
        *self.token.lock().unwrap() = token.to_owned();
    }

    /// Entities the next `subscribe_entities` reports in its `a` message.
    fn set_entities(&self, entities: Value) {
        *self.entities.lock().unwrap() = entities;
    }

    fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Stop accepting connections, then drop the open ones.
    fn shutdown(&self) {
        self.task.abort();
        self.kick();
    }
}

async fn send(ws: &mut WebSocketStream<TcpStream>, value: Value) {
    let _ = ws.send(Message::Text(value.to_string().into())).await;
}

async fn session(
    stream: TcpStream,
    token: Arc<Mutex<String>>,
    entities: Arc<Mutex<Value>>,
    kick: Arc<Notify>,
) {
    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };

    send(&mut ws, json!({"type": "auth_required", "ha_version": "2025.1.0"})).await;
    let Some(Ok(Message::Text(text))) = ws.next().await else {
        return;
    };
    let auth: Value = serde_json::from_str(text.as_str()).unwrap();
    let expected = token.lock().unwrap().clone();
    if auth["type"] != "auth" || auth["access_token"] != expected.as_str() {
        send(&mut ws, json!({"type": "auth_invalid", "message": "Invalid access token"})).await;
        let _ = ws.close(None).await;
        return;
    }
    send(&mut ws, json!({"type": "auth_ok", "ha_version": "2025.1.0"})).await;

    loop {
        tokio::select! {
            () = kick.notified() => {
                let _ = ws.close(None).await;
                return;
            }
            msg = ws.next() => {
                let Some(Ok(Message::Text(text))) = msg else { return };
                let command: Value = serde_json::from_str(text.as_str()).unwrap();
                let current = entities.lock().unwrap().clone();
                for reply in respond(&command, &current) {
                    send(&mut ws, reply).await;
                }
            }
        }
    }
}

fn respond(command: &Value, entities: &Value) -> Vec<Value> {
    let id = command["id"].clone();
    match command["type"].as_str().unwrap_or_default() {
        "ping" => vec![json!({"id": id, "type": "pong"})],
        "subscribe_entities" => vec![
            json!({"id": id, "type": "result", "success": true, "result": null}),
            json!({"id": id, "type": "event", "event": {"a": entities}}),
        ],
        "call_service" if command["domain"] == "broken" => vec![json!({
            "id": id, "type": "result", "success": false,
            "error": {"code": "not_found", "message": "Service broken.thing not found."}
        })],
        "call_service" => vec![json!({
            "id": id, "type": "result", "success": true,
            "result": {"context": {"id": "ctx"}, "response": {"echo": command["service_data"]}}
        })],
        "unsubscribe_events" => vec![json!({"id": id, "type": "result", "success": true, "result": null})],
        _ => vec![json!({
            "id": id, "type": "result", "success": false,
            "error": {"code": "unknown_command", "message": "Unknown command."}
        })],
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn auth_for(hub: &FakeHub, token: &str) -> Auth {
    Auth::new(Credentials::long_lived(
        hub.url.clone(),
        SecretString::from(token.to_owned()),
    ))
    .unwrap()
}

fn fast_options(max_retries: Option<u32>) -> ConnectOptions {
    ConnectOptions {
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            max_retries,
        },
        handshake_timeout: Duration::from_secs(2),
    }
}

async fn next_event(rx: &mut broadcast::Receiver<ConnectionEvent>) -> ConnectionEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for connection event")
        .unwrap()
}

fn sorted_ids(entities: &EntityMap) -> Vec<&str> {
    let mut ids: Vec<&str> = entities.keys().map(String::as_str).collect();
    ids.sort_unstable();
    ids
}

// ── Handshake ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_handshake_success_reports_version() {
    let hub = FakeHub::start("secret").await;
    let conn = HubConnection::connect(auth_for(&hub, "secret"), fast_options(None))
        .await
        .unwrap();

    assert_eq!(conn.ha_version(), "2025.1.0");
    assert!(conn.is_open());
    conn.ping().await.unwrap();
}

#[tokio::test]
async fn test_handshake_rejects_bad_token() {
    let hub = FakeHub::start("secret").await;
    let result = HubConnection::connect(auth_for(&hub, "wrong"), fast_options(None)).await;

    assert!(
        matches!(result, Err(Error::InvalidAuth { ref message }) if message == "Invalid access token"),
        "expected InvalidAuth, got: {result:?}"
    );
}

#[tokio::test]
async fn test_unreachable_hub_is_cannot_connect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = Url::parse(&format!("http://{}", listener.local_addr().unwrap())).unwrap();
    drop(listener);

    let auth = Auth::new(Credentials::long_lived(url, SecretString::from("x"))).unwrap();
    let result = HubConnection::connect(auth, fast_options(None)).await;

    assert!(
        matches!(result, Err(Error::CannotConnect(_))),
        "expected CannotConnect, got: {result:?}"
    );
}

// ── Commands ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_call_service_round_trip() {
    let hub = FakeHub::start("secret").await;
    let conn = HubConnection::connect(auth_for(&hub, "secret"), fast_options(None))
        .await
        .unwrap();

    let result = conn
        .call_service("light", "toggle", json!({"entity_id": "light.kitchen"}), true)
        .await
        .unwrap();

    assert_eq!(result["response"]["echo"]["entity_id"], "light.kitchen");
}

#[tokio::test]
async fn test_call_service_failure_carries_code() {
    let hub = FakeHub::start("secret").await;
    let conn = HubConnection::connect(auth_for(&hub, "secret"), fast_options(None))
        .await
        .unwrap();

    let err = conn
        .call_service("broken", "thing", json!({}), false)
        .await
        .unwrap_err();

    assert_eq!(err.service_code(), Some("not_found"));
    assert!(err.to_string().contains("Service broken.thing not found."));
}

#[tokio::test]
async fn test_subscribe_entities_yields_snapshot() {
    let hub = FakeHub::start("secret").await;
    let conn = HubConnection::connect(auth_for(&hub, "secret"), fast_options(None))
        .await
        .unwrap();

    let mut sub = conn.subscribe_entities(None).await.unwrap();
    let snapshot = sub.next_snapshot().await.unwrap();

    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot["light.kitchen"].friendly_name(), "Kitchen");
}

#[tokio::test]
async fn test_close_fails_later_requests() {
    let hub = FakeHub::start("secret").await;
    let conn = HubConnection::connect(auth_for(&hub, "secret"), fast_options(None))
        .await
        .unwrap();

    conn.close();
    let result = conn.ping().await;
    assert!(matches!(result, Err(Error::ConnectionLost)), "got: {result:?}");
}

// ── Reconnection ────────────────────────────────────────────────────

#[tokio::test]
async fn test_reconnects_and_resubscribes_after_drop() {
    let hub = FakeHub::start("secret").await;
    let conn = HubConnection::connect(auth_for(&hub, "secret"), fast_options(None))
        .await
        .unwrap();
    let mut events = conn.lifecycle();
    let mut sub = conn.subscribe_entities(None).await.unwrap();
    sub.next_snapshot().await.unwrap();

    hub.kick();

    assert_eq!(next_event(&mut events).await, ConnectionEvent::Disconnected);
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Ready);
    assert_eq!(hub.connections(), 2);

    // The re-issued subscription delivers a fresh snapshot.
    let snapshot = tokio::time::timeout(Duration::from_secs(5), sub.next_snapshot())
        .await
        .unwrap()
        .unwrap();
    assert!(snapshot.contains_key("light.kitchen"));

    conn.ping().await.unwrap();
}

#[tokio::test]
async fn test_resubscribe_drops_entities_removed_while_offline() {
    let hub = FakeHub::start("secret").await;
    hub.set_entities(json!({
        "light.a": {"s": "on", "lc": 1.0},
        "light.b": {"s": "off", "lc": 1.0}
    }));
    let conn = HubConnection::connect(auth_for(&hub, "secret"), fast_options(None))
        .await
        .unwrap();
    let mut events = conn.lifecycle();
    let mut sub = conn.subscribe_entities(None).await.unwrap();

    let first = sub.next_snapshot().await.unwrap();
    assert_eq!(sorted_ids(&first), ["light.a", "light.b"]);

    hub.set_entities(json!({"light.a": {"s": "off", "lc": 2.0}}));
    hub.kick();

    assert_eq!(next_event(&mut events).await, ConnectionEvent::Disconnected);
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Ready);

    let second = tokio::time::timeout(Duration::from_secs(5), sub.next_snapshot())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sorted_ids(&second), ["light.a"]);
    assert_eq!(second["light.a"].state, "off");
    // Snapshots handed out before the reconnect are untouched.
    assert_eq!(first.len(), 2);
}

#[tokio::test]
async fn test_gives_up_after_retry_budget() {
    let hub = FakeHub::start("secret").await;
    let conn = HubConnection::connect(auth_for(&hub, "secret"), fast_options(Some(2)))
        .await
        .unwrap();
    let mut events = conn.lifecycle();

    hub.shutdown();

    assert_eq!(next_event(&mut events).await, ConnectionEvent::Disconnected);
    assert!(matches!(
        next_event(&mut events).await,
        ConnectionEvent::ReconnectError(_)
    ));
    assert!(matches!(
        next_event(&mut events).await,
        ConnectionEvent::ReconnectError(_)
    ));
    assert!(matches!(
        next_event(&mut events).await,
        ConnectionEvent::ReconnectFailed(ReconnectFailure::RetriesExhausted(_))
    ));
}

#[tokio::test]
async fn test_rejected_token_on_reconnect_is_terminal() {
    let hub = FakeHub::start("secret").await;
    let conn = HubConnection::connect(auth_for(&hub, "secret"), fast_options(None))
        .await
        .unwrap();
    let mut events = conn.lifecycle();

    hub.set_token("rotated");
    hub.kick();

    assert_eq!(next_event(&mut events).await, ConnectionEvent::Disconnected);
    assert_eq!(
        next_event(&mut events).await,
        ConnectionEvent::ReconnectFailed(ReconnectFailure::InvalidAuth(
            "Invalid access token".into()
        ))
    );
}
