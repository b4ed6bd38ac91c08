//! Authenticated hub session with auto-reconnect.
//!
//! [`HubConnection::connect`] opens `/api/websocket`, runs the auth
//! handshake, and spawns a driver task that owns the socket. Callers send
//! commands through the handle and await replies correlated by message id.
//! When the socket drops, the driver fails in-flight requests, announces
//! [`ConnectionEvent::Disconnected`], and reconnects with exponential
//! backoff + jitter, re-authenticating (refreshing the token if it expired)
//! and re-issuing every live subscription before announcing
//! [`ConnectionEvent::Ready`] again.
//!
//! # Example
//!
//! ```rust,ignore
//! use homedash_api::{Auth, Credentials, HubConnection, ConnectOptions};
//!
//! let auth = Auth::new(credentials)?;
//! let conn = HubConnection::connect(auth, ConnectOptions::default()).await?;
//! let result = conn
//!     .call_service("light", "toggle", serde_json::json!({"entity_id": "light.hallway"}), false)
//!     .await?;
//! conn.close();
//! ```

use std::collections::HashMap;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use secrecy::ExposeSecret;
use serde_json::{Map, Value};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::auth::{Auth, hub_endpoint};
use crate::error::Error;
use crate::protocol::{AuthMessage, AuthPhase, Incoming, call_service_message, typed_message};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

// ── Broadcast channel capacity ───────────────────────────────────────

const EVENT_CHANNEL_CAPACITY: usize = 64;

// ── ConnectionEvent ──────────────────────────────────────────────────

/// Lifecycle signals pushed by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The session is (again) authenticated and subscriptions are live.
    Ready,
    /// The socket dropped. Reconnection starts immediately.
    Disconnected,
    /// A reconnection attempt failed; another one will follow.
    ReconnectError(String),
    /// Reconnection gave up (auth rejected or retry budget spent). The
    /// connection is dead; only a fresh `connect` can recover.
    ReconnectFailed(ReconnectFailure),
}

/// Item delivered on a subscription feed.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedItem {
    /// An `event` payload for the subscription.
    Event(Value),
    /// The subscription was re-issued on a fresh session. State built from
    /// earlier events is stale; the hub starts over from scratch.
    Resubscribed,
}

/// Why the driver stopped reconnecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectFailure {
    InvalidAuth(String),
    RetriesExhausted(String),
}

// ── ConnectOptions ───────────────────────────────────────────────────

/// Exponential backoff configuration for reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub reconnect: ReconnectConfig,
    /// Upper bound for the socket upgrade + auth handshake.
    pub handshake_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

// ── HubConnection ────────────────────────────────────────────────────

enum Request {
    Call {
        payload: Map<String, Value>,
        reply: oneshot::Sender<Result<Value, Error>>,
    },
    Subscribe {
        payload: Map<String, Value>,
        sink: mpsc::UnboundedSender<FeedItem>,
        reply: oneshot::Sender<Result<(), Error>>,
    },
}

/// Handle to a live hub session.
///
/// Dropping the handle (or calling [`close`](Self::close)) stops the
/// driver task.
pub struct HubConnection {
    requests: mpsc::UnboundedSender<Request>,
    events: broadcast::Sender<ConnectionEvent>,
    auth: Auth,
    ha_version: String,
    cancel: CancellationToken,
}

impl HubConnection {
    /// Open the socket, authenticate, and spawn the driver.
    ///
    /// Fails without retrying: [`Error::InvalidAuth`] if the hub rejects the
    /// token, [`Error::CannotConnect`] if it cannot be reached.
    pub async fn connect(auth: Auth, options: ConnectOptions) -> Result<Self, Error> {
        if auth.expired() {
            auth.refresh_access_token().await?;
        }

        let ws_url = websocket_url(&auth.hub_url())?;
        let (socket, ha_version) = open_session(&ws_url, &auth, options.handshake_timeout).await?;
        info!(url = %ws_url, ha_version, "hub session authenticated");

        let (requests, request_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let driver = Driver {
            ws_url,
            auth: auth.clone(),
            options,
            requests: request_rx,
            events: events.clone(),
            cancel: cancel.clone(),
            pending: HashMap::new(),
            subscriptions: Vec::new(),
            next_id: 1,
        };
        tokio::spawn(driver.run(socket));

        Ok(Self {
            requests,
            events,
            auth,
            ha_version,
            cancel,
        })
    }

    /// Version string the hub reported in `auth_ok`.
    pub fn ha_version(&self) -> &str {
        &self.ha_version
    }

    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    /// Subscribe to lifecycle signals.
    pub fn lifecycle(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// `false` once the driver has exited.
    pub fn is_open(&self) -> bool {
        !self.requests.is_closed()
    }

    /// Send a command and wait for its `result`. The `id` member is
    /// assigned by the driver.
    pub async fn send_message(&self, payload: Map<String, Value>) -> Result<Value, Error> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(Request::Call { payload, reply })
            .map_err(|_| Error::ConnectionLost)?;
        rx.await.map_err(|_| Error::ConnectionLost)?
    }

    /// Call a service. With `return_response` the service's response is
    /// part of the returned value (`{"context": .., "response": ..}`).
    pub async fn call_service(
        &self,
        domain: &str,
        service: &str,
        service_data: Value,
        return_response: bool,
    ) -> Result<Value, Error> {
        debug!(domain, service, return_response, "calling service");
        self.send_message(call_service_message(domain, service, service_data, return_response))
            .await
    }

    /// Round-trip a `ping`.
    pub async fn ping(&self) -> Result<(), Error> {
        self.send_message(typed_message("ping")).await.map(|_| ())
    }

    /// Issue a subscription command. Every `event` payload for it is
    /// forwarded to the returned receiver, across reconnects, until the
    /// receiver is dropped. Each reconnect is marked by
    /// [`FeedItem::Resubscribed`] ahead of the new session's events.
    pub async fn subscribe_message(
        &self,
        payload: Map<String, Value>,
    ) -> Result<mpsc::UnboundedReceiver<FeedItem>, Error> {
        let (sink, events) = mpsc::unbounded_channel();
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(Request::Subscribe {
                payload,
                sink,
                reply,
            })
            .map_err(|_| Error::ConnectionLost)?;
        rx.await.map_err(|_| Error::ConnectionLost)??;
        Ok(events)
    }

    /// Signal the driver to close the socket and exit.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for HubConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for HubConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubConnection")
            .field("ha_version", &self.ha_version)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

/// `http(s)://host/prefix` → `ws(s)://host/prefix/api/websocket`.
pub fn websocket_url(hub_url: &Url) -> Result<Url, Error> {
    let mut url = hub_endpoint(hub_url, "/api/websocket")?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(Error::CannotConnect(format!("unsupported URL scheme '{other}'")));
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| Error::CannotConnect(format!("cannot derive websocket URL from {hub_url}")))?;
    Ok(url)
}

// ── Handshake ────────────────────────────────────────────────────────

/// Open the socket and run `auth_required → auth → auth_ok`.
async fn open_session(
    ws_url: &Url,
    auth: &Auth,
    timeout: Duration,
) -> Result<(WsStream, String), Error> {
    tokio::time::timeout(timeout, handshake(ws_url, auth))
        .await
        .map_err(|_| Error::Timeout {
            timeout_secs: timeout.as_secs(),
        })?
}

async fn handshake(ws_url: &Url, auth: &Auth) -> Result<(WsStream, String), Error> {
    debug!(url = %ws_url, "opening hub websocket");
    let (mut socket, _response) = tokio_tungstenite::connect_async(ws_url.as_str())
        .await
        .map_err(|e| Error::CannotConnect(e.to_string()))?;

    let mut ha_version = match next_auth_phase(&mut socket).await? {
        AuthPhase::AuthRequired { ha_version } => ha_version,
        other => return Err(Error::Protocol(format!("expected auth_required, got {other:?}"))),
    };

    let token = auth.access_token();
    let auth_msg = serde_json::to_string(&AuthMessage::new(token.expose_secret())).map_err(|e| {
        Error::Deserialization {
            message: e.to_string(),
            body: String::new(),
        }
    })?;
    socket
        .send(Message::Text(auth_msg.into()))
        .await
        .map_err(|e| Error::CannotConnect(e.to_string()))?;

    match next_auth_phase(&mut socket).await? {
        AuthPhase::AuthOk { ha_version: v } => {
            if v.is_some() {
                ha_version = v;
            }
            Ok((socket, ha_version.unwrap_or_default()))
        }
        AuthPhase::AuthInvalid { message } => {
            let _ = socket.close(None).await;
            Err(Error::InvalidAuth {
                message: message.unwrap_or_else(|| "access token rejected".into()),
            })
        }
        other => Err(Error::Protocol(format!("expected auth_ok, got {other:?}"))),
    }
}

async fn next_auth_phase(socket: &mut WsStream) -> Result<AuthPhase, Error> {
    loop {
        match socket.next().await {
            Some(Ok(Message::Text(text))) => {
                return serde_json::from_str(text.as_str()).map_err(|e| Error::Deserialization {
                    message: e.to_string(),
                    body: text.to_string(),
                });
            }
            Some(Ok(Message::Close(_))) | None => return Err(Error::ConnectionLost),
            Some(Err(e)) => return Err(Error::CannotConnect(e.to_string())),
            // Ping / Pong / Binary during handshake -- keep reading
            Some(Ok(_)) => {}
        }
    }
}

// ── Driver ───────────────────────────────────────────────────────────

enum Pending {
    Call(oneshot::Sender<Result<Value, Error>>),
    Subscribe(oneshot::Sender<Result<(), Error>>),
    /// Re-issued subscription after a reconnect; nobody awaits it.
    Resubscribe,
    /// Fire-and-forget command (`unsubscribe_events`).
    Ignore,
}

struct Subscription {
    payload: Map<String, Value>,
    sink: mpsc::UnboundedSender<FeedItem>,
    /// Message id of the subscribe command in the current session.
    id: u64,
}

enum SessionEnd {
    Shutdown,
    Lost(String),
}

struct Driver {
    ws_url: Url,
    auth: Auth,
    options: ConnectOptions,
    requests: mpsc::UnboundedReceiver<Request>,
    events: broadcast::Sender<ConnectionEvent>,
    cancel: CancellationToken,
    pending: HashMap<u64, Pending>,
    subscriptions: Vec<Subscription>,
    next_id: u64,
}

impl Driver {
    /// Main loop: serve → on drop, announce → reconnect → serve again.
    async fn run(mut self, socket: WsStream) {
        let mut socket = socket;

        loop {
            match self.serve(socket).await {
                SessionEnd::Shutdown => break,
                SessionEnd::Lost(reason) => {
                    info!(reason, "hub session lost");
                    self.fail_pending();
                    let _ = self.events.send(ConnectionEvent::Disconnected);

                    match self.reconnect().await {
                        Some(fresh) => socket = fresh,
                        None => break,
                    }
                }
            }
        }

        self.fail_pending();
        debug!("hub connection driver exiting");
    }

    /// Pump requests out and frames in until the session ends.
    async fn serve(&mut self, socket: WsStream) -> SessionEnd {
        let (mut sink, mut source): (WsSink, WsSource) = socket.split();

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    let _ = sink.close().await;
                    return SessionEnd::Shutdown;
                }
                request = self.requests.recv() => {
                    let Some(request) = request else {
                        let _ = sink.close().await;
                        return SessionEnd::Shutdown;
                    };
                    if let Err(e) = self.dispatch(&mut sink, request).await {
                        return SessionEnd::Lost(e.to_string());
                    }
                }
                frame = source.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            if let Err(e) = self.handle_text(&mut sink, text.as_str()).await {
                                return SessionEnd::Lost(e.to_string());
                            }
                        }
                        Some(Ok(Message::Ping(_))) => {
                            // tungstenite answers pings on the next write
                            trace!("hub ping");
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let reason = frame.map_or_else(
                                || "close frame".to_string(),
                                |cf| format!("{} {}", cf.code, cf.reason.as_str()),
                            );
                            return SessionEnd::Lost(reason);
                        }
                        Some(Err(e)) => return SessionEnd::Lost(e.to_string()),
                        None => return SessionEnd::Lost("stream ended".into()),
                        // Binary, Pong, Frame -- ignore
                        Some(Ok(_)) => {}
                    }
                }
            }
        }
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    async fn dispatch(&mut self, sink: &mut WsSink, request: Request) -> Result<(), Error> {
        match request {
            Request::Call { payload, reply } => {
                let id = self.allocate_id();
                if let Err(e) = send_command(sink, id, payload).await {
                    let _ = reply.send(Err(Error::ConnectionLost));
                    return Err(e);
                }
                self.pending.insert(id, Pending::Call(reply));
            }
            Request::Subscribe {
                payload,
                sink: events,
                reply,
            } => {
                let id = self.allocate_id();
                if let Err(e) = send_command(sink, id, payload.clone()).await {
                    let _ = reply.send(Err(Error::ConnectionLost));
                    return Err(e);
                }
                self.pending.insert(id, Pending::Subscribe(reply));
                self.subscriptions.push(Subscription {
                    payload,
                    sink: events,
                    id,
                });
            }
        }
        Ok(())
    }

    async fn handle_text(&mut self, sink: &mut WsSink, text: &str) -> Result<(), Error> {
        let message: Incoming = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                debug!(error = %e, "ignoring unparseable hub message");
                return Ok(());
            }
        };

        match message {
            Incoming::Result {
                id,
                success,
                result,
                error,
            } => {
                let outcome = if success {
                    Ok(result.unwrap_or(Value::Null))
                } else {
                    let error = error.unwrap_or(crate::protocol::HubError {
                        code: None,
                        message: None,
                    });
                    Err(Error::Service {
                        code: error.code(),
                        message: error.message(),
                    })
                };
                self.resolve(id, outcome);
            }
            Incoming::Event { id, event } => {
                let Some(index) = self.subscriptions.iter().position(|s| s.id == id) else {
                    trace!(id, "event for unknown subscription");
                    return Ok(());
                };
                let delivered = self
                    .subscriptions
                    .get(index)
                    .is_some_and(|sub| sub.sink.send(FeedItem::Event(event)).is_ok());
                if !delivered {
                    // Receiver dropped -- stop the feed on the hub side too.
                    self.subscriptions.swap_remove(index);
                    let unsub_id = self.allocate_id();
                    let mut payload = typed_message("unsubscribe_events");
                    payload.insert("subscription".into(), id.into());
                    send_command(sink, unsub_id, payload).await?;
                    self.pending.insert(unsub_id, Pending::Ignore);
                }
            }
            Incoming::Pong { id } => self.resolve(id, Ok(Value::Null)),
            Incoming::Other => trace!("ignoring hub message"),
        }
        Ok(())
    }

    fn resolve(&mut self, id: u64, outcome: Result<Value, Error>) {
        match self.pending.remove(&id) {
            Some(Pending::Call(reply)) => {
                let _ = reply.send(outcome);
            }
            Some(Pending::Subscribe(reply)) => {
                if outcome.is_err() {
                    self.subscriptions.retain(|s| s.id != id);
                }
                let _ = reply.send(outcome.map(|_| ()));
            }
            Some(Pending::Resubscribe) => {
                if let Err(e) = outcome {
                    warn!(error = %e, "re-subscription rejected by hub");
                    self.subscriptions.retain(|s| s.id != id);
                }
            }
            Some(Pending::Ignore) | None => {}
        }
    }

    /// Fail every in-flight request; the session they were sent on is gone.
    fn fail_pending(&mut self) {
        for (id, pending) in self.pending.drain() {
            match pending {
                Pending::Call(reply) => {
                    let _ = reply.send(Err(Error::ConnectionLost));
                }
                Pending::Subscribe(reply) => {
                    let _ = reply.send(Err(Error::ConnectionLost));
                    self.subscriptions.retain(|s| s.id != id);
                }
                Pending::Resubscribe | Pending::Ignore => {}
            }
        }
    }

    /// Backoff loop until a new authenticated session is up.
    ///
    /// Returns `None` when cancelled or when reconnecting is pointless
    /// (auth rejected, retry budget spent).
    async fn reconnect(&mut self) -> Option<WsStream> {
        let mut attempt: u32 = 0;

        loop {
            let delay = calculate_backoff(attempt, &self.options.reconnect);
            debug!(
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                attempt,
                "waiting before reconnect"
            );

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return None,
                () = tokio::time::sleep(delay) => {}
            }

            match self.try_reconnect().await {
                Ok(socket) => {
                    info!(attempt, "hub session re-established");
                    let _ = self.events.send(ConnectionEvent::Ready);
                    return Some(socket);
                }
                Err(Error::InvalidAuth { message }) => {
                    warn!(reason = %message, "hub rejected credentials on reconnect, giving up");
                    let _ = self.events.send(ConnectionEvent::ReconnectFailed(
                        ReconnectFailure::InvalidAuth(message),
                    ));
                    return None;
                }
                Err(e) => {
                    warn!(error = %e, attempt, "reconnect attempt failed");
                    let _ = self.events.send(ConnectionEvent::ReconnectError(e.to_string()));

                    if let Some(max) = self.options.reconnect.max_retries {
                        if attempt.saturating_add(1) >= max {
                            warn!(max_retries = max, "reconnection limit reached, giving up");
                            let _ = self.events.send(ConnectionEvent::ReconnectFailed(
                                ReconnectFailure::RetriesExhausted(e.to_string()),
                            ));
                            return None;
                        }
                    }
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }

    async fn try_reconnect(&mut self) -> Result<WsStream, Error> {
        if self.auth.expired() {
            debug!("access token expired, refreshing before reconnect");
            self.auth.refresh_access_token().await?;
        }

        let (socket, _version) =
            open_session(&self.ws_url, &self.auth, self.options.handshake_timeout).await?;
        let (mut sink, source) = socket.split();

        // Drop feeds nobody listens to, re-issue the rest with fresh ids.
        self.subscriptions.retain(|s| !s.sink.is_closed());
        let mut reissued = Vec::with_capacity(self.subscriptions.len());
        for mut sub in std::mem::take(&mut self.subscriptions) {
            let id = self.allocate_id();
            send_command(&mut sink, id, sub.payload.clone()).await?;
            self.pending.insert(id, Pending::Resubscribe);
            // Closed receivers are pruned on the next event.
            let _ = sub.sink.send(FeedItem::Resubscribed);
            sub.id = id;
            reissued.push(sub);
        }
        self.subscriptions = reissued;

        sink.reunite(source)
            .map_err(|e| Error::Protocol(format!("failed to reunite socket halves: {e}")))
    }
}

async fn send_command(
    sink: &mut WsSink,
    id: u64,
    mut payload: Map<String, Value>,
) -> Result<(), Error> {
    payload.insert("id".into(), id.into());
    let text = Value::Object(payload).to_string();
    trace!(id, "sending hub command");
    sink.send(Message::Text(text.into()))
        .await
        .map_err(|e| Error::CannotConnect(e.to_string()))
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) + jitter`
///
/// Jitter is +-25% to spread out reconnection storms from multiple clients.
fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = i32::try_from(attempt.min(30)).unwrap_or(30);
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    // Deterministic "jitter" seeded from the attempt number.
    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

// ── Tests ────────────────────────────────────────────────────────────
