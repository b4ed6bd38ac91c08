// ── Controller abstraction ──
//
// Full lifecycle management for the hub connection: resolve the hub
// address, pick credentials, authenticate, feed the EntityStore from the
// entity subscription, and translate transport signals into the
// observable ConnectionStatus.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use homedash_api::{Auth, ConnectOptions, ConnectionEvent, Credentials, HubConnection};
use serde_json::Value;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::calendar::{self, CalendarEvent};
use crate::command::Command;
use crate::config::HubConfig;
use crate::credentials::CredentialStore;
use crate::error::{CoreError, query_error};
use crate::lifecycle::{ConnectionStatus, FailureReason, Link};
use crate::store::EntityStore;
use crate::stream::EntityStream;

/// Refresh OAuth access tokens this long before they expire.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Wait between failed proactive refreshes.
const REFRESH_RETRY: Duration = Duration::from_secs(30);

// ── Controller ───────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<ControllerInner>`. Owns the single live
/// [`HubConnection`], the [`EntityStore`] it feeds, and the observable
/// [`ConnectionStatus`].
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    config: HubConfig,
    credentials: Arc<dyn CredentialStore>,
    store: Arc<EntityStore>,
    link: Link<HubConnection>,
    cancel: CancellationToken,
    /// Child token for the current connection: cancelled on disconnect,
    /// replaced on connect.
    cancel_child: Mutex<CancellationToken>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
    /// Serializes connect / disconnect.
    lifecycle_lock: Mutex<()>,
}

impl Controller {
    /// Create a new Controller. Does NOT connect -- call
    /// [`connect()`](Self::connect).
    pub fn new(config: HubConfig, credentials: Arc<dyn CredentialStore>) -> Self {
        let cancel = CancellationToken::new();
        let cancel_child = cancel.child_token();

        Self {
            inner: Arc::new(ControllerInner {
                config,
                credentials,
                store: Arc::new(EntityStore::new()),
                link: Link::new(),
                cancel,
                cancel_child: Mutex::new(cancel_child),
                task_handles: Mutex::new(Vec::new()),
                lifecycle_lock: Mutex::new(()),
            }),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<EntityStore> {
        &self.inner.store
    }

    pub fn credential_store(&self) -> &Arc<dyn CredentialStore> {
        &self.inner.credentials
    }

    // ── Connection lifecycle ─────────────────────────────────────

    /// Connect to the hub.
    ///
    /// Resolves the hub address, picks credentials, authenticates, and
    /// starts the entity feed. Any previous connection is closed first, so
    /// a failed attempt leaves no live handle behind. On failure the status
    /// becomes [`ConnectionStatus::Failed`] with a reason and nothing is
    /// retried.
    pub async fn connect(&self) -> Result<(), CoreError> {
        let _guard = self.inner.lifecycle_lock.lock().await;
        self.retire().await;
        self.inner.link.connecting();

        match self.establish().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.inner.link.fail(FailureReason::from(&e));
                Err(e)
            }
        }
    }

    async fn establish(&self) -> Result<(), CoreError> {
        let hub_url = self.hub_url()?;
        let (credentials, from_store) = self.pick_credentials(&hub_url)?;
        debug!(hub = %hub_url, from_store, "authenticating");

        let auth = Auth::new(credentials)?;
        let options = ConnectOptions {
            reconnect: self.inner.config.reconnect.clone(),
            handshake_timeout: self.inner.config.handshake_timeout,
        };
        let conn = HubConnection::connect(auth.clone(), options)
            .await
            .map_err(|e| match e {
                homedash_api::Error::CannotConnect(reason) => CoreError::CannotConnect {
                    url: hub_url.to_string(),
                    reason,
                },
                other => other.into(),
            })?;
        let conn = Arc::new(conn);

        // Listen before anything can happen on the new connection.
        let events = conn.lifecycle();
        let subscription = conn
            .subscribe_entities(self.inner.config.entity_filter.as_deref())
            .await?;

        let child = self.inner.cancel.child_token();
        *self.inner.cancel_child.lock().await = child.clone();

        let (generation, previous) = self.inner.link.install(Arc::clone(&conn));
        if let Some(previous) = previous {
            previous.close();
        }

        if from_store {
            persist(self.inner.credentials.as_ref(), &auth.credentials());
        }

        let mut handles = self.inner.task_handles.lock().await;
        handles.push(self.inner.store.follow(subscription, child.clone()));
        handles.push(tokio::spawn(lifecycle_task(
            self.clone(),
            Arc::clone(&conn),
            generation,
            events,
            child.clone(),
        )));
        if from_store {
            handles.push(tokio::spawn(credential_task(
                Arc::clone(&self.inner.credentials),
                auth,
                child,
            )));
        }

        info!(hub = %hub_url, ha_version = conn.ha_version(), "connected to hub");
        Ok(())
    }

    /// Disconnect from the hub.
    ///
    /// Cancels background tasks, closes the connection, and sets the
    /// status to [`Disconnected`](ConnectionStatus::Disconnected). The
    /// last entity snapshot stays readable.
    pub async fn disconnect(&self) {
        let _guard = self.inner.lifecycle_lock.lock().await;
        self.retire().await;
        debug!("disconnected");
    }

    /// Close the live connection and stop its tasks. Signals still in
    /// flight from it are ignored afterwards.
    async fn retire(&self) {
        if let Some(conn) = self.inner.link.teardown() {
            conn.close();
        }
        self.stop_tasks().await;
    }

    async fn stop_tasks(&self) {
        self.inner.cancel_child.lock().await.cancel();
        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
    }

    /// Hub address per the configured priority.
    pub fn hub_url(&self) -> Result<Url, CoreError> {
        let persisted = if self.inner.config.hub_url.is_some() {
            None
        } else {
            self.inner.credentials.load_hub_url()
        };
        self.inner
            .config
            .resolve_hub_url(persisted)
            .ok_or(CoreError::HostRequired)
    }

    /// Configured long-lived token first, then stored credentials for the
    /// same hub. The flag says whether the store supplied them.
    fn pick_credentials(&self, hub_url: &Url) -> Result<(Credentials, bool), CoreError> {
        if let Some(token) = &self.inner.config.access_token {
            return Ok((Credentials::long_lived(hub_url.clone(), token.clone()), false));
        }

        match self.inner.credentials.load() {
            Some(stored) if stored.hub_url == *hub_url => Ok((stored, true)),
            Some(stored) => {
                debug!(stored = %stored.hub_url, hub = %hub_url, "stored credentials belong to another hub");
                Err(CoreError::AuthRequired)
            }
            None => Err(CoreError::AuthRequired),
        }
    }

    // ── One-shot convenience ─────────────────────────────────────

    /// One-shot: connect, run closure, disconnect.
    pub async fn oneshot<F, Fut, T>(
        config: HubConfig,
        credentials: Arc<dyn CredentialStore>,
        f: F,
    ) -> Result<T, CoreError>
    where
        F: FnOnce(Controller) -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        let controller = Controller::new(config, credentials);
        controller.connect().await?;
        let result = f(controller.clone()).await;
        controller.disconnect().await;
        result
    }

    // ── Interactive login ────────────────────────────────────────

    /// URL the user opens to authorize this client.
    pub fn authorize_url(&self, state: Option<&str>) -> Result<Url, CoreError> {
        let hub_url = self.hub_url()?;
        let redirect_uri = Url::parse(&self.inner.config.redirect_uri).map_err(|e| {
            CoreError::Config {
                message: format!("invalid redirect URI: {e}"),
            }
        })?;
        Ok(homedash_api::authorize_url(
            &hub_url,
            &self.inner.config.client_id,
            &redirect_uri,
            state,
        )?)
    }

    /// Exchange the authorization code from the redirect for tokens and
    /// store them.
    pub async fn complete_login(&self, code: &str) -> Result<Credentials, CoreError> {
        let hub_url = self.hub_url()?;
        let credentials =
            homedash_api::login(&hub_url, &self.inner.config.client_id, code.trim()).await?;
        self.inner.credentials.save(&credentials)?;
        info!(hub = %hub_url, "login complete");
        Ok(credentials)
    }

    /// Disconnect and forget stored credentials.
    pub async fn logout(&self) -> Result<(), CoreError> {
        self.disconnect().await;
        self.inner.credentials.clear()
    }

    // ── State observation ────────────────────────────────────────

    pub fn status(&self) -> ConnectionStatus {
        self.inner.link.status()
    }

    /// Subscribe to connection status changes.
    pub fn connection_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.link.subscribe()
    }

    /// The live connection, if any.
    pub fn connection(&self) -> Option<Arc<HubConnection>> {
        self.inner.link.current()
    }

    /// Subscribe to entity map snapshots.
    pub fn entities(&self) -> EntityStream {
        self.inner.store.subscribe()
    }

    // ── Remote calls ─────────────────────────────────────────────

    /// Calendar events for `entity_id` in `[start, end)`. `start`
    /// defaults to now, `end` to a week after `start`.
    pub async fn calendar_events(
        &self,
        entity_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<CalendarEvent>, CoreError> {
        let conn = self.connection();
        calendar::get_events(conn.as_deref(), entity_id, start, end).await
    }

    /// Execute a control command, returning the hub's result.
    pub async fn execute(&self, cmd: Command) -> Result<Value, CoreError> {
        let conn = self.connection().ok_or(CoreError::NotConnected)?;
        let call = cmd.service_call();
        debug!(
            domain = %call.domain,
            service = call.service,
            entity_id = cmd.entity_id(),
            "executing command"
        );
        conn.call_service(&call.domain, call.service, call.service_data, false)
            .await
            .map_err(query_error)
    }
}

fn persist(store: &dyn CredentialStore, credentials: &Credentials) {
    if let Err(e) = store.save(credentials) {
        warn!(error = %e, "failed to persist credentials");
    }
}

// ── Background tasks ─────────────────────────────────────────────

/// Apply transport signals of connection `generation` to the link.
async fn lifecycle_task(
    controller: Controller,
    conn: Arc<HubConnection>,
    generation: u64,
    mut events: broadcast::Receiver<ConnectionEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = events.recv() => match event {
                Ok(event) => {
                    let terminal = matches!(event, ConnectionEvent::ReconnectFailed(_));
                    controller.inner.link.on_event(generation, &event, &conn);
                    if terminal {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "lifecycle signals dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

/// Persist credentials whenever the transport refreshes them, and refresh
/// proactively shortly before expiry.
async fn credential_task(store: Arc<dyn CredentialStore>, auth: Auth, cancel: CancellationToken) {
    let mut updates = auth.subscribe();

    loop {
        // Not marked seen: a refresh made below wakes `changed()` next
        // round and gets persisted there.
        let current = updates.borrow().clone();
        let refresh_in = (current.expires_at - Utc::now())
            .to_std()
            .unwrap_or_default()
            .saturating_sub(REFRESH_MARGIN);
        let can_refresh = current.can_refresh();

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let fresh = updates.borrow_and_update().clone();
                persist(store.as_ref(), &fresh);
            }
            () = tokio::time::sleep(refresh_in), if can_refresh => {
                match auth.refresh_access_token().await {
                    Ok(()) => debug!("access token refreshed ahead of expiry"),
                    Err(e) if e.is_auth() => {
                        warn!(error = %e, "token refresh rejected, stopping refresh");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "token refresh failed, retrying");
                        tokio::select! {
                            () = cancel.cancelled() => break,
                            () = tokio::time::sleep(REFRESH_RETRY) => {}
                        }
                    }
                }
            }
        }
    }
}
