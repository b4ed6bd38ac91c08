// ── Connection lifecycle state machine ──
//
// Connecting → Connected → {Disconnected, Reconnecting} → Connected | Failed
//
// `Link` owns the observable status and the single live handle slot. Each
// installed handle gets a generation number; transport signals carrying an
// older generation belong to a superseded connection and are dropped.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwapOption;
use homedash_api::{ConnectionEvent, ReconnectFailure};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::CoreError;

// ── ConnectionStatus ─────────────────────────────────────────────────

/// Why the connection is in [`ConnectionStatus::Failed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    HostRequired,
    AuthRequired,
    InvalidAuth(String),
    CannotConnect(String),
    Other(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HostRequired => f.write_str("hub address required"),
            Self::AuthRequired => f.write_str("login required"),
            Self::InvalidAuth(msg) => write!(f, "invalid authentication: {msg}"),
            Self::CannotConnect(msg) => write!(f, "cannot connect: {msg}"),
            Self::Other(msg) => f.write_str(msg),
        }
    }
}

impl From<&CoreError> for FailureReason {
    fn from(err: &CoreError) -> Self {
        match err {
            CoreError::HostRequired => Self::HostRequired,
            CoreError::AuthRequired => Self::AuthRequired,
            CoreError::InvalidAuth { message } => Self::InvalidAuth(message.clone()),
            CoreError::CannotConnect { reason, .. } => Self::CannotConnect(reason.clone()),
            CoreError::ConnectionLost => Self::CannotConnect(err.to_string()),
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<&ReconnectFailure> for FailureReason {
    fn from(failure: &ReconnectFailure) -> Self {
        match failure {
            ReconnectFailure::InvalidAuth(msg) => Self::InvalidAuth(msg.clone()),
            ReconnectFailure::RetriesExhausted(msg) => Self::CannotConnect(msg.clone()),
        }
    }
}

/// Connection state observable by consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
    Failed(FailureReason),
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Disconnected => f.write_str("disconnected"),
            Self::Reconnecting => f.write_str("reconnecting"),
            Self::Failed(reason) => write!(f, "failed ({reason})"),
        }
    }
}

// ── Link ─────────────────────────────────────────────────────────────

pub(crate) struct Link<H> {
    status: watch::Sender<ConnectionStatus>,
    handle: ArcSwapOption<H>,
    generation: AtomicU64,
}

impl<H> Link<H> {
    pub(crate) fn new() -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            status,
            handle: ArcSwapOption::empty(),
            generation: AtomicU64::new(0),
        }
    }

    pub(crate) fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// The live handle, if any. Re-check on every use: it may vanish at
    /// any await point.
    pub(crate) fn current(&self) -> Option<Arc<H>> {
        self.handle.load_full()
    }

    /// Publish `next`; subscribers are only woken on an actual change.
    fn set_status(&self, next: ConnectionStatus) -> bool {
        self.status.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        })
    }

    pub(crate) fn connecting(&self) {
        self.set_status(ConnectionStatus::Connecting);
    }

    pub(crate) fn fail(&self, reason: FailureReason) {
        warn!(%reason, "connection failed");
        self.set_status(ConnectionStatus::Failed(reason));
    }

    /// Make `handle` the live one. Returns its generation and the handle
    /// it replaced, which the caller must close.
    pub(crate) fn install(&self, handle: Arc<H>) -> (u64, Option<Arc<H>>) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let previous = self.handle.swap(Some(handle));
        self.set_status(ConnectionStatus::Connected);
        (generation, previous)
    }

    /// Invalidate the current generation and take the handle out.
    pub(crate) fn teardown(&self) -> Option<Arc<H>> {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let previous = self.handle.swap(None);
        self.set_status(ConnectionStatus::Disconnected);
        previous
    }

    /// React to a transport signal from the connection installed as
    /// `generation`. Returns whether anything changed.
    pub(crate) fn on_event(
        &self,
        generation: u64,
        event: &ConnectionEvent,
        handle: &Arc<H>,
    ) -> bool {
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(generation, ?event, "ignoring signal from superseded connection");
            return false;
        }

        match event {
            ConnectionEvent::Ready => {
                self.handle.store(Some(Arc::clone(handle)));
                let changed = self.set_status(ConnectionStatus::Connected);
                if changed {
                    info!("hub connection restored");
                }
                changed
            }
            ConnectionEvent::Disconnected => {
                // Only the signal that actually takes the handle out
                // counts; repeats are no-ops.
                if self.handle.swap(None).is_none() {
                    return false;
                }
                info!("hub connection lost");
                self.set_status(ConnectionStatus::Disconnected)
            }
            ConnectionEvent::ReconnectError(reason) => {
                debug!(reason, "reconnect attempt failed");
                self.set_status(ConnectionStatus::Reconnecting)
            }
            ConnectionEvent::ReconnectFailed(failure) => {
                self.handle.swap(None);
                let reason = FailureReason::from(failure);
                warn!(%reason, "hub connection gave up reconnecting");
                self.set_status(ConnectionStatus::Failed(reason))
            }
        }
    }
}
