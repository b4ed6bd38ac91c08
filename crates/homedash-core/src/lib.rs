//! Reactive connection layer between `homedash-api` and dashboard consumers.
//!
//! - **[`Controller`]** — Central facade owning the hub connection:
//!   [`connect()`](Controller::connect) resolves the hub address, picks
//!   credentials from configuration or the [`CredentialStore`], authenticates,
//!   and starts the entity feed. Transport signals drive the observable
//!   [`ConnectionStatus`].
//!
//! - **[`EntityStore`]** — Latest entity map, replaced wholesale by every
//!   snapshot from the hub. [`EntityStream`] exposes `current()` / `latest()` /
//!   `changed()` for reactive rendering.
//!
//! - **[`calendar`]** — `calendar.get_events` with the response-shape
//!   heuristic that finds the event array in whatever envelope the hub sends.
//!
//! - **[`Command`]** — Control operations (toggle, arm, play/pause) mapped to
//!   hub services.

pub mod calendar;
pub mod command;
pub mod config;
pub mod controller;
pub mod credentials;
pub mod error;
pub mod lifecycle;
pub mod store;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use calendar::{CalendarEvent, EventTime};
pub use command::{Command, Domain, ServiceCall};
pub use config::HubConfig;
pub use controller::Controller;
pub use credentials::{
    CredentialStore, FileBackend, KeyedCredentialStore, MemoryBackend, StorageBackend,
};
pub use error::CoreError;
pub use lifecycle::{ConnectionStatus, FailureReason};
pub use store::EntityStore;
pub use stream::EntityStream;

pub use homedash_api::{Credentials, EntityMap, EntityState, HubConnection, ReconnectConfig};
