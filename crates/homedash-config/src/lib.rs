//! Shared configuration for homedash.
//!
//! TOML config file, access token resolution (env + keyring + plaintext),
//! credential storage selection, and translation to
//! `homedash_core::HubConfig`. The dashboard layout lives in [`dashboard`].

pub mod dashboard;
mod keyring_backend;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use homedash_core::config::{DEFAULT_CLIENT_ID, DEFAULT_FALLBACK_URL};
use homedash_core::{
    CredentialStore, FileBackend, HubConfig, KeyedCredentialStore, ReconnectConfig,
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub use dashboard::{DashboardConfig, Person, Widget, load_dashboard};
pub use keyring_backend::KeyringBackend;

/// Keyring service name for tokens and credential records.
pub const KEYRING_SERVICE: &str = "homedash";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub hub: HubSection,

    pub reconnect: ReconnectSection,

    /// Dashboard layout document. Defaults to `dashboard.json` next to
    /// the config file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dashboard: Option<PathBuf>,

    pub credential_backend: CredentialBackend,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HubSection {
    /// Hub base URL (e.g., "http://homeassistant.local:8123").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Environment variable holding a long-lived access token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token_env: Option<String>,

    /// Long-lived access token (plaintext, prefer keyring or env var).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    pub client_id: String,

    pub redirect_uri: String,

    /// Origin of the host embedding the dashboard (e.g. the page serving
    /// it behind a reverse proxy). Used after the remembered address and
    /// before `fallback_url`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_origin: Option<String>,

    /// Tried when no hub address is configured or remembered.
    pub fallback_url: String,
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            url: None,
            access_token_env: None,
            access_token: None,
            client_id: DEFAULT_CLIENT_ID.into(),
            redirect_uri: DEFAULT_CLIENT_ID.into(),
            embedding_origin: None,
            fallback_url: DEFAULT_FALLBACK_URL.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconnectSection {
    pub initial_delay_ms: u64,
    pub max_delay_secs: u64,
    /// 0 retries forever.
    pub max_retries: u32,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_secs: 30,
            max_retries: 0,
        }
    }
}

impl From<&ReconnectSection> for ReconnectConfig {
    fn from(section: &ReconnectSection) -> Self {
        Self {
            initial_delay: Duration::from_millis(section.initial_delay_ms),
            max_delay: Duration::from_secs(section.max_delay_secs),
            max_retries: (section.max_retries > 0).then_some(section.max_retries),
        }
    }
}

/// Where OAuth credentials and the last hub address are persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialBackend {
    /// JSON files in the platform data directory.
    #[default]
    File,
    /// OS keyring.
    Keyring,
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("io", "homedash", "homedash")
}

fn home_fallback(kind: &str) -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(kind);
    p.push("homedash");
    p
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || home_fallback(".config").join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Directory for file-backed credential storage.
pub fn data_dir() -> PathBuf {
    project_dirs().map_or_else(
        || home_fallback(".local/share"),
        |dirs| dirs.data_dir().to_path_buf(),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the Config from defaults, the TOML file at `path` (or the
/// canonical path), and `HOMEDASH_` environment variables. Nested keys
/// use a double underscore: `HOMEDASH_HUB__URL`.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.map_or_else(config_path, Path::to_path_buf);
    tracing::debug!(path = %path.display(), "loading config");

    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("HOMEDASH_").split("__"));

    Ok(figment.extract()?)
}

impl Config {
    /// Dashboard document path: configured, else next to the config file.
    pub fn dashboard_path(&self) -> PathBuf {
        self.dashboard.clone().unwrap_or_else(|| {
            config_path()
                .parent()
                .map_or_else(|| PathBuf::from("dashboard.json"), |dir| dir.join("dashboard.json"))
        })
    }

    /// Build the runtime `HubConfig`. The access token comes from
    /// [`resolve_access_token`].
    pub fn to_hub_config(&self) -> Result<HubConfig, ConfigError> {
        let hub_url = self
            .hub
            .url
            .as_deref()
            .map(|raw| parse_url("hub.url", raw))
            .transpose()?;
        let embedding_origin = self
            .hub
            .embedding_origin
            .as_deref()
            .map(|raw| parse_url("hub.embedding_origin", raw))
            .transpose()?;
        let fallback_url = if self.hub.fallback_url.is_empty() {
            None
        } else {
            Some(parse_url("hub.fallback_url", &self.hub.fallback_url)?)
        };
        parse_url("hub.redirect_uri", &self.hub.redirect_uri)?;

        Ok(HubConfig {
            hub_url,
            embedding_origin,
            fallback_url,
            access_token: resolve_access_token(&self.hub),
            client_id: self.hub.client_id.clone(),
            redirect_uri: self.hub.redirect_uri.clone(),
            reconnect: ReconnectConfig::from(&self.reconnect),
            ..HubConfig::default()
        })
    }

    /// Credential store for the configured backend.
    pub fn credential_store(&self) -> Arc<dyn CredentialStore> {
        match self.credential_backend {
            CredentialBackend::File => {
                Arc::new(KeyedCredentialStore::new(FileBackend::new(data_dir())))
            }
            CredentialBackend::Keyring => {
                Arc::new(KeyedCredentialStore::new(KeyringBackend::new(KEYRING_SERVICE)))
            }
        }
    }
}

fn parse_url(field: &str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|e| ConfigError::Validation {
        field: field.into(),
        reason: format!("invalid URL '{raw}': {e}"),
    })
}

// ── Token resolution ────────────────────────────────────────────────

/// Resolve a long-lived access token: env var named by
/// `access_token_env`, then the system keyring, then plaintext config.
pub fn resolve_access_token(hub: &HubSection) -> Option<SecretString> {
    resolve_token(
        hub,
        |name| std::env::var(name).ok(),
        || {
            keyring::Entry::new(KEYRING_SERVICE, "access-token")
                .and_then(|entry| entry.get_password())
                .ok()
        },
    )
}

fn resolve_token(
    hub: &HubSection,
    env: impl Fn(&str) -> Option<String>,
    keyring: impl Fn() -> Option<String>,
) -> Option<SecretString> {
    // 1. Named env var
    if let Some(ref env_name) = hub.access_token_env {
        if let Some(val) = env(env_name) {
            return Some(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Some(secret) = keyring() {
        return Some(SecretString::from(secret));
    }

    // 3. Plaintext in config
    hub.access_token.clone().map(SecretString::from)
}
