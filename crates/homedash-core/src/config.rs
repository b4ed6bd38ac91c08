// ── Runtime hub configuration ──
//
// Describes *where* the hub is and *how* to keep the connection alive.
// Carries secrets but never touches disk; the binary (or any other
// embedder) builds a `HubConfig` and hands it to the `Controller`.

use std::time::Duration;

use homedash_api::ReconnectConfig;
use secrecy::SecretString;
use url::Url;

/// Address the hub answers on in a default install.
pub const DEFAULT_FALLBACK_URL: &str = "http://homeassistant.local:8123";

/// OAuth client id used when none is configured. The hub only requires it
/// to be a URL sharing its host with the redirect URI.
pub const DEFAULT_CLIENT_ID: &str = "http://127.0.0.1:8765/";

/// Configuration for one hub connection.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Explicitly configured hub address. Wins over everything else.
    pub hub_url: Option<Url>,
    /// Origin of the page or process embedding the dashboard, used when
    /// the dashboard is served by the hub itself.
    pub embedding_origin: Option<Url>,
    /// Last resort when nothing else resolves.
    pub fallback_url: Option<Url>,
    /// Long-lived access token. Skips the credential store entirely.
    pub access_token: Option<SecretString>,
    /// OAuth client id for the interactive login flow.
    pub client_id: String,
    /// OAuth redirect URI for the interactive login flow.
    pub redirect_uri: String,
    /// Backoff used by the transport when the socket drops.
    pub reconnect: ReconnectConfig,
    /// Upper bound for socket upgrade + auth handshake.
    pub handshake_timeout: Duration,
    /// Restrict the entity feed to these ids. `None` subscribes to all.
    pub entity_filter: Option<Vec<String>>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            hub_url: None,
            embedding_origin: None,
            fallback_url: Url::parse(DEFAULT_FALLBACK_URL).ok(),
            access_token: None,
            client_id: DEFAULT_CLIENT_ID.into(),
            redirect_uri: DEFAULT_CLIENT_ID.into(),
            reconnect: ReconnectConfig::default(),
            handshake_timeout: Duration::from_secs(10),
            entity_filter: None,
        }
    }
}

impl HubConfig {
    /// Pick the hub address: explicit > persisted > embedding origin >
    /// fallback.
    pub fn resolve_hub_url(&self, persisted: Option<Url>) -> Option<Url> {
        self.hub_url
            .clone()
            .or(persisted)
            .or_else(|| self.embedding_origin.clone())
            .or_else(|| self.fallback_url.clone())
    }
}
