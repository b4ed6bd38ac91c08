//! Hub authentication: OAuth2 code exchange, token refresh, and the shared
//! [`Auth`] handle the WebSocket driver reads its access token from.
//!
//! Home Assistant issues short-lived access tokens (30 minutes) plus a
//! refresh token through `POST /auth/token`. Long-lived access tokens created
//! in the user profile skip that dance entirely and are modelled as
//! [`Credentials`] without a refresh token and with a far-future expiry.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::sync::{Mutex, watch};
use tracing::debug;
use url::Url;

use crate::error::Error;

/// Lifetime assigned to long-lived access tokens (matches the ~3 years the
/// frontend assumes when it is handed a static token).
const LONG_LIVED_TOKEN_MS: i64 = 100_000_000_000;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

// ── Credentials ──────────────────────────────────────────────────────

/// Auth material for one hub, exactly as it is persisted between sessions.
///
/// Serialized as `{accessToken, refreshToken, expiresAt, hubUrl, clientId}`
/// with `expiresAt` in epoch milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    #[serde(serialize_with = "expose", deserialize_with = "secret")]
    pub access_token: SecretString,

    #[serde(
        default,
        serialize_with = "expose_opt",
        deserialize_with = "secret_opt"
    )]
    pub refresh_token: Option<SecretString>,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,

    pub hub_url: Url,

    #[serde(default)]
    pub client_id: Option<String>,
}

impl Credentials {
    /// Wrap a long-lived access token. It never expires in practice and
    /// cannot be refreshed.
    pub fn long_lived(hub_url: Url, access_token: SecretString) -> Self {
        Self {
            access_token,
            refresh_token: None,
            expires_at: Utc::now() + chrono::Duration::milliseconds(LONG_LIVED_TOKEN_MS),
            hub_url,
            client_id: None,
        }
    }

    /// `true` once `expires_at` is no longer in the future.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token.is_some() && self.client_id.is_some()
    }
}

impl PartialEq for Credentials {
    fn eq(&self, other: &Self) -> bool {
        self.access_token.expose_secret() == other.access_token.expose_secret()
            && self.refresh_token.as_ref().map(ExposeSecret::expose_secret)
                == other.refresh_token.as_ref().map(ExposeSecret::expose_secret)
            && self.expires_at == other.expires_at
            && self.hub_url == other.hub_url
            && self.client_id == other.client_id
    }
}

impl Eq for Credentials {}

fn expose<S: Serializer>(value: &SecretString, ser: S) -> Result<S::Ok, S::Error> {
    ser.serialize_str(value.expose_secret())
}

#[allow(clippy::ref_option)]
fn expose_opt<S: Serializer>(value: &Option<SecretString>, ser: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(v) => ser.serialize_some(v.expose_secret()),
        None => ser.serialize_none(),
    }
}

fn secret<'de, D: Deserializer<'de>>(de: D) -> Result<SecretString, D::Error> {
    String::deserialize(de).map(SecretString::from)
}

fn secret_opt<'de, D: Deserializer<'de>>(de: D) -> Result<Option<SecretString>, D::Error> {
    Ok(Option::<String>::deserialize(de)?.map(SecretString::from))
}

// ── Token endpoint ───────────────────────────────────────────────────

/// Body of a successful `POST /auth/token`.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Build `{hub}{path}` without `Url::join` eating a path prefix.
pub(crate) fn hub_endpoint(hub_url: &Url, path: &str) -> Result<Url, Error> {
    let base = hub_url.as_str().trim_end_matches('/');
    Ok(Url::parse(&format!("{base}{path}"))?)
}

/// URL the user opens to start the interactive login flow.
pub fn authorize_url(
    hub_url: &Url,
    client_id: &str,
    redirect_uri: &Url,
    state: Option<&str>,
) -> Result<Url, Error> {
    let mut url = hub_endpoint(hub_url, "/auth/authorize")?;
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("response_type", "code")
            .append_pair("client_id", client_id)
            .append_pair("redirect_uri", redirect_uri.as_str());
        if let Some(state) = state {
            query.append_pair("state", state);
        }
    }
    Ok(url)
}

/// Exchange an authorization code (from the redirect after
/// [`authorize_url`]) for a fresh credential set.
pub async fn exchange_code(
    http: &reqwest::Client,
    hub_url: &Url,
    client_id: &str,
    code: &str,
) -> Result<Credentials, Error> {
    let form = [
        ("grant_type", "authorization_code"),
        ("client_id", client_id),
        ("code", code),
    ];
    let token = post_token(http, hub_url, &form).await?;
    let refresh_token = token.refresh_token.clone().map(SecretString::from);

    Ok(Credentials {
        access_token: SecretString::from(token.access_token),
        refresh_token,
        expires_at: expiry_from_now(token.expires_in),
        hub_url: hub_url.clone(),
        client_id: Some(client_id.to_owned()),
    })
}

/// Trade the refresh token for a new access token. The refresh token
/// itself is kept.
pub async fn refresh_credentials(
    http: &reqwest::Client,
    current: &Credentials,
) -> Result<Credentials, Error> {
    let (Some(refresh_token), Some(client_id)) = (&current.refresh_token, &current.client_id)
    else {
        return Err(Error::NoRefreshToken);
    };

    let form = [
        ("grant_type", "refresh_token"),
        ("client_id", client_id.as_str()),
        ("refresh_token", refresh_token.expose_secret()),
    ];
    let token = post_token(http, &current.hub_url, &form).await?;

    Ok(Credentials {
        access_token: SecretString::from(token.access_token),
        refresh_token: current.refresh_token.clone(),
        expires_at: expiry_from_now(token.expires_in),
        hub_url: current.hub_url.clone(),
        client_id: current.client_id.clone(),
    })
}

async fn post_token(
    http: &reqwest::Client,
    hub_url: &Url,
    form: &[(&str, &str)],
) -> Result<TokenResponse, Error> {
    let url = hub_endpoint(hub_url, "/auth/token")?;
    debug!(%url, "requesting token");

    let resp = http.post(url).form(form).send().await?;
    let status = resp.status();
    let body = resp.text().await?;

    if status.is_success() {
        return serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        });
    }

    // 400 invalid_grant / 403 inactive user both mean "log in again".
    if status.as_u16() == 400 || status.as_u16() == 403 {
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| {
                v.get("error_description")
                    .or_else(|| v.get("error"))
                    .and_then(|m| m.as_str().map(String::from))
            })
            .unwrap_or_else(|| "token request rejected".into());
        return Err(Error::InvalidAuth { message });
    }

    Err(Error::TokenEndpoint {
        status: status.as_u16(),
        body,
    })
}

/// [`exchange_code`] with the default HTTP client.
pub async fn login(hub_url: &Url, client_id: &str, code: &str) -> Result<Credentials, Error> {
    exchange_code(&default_client()?, hub_url, client_id, code).await
}

fn default_client() -> Result<reqwest::Client, Error> {
    Ok(reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .user_agent(concat!("homedash/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

fn expiry_from_now(expires_in: u64) -> DateTime<Utc> {
    let secs = i64::try_from(expires_in).unwrap_or(i64::MAX / 1000);
    Utc::now() + chrono::Duration::seconds(secs)
}

// ── Auth handle ──────────────────────────────────────────────────────

/// Shared, refreshable view of the current credentials.
///
/// Cheaply cloneable. The connection driver reads the access token from it
/// on every (re)connect and refreshes it when expired; owners persist
/// updates by watching [`subscribe`](Self::subscribe).
#[derive(Clone)]
pub struct Auth {
    inner: Arc<AuthInner>,
}

struct AuthInner {
    http: reqwest::Client,
    credentials: watch::Sender<Credentials>,
    refresh_lock: Mutex<()>,
}

impl Auth {
    pub fn new(credentials: Credentials) -> Result<Self, Error> {
        Ok(Self::with_client(default_client()?, credentials))
    }

    /// Build an `Auth` around a pre-configured HTTP client.
    pub fn with_client(http: reqwest::Client, credentials: Credentials) -> Self {
        let (credentials, _) = watch::channel(credentials);
        Self {
            inner: Arc::new(AuthInner {
                http,
                credentials,
                refresh_lock: Mutex::new(()),
            }),
        }
    }

    pub fn credentials(&self) -> Credentials {
        self.inner.credentials.borrow().clone()
    }

    pub fn hub_url(&self) -> Url {
        self.inner.credentials.borrow().hub_url.clone()
    }

    pub fn access_token(&self) -> SecretString {
        self.inner.credentials.borrow().access_token.clone()
    }

    pub fn expired(&self) -> bool {
        self.inner.credentials.borrow().is_expired()
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.inner.http
    }

    /// Watch credential changes (each refresh publishes a new value).
    pub fn subscribe(&self) -> watch::Receiver<Credentials> {
        self.inner.credentials.subscribe()
    }

    /// Refresh the access token. Concurrent callers are serialized, and a
    /// caller that waited on another refresh returns without a second round
    /// trip.
    pub async fn refresh_access_token(&self) -> Result<(), Error> {
        let before = self.inner.credentials.borrow().expires_at;
        let _guard = self.inner.refresh_lock.lock().await;
        if self.inner.credentials.borrow().expires_at != before {
            return Ok(());
        }

        let current = self.credentials();
        let fresh = refresh_credentials(&self.inner.http, &current).await?;
        debug!(expires_at = %fresh.expires_at, "access token refreshed");
        self.inner.credentials.send_replace(fresh);
        Ok(())
    }
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Auth")
            .field("hub_url", &self.hub_url().as_str())
            .finish_non_exhaustive()
    }
}
