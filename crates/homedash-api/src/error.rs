use thiserror::Error;

/// Top-level error type for the `homedash-api` crate.
///
/// Covers every failure mode of the hub surfaces we talk to: the HTTP
/// token endpoint, the WebSocket handshake, and commands sent over a live
/// session. `homedash-core` maps these into domain errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The hub rejected the access token (`auth_invalid`) or the refresh
    /// token / authorization code (`invalid_grant`).
    #[error("Invalid authentication: {message}")]
    InvalidAuth { message: String },

    /// A refresh was requested but the credentials carry no refresh token.
    #[error("No refresh token available")]
    NoRefreshToken,

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error talking to the token endpoint.
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The WebSocket could not be opened (DNS, refused, TLS, upgrade).
    #[error("Cannot connect to hub: {0}")]
    CannotConnect(String),

    /// The session dropped while a request was in flight, or the
    /// connection has been shut down.
    #[error("Connection to hub lost")]
    ConnectionLost,

    /// The hub did not answer the handshake in time.
    #[error("Hub handshake timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    // ── Protocol ────────────────────────────────────────────────────
    /// The hub sent something the handshake did not expect.
    #[error("Unexpected message from hub: {0}")]
    Protocol(String),

    /// A command reached the hub and came back with `success: false`.
    #[error("Hub returned error {code}: {message}")]
    Service { code: String, message: String },

    /// The token endpoint answered with an unexpected status.
    #[error("Token endpoint returned HTTP {status}: {body}")]
    TokenEndpoint { status: u16, body: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON (de)serialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if re-authenticating (new token or interactive login)
    /// is the only way forward.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            Self::InvalidAuth { .. } | Self::NoRefreshToken
        )
    }

    /// The hub-side error code, if this error came from a command result.
    pub fn service_code(&self) -> Option<&str> {
        match self {
            Self::Service { code, .. } => Some(code),
            _ => None,
        }
    }
}
