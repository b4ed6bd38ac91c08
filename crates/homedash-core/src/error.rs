// ── Core error types ──
//
// Domain errors surfaced to consumers of homedash-core. Wire details
// (HTTP statuses, WebSocket frames, JSON envelopes) stay in homedash-api;
// the `From<homedash_api::Error>` impl folds them into the taxonomy the
// dashboard reacts to: auth problems, network problems, caller errors,
// and failed remote calls.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Auth errors ──────────────────────────────────────────────────
    /// No hub address could be resolved from configuration, persisted
    /// state, the embedding origin, or the fallback.
    #[error("Hub address required")]
    HostRequired,

    /// No usable credentials: nothing stored, stored for another hub, or
    /// expired. An interactive login is needed.
    #[error("Authentication required")]
    AuthRequired,

    #[error("Invalid authentication: {message}")]
    InvalidAuth { message: String },

    // ── Network errors ───────────────────────────────────────────────
    #[error("Cannot connect to hub at {url}: {reason}")]
    CannotConnect { url: String, reason: String },

    /// The live connection dropped mid-operation. The transport reconnects
    /// on its own.
    #[error("Connection to hub lost")]
    ConnectionLost,

    // ── Caller errors ────────────────────────────────────────────────
    /// An operation needed a live connection and there was none.
    #[error("Not connected to hub")]
    NotConnected,

    // ── Remote call errors ───────────────────────────────────────────
    #[error("Hub query failed: {message}")]
    Query {
        message: String,
        /// Hub error code (`not_found`, `unknown_error`, ...), if any.
        code: Option<String>,
    },

    // ── Local errors ─────────────────────────────────────────────────
    #[error("Credential storage error: {message}")]
    Storage { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<homedash_api::Error> for CoreError {
    fn from(err: homedash_api::Error) -> Self {
        use homedash_api::Error as Api;

        match err {
            Api::InvalidAuth { message } => CoreError::InvalidAuth { message },
            Api::NoRefreshToken => CoreError::AuthRequired,
            Api::Transport(ref e) => {
                if e.is_connect() || e.is_timeout() {
                    CoreError::CannotConnect {
                        url: e.url().map(ToString::to_string).unwrap_or_default(),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Query {
                        message: e.to_string(),
                        code: None,
                    }
                }
            }
            Api::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            Api::CannotConnect(reason) => CoreError::CannotConnect {
                url: String::new(),
                reason,
            },
            Api::Timeout { timeout_secs } => CoreError::CannotConnect {
                url: String::new(),
                reason: format!("handshake timed out after {timeout_secs}s"),
            },
            Api::ConnectionLost => CoreError::ConnectionLost,
            Api::Service { code, message } => CoreError::Query {
                message,
                code: Some(code),
            },
            Api::TokenEndpoint { status, body } => CoreError::Query {
                message: format!("token endpoint returned HTTP {status}: {body}"),
                code: Some(status.to_string()),
            },
            Api::Protocol(message) => CoreError::Internal(format!("Protocol error: {message}")),
            Api::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}

/// Failure of a remote call issued on the caller's behalf. Everything,
/// transport trouble included, surfaces as [`CoreError::Query`].
pub(crate) fn query_error(err: homedash_api::Error) -> CoreError {
    let code = err.service_code().map(str::to_owned);
    let message = match err {
        homedash_api::Error::Service { message, .. } => message,
        other => other.to_string(),
    };
    CoreError::Query { message, code }
}
