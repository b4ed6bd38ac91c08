//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text and process exit codes.

use miette::Diagnostic;
use thiserror::Error;

use homedash_config::ConfigError;
use homedash_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const AUTH: i32 = 3;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to hub at {url}")]
    #[diagnostic(
        code(homedash::connection_failed),
        help(
            "Check that Home Assistant is running and reachable.\n\
             Reason: {reason}"
        )
    )]
    ConnectionFailed { url: String, reason: String },

    #[error("Connection to hub lost")]
    #[diagnostic(code(homedash::connection_lost))]
    ConnectionLost,

    // ── Authentication ───────────────────────────────────────────────
    #[error("No hub address configured")]
    #[diagnostic(
        code(homedash::host_required),
        help("Pass --hub <url>, set HOMEDASH_URL, or add `url` under [hub] in the config file.")
    )]
    HostRequired,

    #[error("Not logged in")]
    #[diagnostic(
        code(homedash::auth_required),
        help("Run: homedash login\nOr pass a long-lived token with --token / HOMEDASH_TOKEN.")
    )]
    AuthRequired,

    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(homedash::auth_failed),
        help("The token was rejected. Run: homedash login --reset")
    )]
    AuthFailed { message: String },

    // ── Hub ──────────────────────────────────────────────────────────
    #[error("Hub error ({code}): {message}")]
    #[diagnostic(code(homedash::hub_error))]
    Hub { code: String, message: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(code(homedash::config))]
    Config(#[from] ConfigError),

    #[error("Credential storage failed: {message}")]
    #[diagnostic(code(homedash::storage))]
    Storage { message: String },

    // ── IO / Serialization ────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    #[diagnostic(code(homedash::json))]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::ConnectionLost => exit_code::CONNECTION,
            Self::HostRequired | Self::AuthRequired | Self::AuthFailed { .. } => exit_code::AUTH,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::HostRequired => CliError::HostRequired,
            CoreError::AuthRequired => CliError::AuthRequired,
            CoreError::InvalidAuth { message } => CliError::AuthFailed { message },
            CoreError::CannotConnect { url, reason } => CliError::ConnectionFailed { url, reason },
            CoreError::ConnectionLost => CliError::ConnectionLost,
            CoreError::NotConnected => CliError::ConnectionFailed {
                url: "(not connected)".into(),
                reason: "no live connection".into(),
            },
            CoreError::Query { message, code } => CliError::Hub {
                code: code.unwrap_or_else(|| "query_failed".into()),
                message,
            },
            CoreError::Storage { message } => CliError::Storage { message },
            CoreError::Config { message } => CliError::Config(ConfigError::Validation {
                field: "hub".into(),
                reason: message,
            }),
            CoreError::Internal(message) => CliError::Internal(message),
        }
    }
}

impl From<dialoguer::Error> for CliError {
    fn from(err: dialoguer::Error) -> Self {
        match err {
            dialoguer::Error::IO(e) => CliError::Io(e),
        }
    }
}
