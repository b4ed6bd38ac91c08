//! Wire messages of the hub WebSocket API.
//!
//! Outgoing commands are plain JSON objects (`{"id": n, "type": ..., ...}`)
//! built by the caller; only the handful of message shapes the driver has to
//! understand are typed here.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Messages the hub sends during the authentication phase.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum AuthPhase {
    AuthRequired {
        #[serde(default)]
        ha_version: Option<String>,
    },
    AuthOk {
        #[serde(default)]
        ha_version: Option<String>,
    },
    AuthInvalid {
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(other)]
    Other,
}

/// The single message a client sends to authenticate.
#[derive(Debug, Serialize)]
pub(crate) struct AuthMessage<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub access_token: &'a str,
}

impl<'a> AuthMessage<'a> {
    pub fn new(access_token: &'a str) -> Self {
        Self {
            kind: "auth",
            access_token,
        }
    }
}

/// Messages the hub sends once the session is authenticated.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum Incoming {
    Result {
        id: u64,
        success: bool,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<HubError>,
    },
    Event {
        id: u64,
        event: Value,
    },
    Pong {
        id: u64,
    },
    #[serde(other)]
    Other,
}

/// `error` member of a failed `result` message.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct HubError {
    #[serde(default)]
    pub code: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
}

impl HubError {
    /// The hub uses string codes (`"not_found"`), older releases used ints.
    pub fn code(&self) -> String {
        match &self.code {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => "unknown_error".into(),
        }
    }

    pub fn message(&self) -> String {
        self.message.clone().unwrap_or_else(|| self.code())
    }
}

/// Build the `call_service` command body.
///
/// `return_response` asks the hub to put the service's response inline in
/// the `result` message instead of firing it as a separate event.
pub fn call_service_message(
    domain: &str,
    service: &str,
    service_data: Value,
    return_response: bool,
) -> Map<String, Value> {
    let mut msg = Map::new();
    msg.insert("type".into(), "call_service".into());
    msg.insert("domain".into(), domain.into());
    msg.insert("service".into(), service.into());
    msg.insert("service_data".into(), service_data);
    if return_response {
        msg.insert("return_response".into(), true.into());
    }
    msg
}

/// Command body with only a `type` member.
pub fn typed_message(kind: &str) -> Map<String, Value> {
    let mut msg = Map::new();
    msg.insert("type".into(), kind.into());
    msg
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_auth_phase_messages() {
        let required: AuthPhase =
            serde_json::from_str(r#"{"type":"auth_required","ha_version":"2024.6.0"}"#).unwrap();
        assert!(matches!(required, AuthPhase::AuthRequired { ha_version: Some(v) } if v == "2024.6.0"));

        let invalid: AuthPhase =
            serde_json::from_str(r#"{"type":"auth_invalid","message":"Invalid access token"}"#)
                .unwrap();
        assert!(matches!(invalid, AuthPhase::AuthInvalid { message: Some(m) } if m == "Invalid access token"));
    }

    #[test]
    fn parses_failed_result() {
        let msg: Incoming = serde_json::from_str(
            r#"{"id":4,"type":"result","success":false,"error":{"code":"not_found","message":"Service not found."}}"#,
        )
        .unwrap();
        let Incoming::Result { id, success, error, .. } = msg else {
            panic!("expected result");
        };
        assert_eq!(id, 4);
        assert!(!success);
        let error = error.unwrap();
        assert_eq!(error.code(), "not_found");
        assert_eq!(error.message(), "Service not found.");
    }

    #[test]
    fn numeric_error_code_is_stringified() {
        let err: HubError = serde_json::from_str(r#"{"code":3}"#).unwrap();
        assert_eq!(err.code(), "3");
        assert_eq!(err.message(), "3");
    }

    #[test]
    fn unknown_message_types_are_tolerated() {
        let msg: Incoming = serde_json::from_str(r#"{"type":"something_new","id":1}"#).unwrap();
        assert!(matches!(msg, Incoming::Other));
    }

    #[test]
    fn call_service_sets_return_response_only_when_asked() {
        let msg = call_service_message("light", "toggle", serde_json::json!({}), false);
        assert!(!msg.contains_key("return_response"));
        let msg = call_service_message("calendar", "get_events", serde_json::json!({}), true);
        assert_eq!(msg["return_response"], true);
        assert_eq!(msg["type"], "call_service");
    }
}
