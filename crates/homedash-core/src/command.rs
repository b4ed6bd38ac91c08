// ── Command API ──
//
// Control operations the dashboard issues. Each command maps to exactly
// one `call_service`; the controller sends it over the live connection.

use std::str::FromStr;

use serde_json::{Value, json};
use strum::{Display, EnumString};

/// Entity domains with their own `toggle` / `turn_on` / `turn_off`
/// services. Everything else goes through the generic `homeassistant`
/// domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Domain {
    Light,
    Switch,
    InputBoolean,
    Fan,
    Automation,
    MediaPlayer,
}

/// A write operation against the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Toggle { entity_id: String },
    TurnOn { entity_id: String },
    TurnOff { entity_id: String },
    /// Arm an `input_boolean` used as an alarm flag.
    Arm { entity_id: String },
    Disarm { entity_id: String },
    MediaPlayPause { entity_id: String },
}

/// Target of a command: `{domain}.{service}` with its data.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceCall {
    pub domain: String,
    pub service: &'static str,
    pub service_data: Value,
}

impl Command {
    pub fn entity_id(&self) -> &str {
        match self {
            Self::Toggle { entity_id }
            | Self::TurnOn { entity_id }
            | Self::TurnOff { entity_id }
            | Self::Arm { entity_id }
            | Self::Disarm { entity_id }
            | Self::MediaPlayPause { entity_id } => entity_id,
        }
    }

    pub fn service_call(&self) -> ServiceCall {
        let entity_id = self.entity_id();
        let (domain, service) = match self {
            Self::Toggle { .. } => (switch_domain(entity_id), "toggle"),
            Self::TurnOn { .. } => (switch_domain(entity_id), "turn_on"),
            Self::TurnOff { .. } => (switch_domain(entity_id), "turn_off"),
            Self::Arm { .. } => (Domain::InputBoolean.to_string(), "turn_on"),
            Self::Disarm { .. } => (Domain::InputBoolean.to_string(), "turn_off"),
            Self::MediaPlayPause { .. } => (Domain::MediaPlayer.to_string(), "media_play_pause"),
        };
        ServiceCall {
            domain,
            service,
            service_data: json!({ "entity_id": entity_id }),
        }
    }
}

/// Service domain for on/off style commands on `entity_id`.
fn switch_domain(entity_id: &str) -> String {
    let prefix = entity_id.split_once('.').map_or("", |(domain, _)| domain);
    match Domain::from_str(prefix) {
        Ok(domain) => domain.to_string(),
        Err(_) => "homeassistant".into(),
    }
}
