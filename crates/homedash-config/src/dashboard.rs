// ── Dashboard layout ──
//
// People and rooms of widgets the dashboard renders. A built-in layout is
// always available; a user document overrides people wholesale and rooms
// by name.

use std::collections::HashMap;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

const DEFAULT_DASHBOARD: &str = include_str!("default_dashboard.json");

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DashboardConfig {
    pub people: Vec<Person>,
    /// Room name to widgets, in display order.
    pub rooms: IndexMap<String, Vec<Widget>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub entity_id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_entity_id: Option<String>,
}

/// A tile in a room.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum Widget {
    #[serde(rename = "statusGrid")]
    StatusGrid {
        entity_ids: Vec<String>,
        #[serde(default)]
        labels: HashMap<String, String>,
        #[serde(default)]
        device_class: Option<String>,
        #[serde(default = "yes")]
        show_summary: bool,
    },
    #[serde(rename = "arm")]
    Arm {
        entity_id: String,
        #[serde(default)]
        label: Option<String>,
    },
    #[serde(rename = "calendar")]
    Calendar {
        entity_id: String,
        #[serde(default)]
        label: Option<String>,
        #[serde(default = "default_max_events")]
        max_events: usize,
        #[serde(default = "default_days_ahead")]
        days_ahead: u32,
        #[serde(default = "yes")]
        show_title: bool,
    },
    #[serde(rename = "media")]
    Media {
        entity_id: String,
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        temperature_entity_id: Option<String>,
    },
    #[serde(rename = "switch")]
    Switch {
        entity_id: String,
        #[serde(default)]
        label: Option<String>,
    },
    #[serde(rename = "light")]
    Light {
        entity_id: String,
        #[serde(default)]
        label: Option<String>,
    },
    #[serde(rename = "sensor")]
    Sensor {
        entity_id: String,
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        unit: Option<String>,
        #[serde(default)]
        format: Option<String>,
    },
    #[serde(rename = "binary_sensor")]
    BinarySensor {
        entity_id: String,
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        device_class: Option<String>,
    },
    /// Widget type this build does not render.
    #[serde(other)]
    Unsupported,
}

fn yes() -> bool {
    true
}

fn default_max_events() -> usize {
    5
}

fn default_days_ahead() -> u32 {
    7
}

impl Widget {
    /// Entities this widget reads.
    pub fn entity_ids(&self) -> Vec<&str> {
        match self {
            Self::StatusGrid { entity_ids, .. } => entity_ids.iter().map(String::as_str).collect(),
            Self::Media {
                entity_id,
                temperature_entity_id,
                ..
            } => std::iter::once(entity_id.as_str())
                .chain(temperature_entity_id.as_deref())
                .collect(),
            Self::Arm { entity_id, .. }
            | Self::Calendar { entity_id, .. }
            | Self::Switch { entity_id, .. }
            | Self::Light { entity_id, .. }
            | Self::Sensor { entity_id, .. }
            | Self::BinarySensor { entity_id, .. } => vec![entity_id.as_str()],
            Self::Unsupported => Vec::new(),
        }
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            Self::Arm { label, .. }
            | Self::Calendar { label, .. }
            | Self::Media { label, .. }
            | Self::Switch { label, .. }
            | Self::Light { label, .. }
            | Self::Sensor { label, .. }
            | Self::BinarySensor { label, .. } => label.as_deref(),
            Self::StatusGrid { .. } | Self::Unsupported => None,
        }
    }
}

impl DashboardConfig {
    /// Every entity referenced by people and widgets, deduplicated, in
    /// first-seen order.
    pub fn entity_ids(&self) -> Vec<String> {
        let people = self.people.iter().flat_map(|p| {
            std::iter::once(p.entity_id.as_str()).chain(p.battery_entity_id.as_deref())
        });
        let widgets = self.rooms.values().flatten().flat_map(Widget::entity_ids);

        let mut seen = indexmap::IndexSet::new();
        for id in people.chain(widgets) {
            seen.insert(id);
        }
        seen.into_iter().map(str::to_owned).collect()
    }

    /// Overlay a user document: its people replace the defaults when
    /// present; its rooms replace same-named rooms in place and append
    /// new ones.
    fn merge(mut self, user: UserDashboard) -> Self {
        if let Some(people) = user.people {
            self.people = people;
        }
        for (name, widgets) in user.rooms.unwrap_or_default() {
            self.rooms.insert(name, widgets);
        }
        self
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        match serde_json::from_str(DEFAULT_DASHBOARD) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "built-in dashboard is invalid");
                Self {
                    people: Vec::new(),
                    rooms: IndexMap::new(),
                }
            }
        }
    }
}

/// User documents may carry either section or neither.
#[derive(Debug, Deserialize)]
struct UserDashboard {
    #[serde(default)]
    people: Option<Vec<Person>>,
    #[serde(default)]
    rooms: Option<IndexMap<String, Vec<Widget>>>,
}

// ── Loading ─────────────────────────────────────────────────────────

/// Built-in layout overlaid with the document at `path`. A missing or
/// unparsable document falls back to the built-in layout.
pub fn load_dashboard(path: Option<&Path>) -> DashboardConfig {
    let defaults = DashboardConfig::default();
    let Some(path) = path else {
        return defaults;
    };

    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "no user dashboard, using defaults");
            return defaults;
        }
    };

    match serde_json::from_str::<UserDashboard>(&raw) {
        Ok(user) => {
            info!(path = %path.display(), "loaded user dashboard");
            defaults.merge(user)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "user dashboard unparsable, using defaults");
            defaults
        }
    }
}
