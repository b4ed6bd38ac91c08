// Entity state model and the compressed `subscribe_entities` feed.
//
// The hub does not push full state objects. After the initial `a` (add)
// message it sends per-entity diffs: `c` (change, with `+` additions and
// `-` attribute removals) and `r` (removed entity ids). Timestamps are
// float epoch seconds, contexts are either a bare id or a full object.
// `EntitySubscription` folds those into a private map and hands out a
// complete snapshot after every message. A reconnect starts the map over:
// the new session's `a` message is the whole state again.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::Error;
use crate::protocol::typed_message;
use crate::websocket::FeedItem;
use crate::websocket::HubConnection;

/// All known entities keyed by entity id.
pub type EntityMap = HashMap<String, EntityState>;

// ── Entity state ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    pub id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Current state of one entity as the dashboard sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    pub last_changed: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub context: Context,
}

impl EntityState {
    /// `light.kitchen` → `light`.
    pub fn domain(&self) -> &str {
        self.entity_id
            .split_once('.')
            .map_or(self.entity_id.as_str(), |(domain, _)| domain)
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// `friendly_name` attribute, else the entity id.
    pub fn friendly_name(&self) -> &str {
        self.attributes
            .get("friendly_name")
            .and_then(Value::as_str)
            .unwrap_or(&self.entity_id)
    }

    pub fn is_on(&self) -> bool {
        self.state == "on"
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self.state.as_str(), "unavailable" | "unknown")
    }
}

// ── Compressed wire format ───────────────────────────────────────────

/// One `event` payload of a `subscribe_entities` subscription.
#[derive(Debug, Default, Deserialize)]
pub struct EntityDiff {
    #[serde(default, rename = "a")]
    pub added: HashMap<String, CompressedState>,
    #[serde(default, rename = "c")]
    pub changed: HashMap<String, CompressedChange>,
    #[serde(default, rename = "r")]
    pub removed: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CompressedContext {
    Id(String),
    Full(Context),
}

#[derive(Debug, Deserialize)]
pub struct CompressedState {
    #[serde(rename = "s")]
    pub state: String,
    #[serde(default, rename = "a")]
    pub attributes: Map<String, Value>,
    #[serde(default, rename = "c")]
    pub context: Option<CompressedContext>,
    #[serde(default, rename = "lc")]
    pub last_changed: f64,
    #[serde(default, rename = "lu")]
    pub last_updated: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CompressedChange {
    #[serde(default, rename = "+")]
    pub additions: Option<CompressedPatch>,
    #[serde(default, rename = "-")]
    pub removals: Option<AttributeRemovals>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CompressedPatch {
    #[serde(default, rename = "s")]
    pub state: Option<String>,
    #[serde(default, rename = "a")]
    pub attributes: Option<Map<String, Value>>,
    #[serde(default, rename = "c")]
    pub context: Option<CompressedContext>,
    #[serde(default, rename = "lc")]
    pub last_changed: Option<f64>,
    #[serde(default, rename = "lu")]
    pub last_updated: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AttributeRemovals {
    #[serde(default, rename = "a")]
    pub attributes: Vec<String>,
}

#[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
fn timestamp(secs: f64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis((secs * 1000.0).round() as i64).unwrap_or_default()
}

fn expand_context(context: Option<CompressedContext>) -> Context {
    match context {
        Some(CompressedContext::Id(id)) => Context {
            id,
            ..Context::default()
        },
        Some(CompressedContext::Full(full)) => full,
        None => Context::default(),
    }
}

/// Fold one diff into `entities`.
///
/// Changes for entities that were never added are skipped.
pub fn apply_diff(entities: &mut EntityMap, diff: EntityDiff) {
    for (entity_id, added) in diff.added {
        let last_changed = timestamp(added.last_changed);
        let last_updated = added.last_updated.map_or(last_changed, timestamp);
        entities.insert(
            entity_id.clone(),
            EntityState {
                entity_id,
                state: added.state,
                attributes: added.attributes,
                last_changed,
                last_updated,
                context: expand_context(added.context),
            },
        );
    }

    for (entity_id, change) in diff.changed {
        let Some(entity) = entities.get_mut(&entity_id) else {
            warn!(entity_id, "change for unknown entity, skipping");
            continue;
        };

        if let Some(patch) = change.additions {
            if let Some(state) = patch.state {
                entity.state = state;
            }
            match patch.context {
                Some(CompressedContext::Id(id)) => entity.context.id = id,
                Some(CompressedContext::Full(full)) => entity.context = full,
                None => {}
            }
            if let Some(lc) = patch.last_changed {
                entity.last_changed = timestamp(lc);
                entity.last_updated = entity.last_changed;
            } else if let Some(lu) = patch.last_updated {
                entity.last_updated = timestamp(lu);
            }
            if let Some(attributes) = patch.attributes {
                entity.attributes.extend(attributes);
            }
        }

        if let Some(removals) = change.removals {
            for key in &removals.attributes {
                entity.attributes.remove(key);
            }
        }
    }

    for entity_id in diff.removed {
        entities.remove(&entity_id);
    }
}

// ── Subscription ─────────────────────────────────────────────────────

/// Live `subscribe_entities` feed that yields full snapshots.
///
/// Dropping it ends the subscription on the hub.
#[derive(Debug)]
pub struct EntitySubscription {
    events: mpsc::UnboundedReceiver<FeedItem>,
    entities: EntityMap,
}

impl EntitySubscription {
    pub fn new(events: mpsc::UnboundedReceiver<FeedItem>) -> Self {
        Self {
            events,
            entities: EntityMap::new(),
        }
    }

    /// Wait for the next diff and return the resulting snapshot. `None`
    /// once the connection is closed for good.
    pub async fn next_snapshot(&mut self) -> Option<Arc<EntityMap>> {
        loop {
            let raw = match self.events.recv().await? {
                FeedItem::Event(raw) => raw,
                FeedItem::Resubscribed => {
                    debug!(stale = self.entities.len(), "resubscribed, discarding entity state");
                    self.entities.clear();
                    continue;
                }
            };
            match serde_json::from_value::<EntityDiff>(raw) {
                Ok(diff) => {
                    apply_diff(&mut self.entities, diff);
                    debug!(entities = self.entities.len(), "entity snapshot assembled");
                    return Some(Arc::new(self.entities.clone()));
                }
                Err(e) => warn!(error = %e, "malformed entity diff, ignoring"),
            }
        }
    }
}

impl HubConnection {
    /// Subscribe to compressed entity state updates, optionally limited to
    /// `entity_ids`.
    pub async fn subscribe_entities(
        &self,
        entity_ids: Option<&[String]>,
    ) -> Result<EntitySubscription, Error> {
        let mut payload = typed_message("subscribe_entities");
        if let Some(ids) = entity_ids {
            payload.insert(
                "entity_ids".into(),
                Value::Array(ids.iter().cloned().map(Value::String).collect()),
            );
        }
        let events = self.subscribe_message(payload).await?;
        Ok(EntitySubscription::new(events))
    }
}
