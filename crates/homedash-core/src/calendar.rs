// ── Calendar query adapter ──
//
// `calendar.get_events` answers with an envelope whose shape differs
// across hub releases and calendar integrations. The adapter treats the
// reply as an untyped tree and looks for "the array of event-like
// objects" wherever it sits: first a depth-first search, then a fixed
// list of known locations. Finding nothing is a valid empty result.

use std::fmt;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use homedash_api::HubConnection;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::error::{CoreError, query_error};

/// Query window when no end is given.
pub const DEFAULT_WINDOW_DAYS: i64 = 7;

const EVENT_KEYS: [&str; 4] = ["summary", "start", "end", "title"];

// ── Event types ──────────────────────────────────────────────────────

/// Start or end of a calendar event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTime {
    DateTime(DateTime<FixedOffset>),
    /// Wall-clock time without an offset.
    Floating(NaiveDateTime),
    /// All-day events carry only a date.
    Date(NaiveDate),
}

impl EventTime {
    pub fn parse(raw: &str) -> Option<Self> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(Self::DateTime(dt));
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
            return Some(Self::Floating(dt));
        }
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .map(Self::Date)
    }

    /// Accepts `"2024-01-01"`, RFC 3339 strings, and the
    /// `{"dateTime": ..}` / `{"date": ..}` objects some integrations use.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(raw) => Self::parse(raw),
            Value::Object(map) => map
                .get("dateTime")
                .or_else(|| map.get("date"))
                .and_then(Value::as_str)
                .and_then(Self::parse),
            _ => None,
        }
    }

    pub fn is_all_day(&self) -> bool {
        matches!(self, Self::Date(_))
    }
}

impl fmt::Display for EventTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M")),
            Self::Floating(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M")),
            Self::Date(date) => write!(f, "{}", date.format("%Y-%m-%d")),
        }
    }
}

/// One event exactly as the hub returned it, with typed accessors for
/// the common fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CalendarEvent {
    raw: Value,
}

impl CalendarEvent {
    pub fn new(raw: Value) -> Self {
        Self { raw }
    }

    fn text(&self, key: &str) -> Option<&str> {
        self.raw.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
    }

    /// `summary`, else `title`.
    pub fn summary(&self) -> Option<&str> {
        self.text("summary").or_else(|| self.text("title"))
    }

    pub fn start(&self) -> Option<EventTime> {
        self.raw.get("start").and_then(EventTime::from_value)
    }

    pub fn end(&self) -> Option<EventTime> {
        self.raw.get("end").and_then(EventTime::from_value)
    }

    pub fn description(&self) -> Option<&str> {
        self.text("description")
    }

    pub fn location(&self) -> Option<&str> {
        self.text("location")
    }

    /// Any other field, hub-specific ones included.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.raw.get(key)
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn into_raw(self) -> Value {
        self.raw
    }
}

// ── Response heuristic ───────────────────────────────────────────────

/// JavaScript truthiness, which is what integrations rely on when they
/// leave fields empty.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f.abs() > 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Non-empty array whose first element is an object with a truthy
/// `summary`, `start`, `end` or `title`.
fn is_event_array(items: &[Value]) -> bool {
    items.first().and_then(Value::as_object).is_some_and(|first| {
        EVENT_KEYS
            .iter()
            .any(|key| first.get(*key).is_some_and(truthy))
    })
}

fn event_array(value: Option<&Value>) -> Option<&Vec<Value>> {
    value
        .and_then(Value::as_array)
        .filter(|items| is_event_array(items))
}

/// Depth-first search for the first event-like array.
///
/// Arrays are leaves: a non-matching array is not searched inside.
/// Object members are visited in document order.
pub fn find_event_array(tree: &Value) -> Option<&Vec<Value>> {
    match tree {
        Value::Array(items) => is_event_array(items).then_some(items),
        Value::Object(map) => map.values().find_map(find_event_array),
        _ => None,
    }
}

/// Known event locations, checked when the recursive search finds
/// nothing. Only non-empty arrays count.
pub fn fallback_event_array<'a>(tree: &'a Value, entity_id: &str) -> Option<&'a Vec<Value>> {
    let found = match tree.get("response") {
        Some(response) if truthy(response) => match response {
            Value::Array(items) => Some(items),
            Value::Object(map) => map
                .get(entity_id)
                .and_then(Value::as_array)
                .or_else(|| map.get("events").and_then(Value::as_array))
                .or_else(|| map.values().find_map(|v| event_array(Some(v)))),
            _ => None,
        },
        _ => match tree {
            Value::Array(items) if is_event_array(items) => Some(items),
            _ => tree
                .get("events")
                .and_then(Value::as_array)
                .or_else(|| tree.get(entity_id).and_then(Value::as_array)),
        },
    };
    found.filter(|items| !items.is_empty())
}

/// Locate the events in a `get_events` reply. Empty if nothing looks like
/// an event array.
pub fn extract_events(tree: &Value, entity_id: &str) -> Vec<CalendarEvent> {
    let found = find_event_array(tree).or_else(|| {
        debug!(entity_id, "no event array found recursively, trying known locations");
        fallback_event_array(tree, entity_id)
    });

    found
        .map(|items| items.iter().cloned().map(CalendarEvent::new).collect())
        .unwrap_or_default()
}

// ── Query ────────────────────────────────────────────────────────────

/// Window `[start, end)`: `start` defaults to `now`, `end` to
/// `start + 7 days`.
pub fn query_window(
    now: DateTime<Utc>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = start.unwrap_or(now);
    let end = end.unwrap_or_else(|| start + Duration::days(DEFAULT_WINDOW_DAYS));
    (start, end)
}

fn iso(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// `service_data` for `calendar.get_events`.
pub fn get_events_request(entity_id: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Value {
    json!({
        "entity_id": entity_id,
        "start_date_time": iso(start),
        "end_date_time": iso(end),
    })
}

/// Fetch events for `entity_id` over `conn`. No connection is a
/// [`CoreError::NotConnected`]; any failure of the call itself is a
/// [`CoreError::Query`].
pub async fn get_events(
    conn: Option<&HubConnection>,
    entity_id: &str,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Result<Vec<CalendarEvent>, CoreError> {
    let conn = conn.ok_or(CoreError::NotConnected)?;
    let (start, end) = query_window(Utc::now(), start, end);
    debug!(entity_id, %start, %end, "fetching calendar events");

    let reply = conn
        .call_service(
            "calendar",
            "get_events",
            get_events_request(entity_id, start, end),
            true,
        )
        .await
        .map_err(query_error)?;

    let events = extract_events(&reply, entity_id);
    debug!(entity_id, count = events.len(), "calendar events extracted");
    Ok(events)
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const ENTITY: &str = "calendar.family";

    #[test]
    fn events_under_response_events() {
        let tree = json!({"response": {"events": [{"summary": "A", "start": "2024-01-01"}]}});
        let events = extract_events(&tree, ENTITY);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].summary(), Some("A"));
        assert_eq!(
            events[0].start(),
            Some(EventTime::Date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()))
        );
        assert_eq!(
            events[0].raw(),
            &json!({"summary": "A", "start": "2024-01-01"})
        );
    }

    #[test]
    fn empty_array_is_empty_result() {
        assert!(extract_events(&json!([]), ENTITY).is_empty());
        assert!(extract_events(&Value::Null, ENTITY).is_empty());
        assert!(extract_events(&json!({}), ENTITY).is_empty());
    }

    #[test]
    fn nested_array_found_recursively() {
        let tree = json!({"foo": {"bar": [{"title": "X", "start": "t1", "end": "t2"}]}});
        let events = extract_events(&tree, ENTITY);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].summary(), Some("X"));
        // Unparseable times are kept raw but have no typed value.
        assert_eq!(events[0].start(), None);
        assert_eq!(events[0].get("end"), Some(&json!("t2")));
    }

    #[test]
    fn current_hub_envelope() {
        let tree = json!({
            "context": {"id": "01HX", "parent_id": null, "user_id": "u1"},
            "response": {
                "calendar.family": {
                    "events": [
                        {"start": "2024-05-01T09:00:00+02:00", "end": "2024-05-01T10:00:00+02:00", "summary": "Dentist", "location": "Main St"},
                        {"start": "2024-05-02", "end": "2024-05-03", "summary": "Holiday"}
                    ]
                }
            }
        });
        let events = extract_events(&tree, ENTITY);

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].location(), Some("Main St"));
        assert!(matches!(events[0].start(), Some(EventTime::DateTime(_))));
        assert!(events[1].start().unwrap().is_all_day());
    }

    #[test]
    fn first_match_in_document_order() {
        let tree = json!({
            "b": [{"summary": "first"}],
            "a": [{"summary": "second"}]
        });
        let found = find_event_array(&tree).unwrap();
        assert_eq!(found[0]["summary"], "first");
    }

    #[test]
    fn falsy_event_keys_do_not_match() {
        let tree = json!([{"summary": "", "start": null, "end": 0, "title": false}]);
        assert!(find_event_array(&tree).is_none());
    }

    #[test]
    fn arrays_are_not_descended() {
        let tree = json!({"wrap": [[{"summary": "hidden"}]]});
        assert!(find_event_array(&tree).is_none());
        assert!(extract_events(&tree, ENTITY).is_empty());
    }

    #[test]
    fn fallback_takes_response_array_as_is() {
        let tree = json!({"response": [1, 2]});
        assert!(find_event_array(&tree).is_none());
        assert_eq!(extract_events(&tree, ENTITY).len(), 2);
    }

    #[test]
    fn fallback_prefers_entity_key_over_events() {
        let tree = json!({"response": {
            "events": [{"id": 1}],
            "calendar.family": [{"id": 2}]
        }});
        let found = fallback_event_array(&tree, ENTITY).unwrap();
        assert_eq!(found[0]["id"], 2);
    }

    #[test]
    fn fallback_outside_response() {
        let events = json!({"events": [{"id": 1}]});
        assert_eq!(fallback_event_array(&events, ENTITY).unwrap().len(), 1);

        let keyed = json!({"calendar.family": [{"id": 1}]});
        assert_eq!(fallback_event_array(&keyed, ENTITY).unwrap().len(), 1);

        let empty = json!({"events": []});
        assert!(fallback_event_array(&empty, ENTITY).is_none());
    }

    #[test]
    fn window_defaults() {
        let now = DateTime::parse_from_rfc3339("2024-01-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let (start, end) = query_window(now, None, None);
        assert_eq!(start, now);
        assert_eq!(end - start, Duration::days(7));

        let later = now + Duration::days(3);
        let (start, end) = query_window(now, Some(later), None);
        assert_eq!(start, later);
        assert_eq!(end, later + Duration::days(7));
    }

    #[test]
    fn request_uses_millisecond_iso_timestamps() {
        let start = DateTime::parse_from_rfc3339("2024-01-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let body = get_events_request(ENTITY, start, start + Duration::days(7));

        assert_eq!(body["entity_id"], ENTITY);
        assert_eq!(body["start_date_time"], "2024-01-01T12:00:00.000Z");
        assert_eq!(body["end_date_time"], "2024-01-08T12:00:00.000Z");
    }

    #[tokio::test]
    async fn no_connection_is_not_connected() {
        let result = get_events(None, ENTITY, None, None).await;
        assert!(matches!(result, Err(CoreError::NotConnected)));
    }

    #[test]
    fn event_time_variants() {
        assert!(matches!(
            EventTime::parse("2024-01-01T10:00:00"),
            Some(EventTime::Floating(_))
        ));
        assert!(matches!(
            EventTime::from_value(&json!({"dateTime": "2024-01-01T10:00:00Z"})),
            Some(EventTime::DateTime(_))
        ));
        assert!(matches!(
            EventTime::from_value(&json!({"date": "2024-01-01"})),
            Some(EventTime::Date(_))
        ));
        assert_eq!(EventTime::from_value(&json!(42)), None);
    }
}
