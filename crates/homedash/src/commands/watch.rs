use owo_colors::OwoColorize;
use serde::Serialize;

use homedash_config::{DashboardConfig, Widget};
use homedash_core::{ConnectionStatus, CoreError, EntityMap, FailureReason};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::config::Context;
use crate::error::CliError;
use crate::output;

/// Per-room tally of the entities a room's widgets reference.
#[derive(Debug, Serialize, PartialEq, Eq)]
struct RoomSummary {
    room: String,
    entities: usize,
    on: usize,
    unavailable: usize,
    missing: usize,
}

fn summarize(dashboard: &DashboardConfig, entities: &EntityMap) -> Vec<RoomSummary> {
    dashboard
        .rooms
        .iter()
        .map(|(room, widgets)| {
            let ids: Vec<&str> = widgets.iter().flat_map(Widget::entity_ids).collect();
            let mut summary = RoomSummary {
                room: room.clone(),
                entities: ids.len(),
                on: 0,
                unavailable: 0,
                missing: 0,
            };
            for id in ids {
                match entities.get(id) {
                    Some(state) if state.is_unavailable() => summary.unavailable += 1,
                    Some(state) if state.is_on() => summary.on += 1,
                    Some(_) => {}
                    None => summary.missing += 1,
                }
            }
            summary
        })
        .collect()
}

fn render_summary(
    rooms: &[RoomSummary],
    format: OutputFormat,
    color: bool,
) -> Result<String, CliError> {
    if format == OutputFormat::Json {
        return output::render_json(rooms);
    }
    Ok(rooms
        .iter()
        .map(|r| {
            let mut line = format!("{}: {}/{} on", r.room, r.on, r.entities);
            if r.unavailable > 0 {
                let extra = format!(", {} unavailable", r.unavailable);
                line.push_str(&if color { extra.yellow().to_string() } else { extra });
            }
            if r.missing > 0 {
                line.push_str(&format!(", {} missing", r.missing));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n"))
}

fn failure_error(reason: &FailureReason) -> CliError {
    match reason {
        FailureReason::InvalidAuth(message) => CliError::AuthFailed {
            message: message.clone(),
        },
        FailureReason::HostRequired => CliError::HostRequired,
        FailureReason::AuthRequired => CliError::AuthRequired,
        FailureReason::CannotConnect(reason) => CliError::ConnectionFailed {
            url: "(reconnect)".into(),
            reason: reason.clone(),
        },
        FailureReason::Other(message) => CliError::Internal(message.clone()),
    }
}

pub async fn handle(ctx: &Context, args: WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let controller = if args.all {
        ctx.controller()
    } else {
        ctx.dashboard_controller()
    };
    let color = output::should_color(global.color);
    let mut status = controller.connection_status();
    let mut entities = controller.entities();

    controller.connect().await?;
    output::print_output(&output::status_label(&controller.status(), color));
    status.mark_unchanged();

    let result = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break Ok(()),
            changed = status.changed() => {
                if changed.is_err() {
                    break Err(CliError::from(CoreError::ConnectionLost));
                }
                let current = status.borrow_and_update().clone();
                output::print_output(&output::status_label(&current, color));
                if let ConnectionStatus::Failed(reason) = current {
                    break Err(failure_error(&reason));
                }
            }
            snapshot = entities.changed() => {
                let Some(snapshot) = snapshot else {
                    break Ok(());
                };
                let rooms = summarize(&ctx.dashboard, &snapshot);
                output::print_output(&render_summary(&rooms, global.output, color)?);
            }
        }
    };

    controller.disconnect().await;
    result
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use homedash_core::EntityState;

    use super::*;

    /// Dashboard with just the given rooms, in order.
    fn rooms(list: Vec<(&str, Vec<Widget>)>) -> DashboardConfig {
        let mut config = DashboardConfig::default();
        config.people.clear();
        config.rooms.clear();
        for (name, widgets) in list {
            config.rooms.insert(name.to_owned(), widgets);
        }
        config
    }

    fn state(entity_id: &str, value: &str) -> EntityState {
        serde_json::from_value(serde_json::json!({
            "entity_id": entity_id,
            "state": value,
            "attributes": {},
            "last_changed": "2024-05-01T00:00:00Z",
            "last_updated": "2024-05-01T00:00:00Z",
            "context": {"id": "c"}
        }))
        .unwrap()
    }

    fn light(entity_id: &str) -> Widget {
        Widget::Light {
            entity_id: entity_id.into(),
            label: None,
        }
    }

    #[test]
    fn counts_on_unavailable_and_missing() {
        let dashboard = rooms(vec![(
            "Hall",
            vec![light("light.a"), light("light.b"), light("light.c"), light("light.d")],
        )]);
        let entities: HashMap<String, EntityState> = [
            ("light.a", "on"),
            ("light.b", "off"),
            ("light.c", "unavailable"),
        ]
        .into_iter()
        .map(|(id, s)| (id.to_owned(), state(id, s)))
        .collect();

        let summary = summarize(&dashboard, &entities);
        assert_eq!(
            summary,
            vec![RoomSummary {
                room: "Hall".into(),
                entities: 4,
                on: 1,
                unavailable: 1,
                missing: 1,
            }]
        );
        assert_eq!(
            render_summary(&summary, OutputFormat::Table, false).unwrap(),
            "Hall: 1/4 on, 1 unavailable, 1 missing"
        );
    }

    #[test]
    fn rooms_keep_dashboard_order() {
        let dashboard = rooms(vec![("B", vec![light("light.b")]), ("A", vec![])]);
        let summary = summarize(&dashboard, &HashMap::new());
        let names: Vec<&str> = summary.iter().map(|r| r.room.as_str()).collect();
        assert_eq!(names, vec!["B", "A"]);
    }

    #[test]
    fn failure_reasons_map_to_cli_errors() {
        assert!(matches!(
            failure_error(&FailureReason::InvalidAuth("expired".into())),
            CliError::AuthFailed { .. }
        ));
        assert_eq!(
            failure_error(&FailureReason::CannotConnect("refused".into())).exit_code(),
            crate::error::exit_code::CONNECTION
        );
    }
}
