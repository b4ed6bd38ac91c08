use serde::Serialize;
use tabled::Tabled;

use homedash_config::Widget;

use crate::cli::GlobalOpts;
use crate::config::Context;
use crate::error::CliError;
use crate::output;

#[derive(Serialize)]
struct WidgetEntry<'a> {
    room: &'a str,
    widget: &'a Widget,
}

#[derive(Tabled)]
struct WidgetRow {
    #[tabled(rename = "Room")]
    room: String,
    #[tabled(rename = "Type")]
    kind: &'static str,
    #[tabled(rename = "Label")]
    label: String,
    #[tabled(rename = "Entities")]
    entities: String,
}

fn kind(widget: &Widget) -> &'static str {
    match widget {
        Widget::StatusGrid { .. } => "statusGrid",
        Widget::Arm { .. } => "arm",
        Widget::Calendar { .. } => "calendar",
        Widget::Media { .. } => "media",
        Widget::Switch { .. } => "switch",
        Widget::Light { .. } => "light",
        Widget::Sensor { .. } => "sensor",
        Widget::BinarySensor { .. } => "binary_sensor",
        Widget::Unsupported => "unsupported",
    }
}

fn row(entry: &WidgetEntry<'_>) -> WidgetRow {
    WidgetRow {
        room: entry.room.to_owned(),
        kind: kind(entry.widget),
        label: entry.widget.label().unwrap_or_default().to_owned(),
        entities: entry.widget.entity_ids().join(", "),
    }
}

pub fn handle(ctx: &Context, global: &GlobalOpts) -> Result<(), CliError> {
    let entries: Vec<WidgetEntry<'_>> = ctx
        .dashboard
        .rooms
        .iter()
        .flat_map(|(room, widgets)| {
            widgets.iter().map(move |widget| WidgetEntry {
                room: room.as_str(),
                widget,
            })
        })
        .collect();

    let out = output::render_list(global.output, &entries, row, |e| {
        e.widget.entity_ids().join(" ")
    })?;
    output::print_output(&out);
    Ok(())
}
