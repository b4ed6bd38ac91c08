use chrono::{Duration, Utc};
use tabled::Tabled;

use homedash_core::CalendarEvent;

use crate::cli::{EventsArgs, GlobalOpts};
use crate::config::Context;
use crate::error::CliError;
use crate::output;

#[derive(Tabled)]
struct EventRow {
    #[tabled(rename = "Start")]
    start: String,
    #[tabled(rename = "End")]
    end: String,
    #[tabled(rename = "Summary")]
    summary: String,
    #[tabled(rename = "Location")]
    location: String,
}

fn row(event: &CalendarEvent) -> EventRow {
    EventRow {
        start: event.start().as_ref().map(ToString::to_string).unwrap_or_default(),
        end: event.end().as_ref().map(ToString::to_string).unwrap_or_default(),
        summary: event.summary().unwrap_or("(untitled)").to_owned(),
        location: event.location().unwrap_or_default().to_owned(),
    }
}

pub async fn handle(ctx: &Context, args: EventsArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let EventsArgs { entity, days } = args;
    let events = ctx
        .oneshot(|controller| async move {
            let start = Utc::now();
            let end = start + Duration::days(i64::from(days));
            controller
                .calendar_events(&entity, Some(start), Some(end))
                .await
        })
        .await?;

    let out = output::render_list(global.output, &events, row, |e| {
        e.summary().unwrap_or_default().to_owned()
    })?;
    output::print_output(&out);
    Ok(())
}
