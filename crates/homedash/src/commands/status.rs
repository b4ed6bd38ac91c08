use std::time::Duration;

use serde::Serialize;

use crate::cli::GlobalOpts;
use crate::config::Context;
use crate::error::CliError;
use crate::output;

/// How long to wait for the first entity snapshot.
const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct HubStatus {
    hub: String,
    ha_version: String,
    status: String,
    entities: usize,
}

pub async fn handle(ctx: &Context, global: &GlobalOpts) -> Result<(), CliError> {
    let controller = ctx.controller();
    let mut entities = controller.entities();
    controller.connect().await?;

    let snapshot = match tokio::time::timeout(SNAPSHOT_TIMEOUT, entities.changed()).await {
        Ok(Some(snapshot)) => snapshot,
        _ => entities.latest(),
    };

    let status = controller.status();
    let color = output::should_color(global.color);
    let report = HubStatus {
        hub: controller.hub_url()?.to_string(),
        ha_version: controller
            .connection()
            .map(|c| c.ha_version().to_owned())
            .unwrap_or_default(),
        status: status.to_string(),
        entities: snapshot.len(),
    };
    controller.disconnect().await;

    let out = output::render_single(
        global.output,
        &report,
        |r| {
            output::key_values(&[
                ("Hub", r.hub.clone()),
                ("Version", r.ha_version.clone()),
                ("Status", output::status_label(&status, color)),
                ("Entities", r.entities.to_string()),
            ])
        },
        |r| r.ha_version.clone(),
    )?;
    output::print_output(&out);
    Ok(())
}
