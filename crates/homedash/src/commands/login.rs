use dialoguer::Input;
use tracing::warn;

use crate::cli::LoginArgs;
use crate::config::Context;
use crate::error::CliError;
use crate::output;

pub async fn handle(ctx: &Context, args: LoginArgs) -> Result<(), CliError> {
    let controller = ctx.controller();

    if args.reset {
        controller.logout().await?;
        output::print_output("Stored credentials cleared.");
    }
    if ctx.hub.access_token.is_some() {
        warn!("a configured access token takes precedence over stored login credentials");
    }

    let hub = controller.hub_url()?;
    let code = match args.code {
        Some(code) => code,
        None => {
            let url = controller.authorize_url(None)?;
            output::print_output(&format!(
                "Open this URL, approve access, and copy the `code` parameter from the redirect:\n\n  {url}\n"
            ));
            Input::<String>::new()
                .with_prompt("Authorization code")
                .interact_text()?
        }
    };

    let credentials = controller.complete_login(&code).await?;
    output::print_output(&format!(
        "Logged in to {hub} (token valid until {}).",
        credentials.expires_at.format("%Y-%m-%d %H:%M UTC")
    ));
    Ok(())
}
