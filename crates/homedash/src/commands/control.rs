use homedash_core::Command;

use crate::cli::{EntityArgs, GlobalOpts, OutputFormat};
use crate::config::Context;
use crate::error::CliError;
use crate::output;

#[derive(Debug, Clone, Copy)]
pub enum Action {
    Toggle,
    On,
    Off,
    Arm,
    Disarm,
    PlayPause,
}

impl Action {
    fn command(self, entity_id: String) -> Command {
        match self {
            Self::Toggle => Command::Toggle { entity_id },
            Self::On => Command::TurnOn { entity_id },
            Self::Off => Command::TurnOff { entity_id },
            Self::Arm => Command::Arm { entity_id },
            Self::Disarm => Command::Disarm { entity_id },
            Self::PlayPause => Command::MediaPlayPause { entity_id },
        }
    }
}

pub async fn handle(
    ctx: &Context,
    action: Action,
    args: EntityArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let command = action.command(args.entity);
    let call = command.service_call();

    let request = command.clone();
    let response = ctx
        .oneshot(|controller| async move { controller.execute(request).await })
        .await?;

    let out = match global.output {
        OutputFormat::Json => output::render_json(&response)?,
        OutputFormat::Table | OutputFormat::Plain => format!(
            "{}.{} {}",
            call.domain,
            call.service,
            command.entity_id()
        ),
    };
    output::print_output(&out);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_map_to_commands() {
        let cmd = Action::PlayPause.command("media_player.tv".into());
        assert_eq!(
            cmd,
            Command::MediaPlayPause {
                entity_id: "media_player.tv".into()
            }
        );
        assert_eq!(Action::Arm.command("input_boolean.x".into()).service_call().service, "turn_on");
    }
}
