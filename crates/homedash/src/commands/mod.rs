//! Command dispatch: bridges CLI args -> core operations -> output formatting.

pub mod control;
pub mod dashboard;
pub mod events;
pub mod login;
pub mod status;
pub mod watch;

use crate::cli::{Command, GlobalOpts};
use crate::config::Context;
use crate::error::CliError;

pub async fn dispatch(cmd: Command, ctx: &Context, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Status => status::handle(ctx, global).await,
        Command::Watch(args) => watch::handle(ctx, args, global).await,
        Command::Login(args) => login::handle(ctx, args).await,
        Command::Events(args) => events::handle(ctx, args, global).await,
        Command::Dashboard => dashboard::handle(ctx, global),
        Command::Toggle(args) => control::handle(ctx, control::Action::Toggle, args, global).await,
        Command::On(args) => control::handle(ctx, control::Action::On, args, global).await,
        Command::Off(args) => control::handle(ctx, control::Action::Off, args, global).await,
        Command::Arm(args) => control::handle(ctx, control::Action::Arm, args, global).await,
        Command::Disarm(args) => control::handle(ctx, control::Action::Disarm, args, global).await,
        Command::PlayPause(args) => {
            control::handle(ctx, control::Action::PlayPause, args, global).await
        }
    }
}
