//! Clap derive structures for the `homedash` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// homedash -- headless Home Assistant dashboard
#[derive(Debug, Parser)]
#[command(
    name = "homedash",
    version,
    about = "Watch and control a Home Assistant hub from the terminal",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "HOMEDASH_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Hub URL (overrides config and the remembered address)
    #[arg(long, env = "HOMEDASH_URL", global = true)]
    pub hub: Option<String>,

    /// Long-lived access token
    #[arg(long, env = "HOMEDASH_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,

    /// Output format
    #[arg(long, short = 'o', default_value = "table", global = true)]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    Auto,
    Always,
    Never,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Connect and report hub version and entity count
    Status,

    /// Follow connection status and room summaries until Ctrl-C
    Watch(WatchArgs),

    /// Authorize this client with the hub
    Login(LoginArgs),

    /// List upcoming calendar events
    Events(EventsArgs),

    /// Show the dashboard layout
    Dashboard,

    /// Toggle an entity
    Toggle(EntityArgs),

    /// Turn an entity on
    On(EntityArgs),

    /// Turn an entity off
    Off(EntityArgs),

    /// Arm an alarm flag (input_boolean)
    Arm(EntityArgs),

    /// Disarm an alarm flag (input_boolean)
    Disarm(EntityArgs),

    /// Play or pause a media player
    PlayPause(EntityArgs),
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Subscribe to every entity instead of just the dashboard's
    #[arg(long)]
    pub all: bool,
}

#[derive(Debug, Args)]
pub struct LoginArgs {
    /// Forget stored credentials before logging in
    #[arg(long)]
    pub reset: bool,

    /// Authorization code from the redirect (prompted for if omitted)
    #[arg(long)]
    pub code: Option<String>,
}

#[derive(Debug, Args)]
pub struct EventsArgs {
    /// Calendar entity, e.g. calendar.family
    pub entity: String,

    /// Days ahead to query
    #[arg(long, default_value_t = 7, value_parser = clap::value_parser!(u32).range(1..=366))]
    pub days: u32,
}

#[derive(Debug, Args)]
pub struct EntityArgs {
    /// Entity id, e.g. light.kitchen
    pub entity: String,
}
