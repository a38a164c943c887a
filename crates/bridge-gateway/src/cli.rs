//! CLI surface (spec.md §6): a single binary dispatching subcommands.
//! Default (no subcommand) runs the bot; `hook` feeds the assistant CLI's
//! session-start hook into `session_map.json`; `add-agent` walks an operator
//! through appending a new `[[agents]]` block to the settings file.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "bridge-gateway", version, about = "Terminal-to-chat bridge for a local coding assistant")]
pub struct Cli {
    /// Path to the settings TOML file. Defaults to `~/.bridge/settings.toml`.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the bridge (default if no subcommand is given).
    Run,
    /// Consume one session-start hook event from stdin and record it in
    /// `session_map.json` for the window named `--window`.
    Hook {
        #[arg(long)]
        window: String,
        /// Agent the window belongs to, to find the right agent directory.
        #[arg(long)]
        agent: String,
    },
    /// Interactively append a new `[[agents]]` block to the settings file.
    AddAgent,
}
