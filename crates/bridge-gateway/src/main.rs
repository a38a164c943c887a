use clap::Parser;

mod add_agent;
mod app;
mod cli;
mod delivery;
mod hook;
mod run;
mod transcript_paths;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bridge_gateway=info,tower_http=debug".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            let config_path_str = cli.config.as_ref().and_then(|p| p.to_str()).map(String::from);
            let config = bridge_core::config::BridgeConfig::load(config_path_str.as_deref())?;
            let state = app::AppState::build(config)?;
            run::run(state).await
        }
        Command::Hook { window, agent } => hook::run(cli.config, &window, &agent),
        Command::AddAgent => add_agent::run(cli.config),
    }
}
