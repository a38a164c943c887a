//! `add-agent` subcommand (spec.md §6): walks an operator through adding a
//! new `[[agents]]` block to the settings file instead of hand-editing TOML.

use std::io::{self, Write as _};
use std::path::PathBuf;

use serde::Serialize;

#[derive(Debug, Serialize)]
struct AgentBlock {
    name: String,
    bot_token_env: String,
    mode: String,
    allowed_users: Vec<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    claude_command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    require_mention: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dm_allowed: Option<bool>,
}

#[derive(Debug, Serialize)]
struct Wrapper {
    agents: Vec<AgentBlock>,
}

fn prompt(label: &str) -> anyhow::Result<String> {
    print!("{label}: ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn prompt_default(label: &str, default: &str) -> anyhow::Result<String> {
    let answer = prompt(&format!("{label} [{default}]"))?;
    Ok(if answer.is_empty() { default.to_string() } else { answer })
}

pub fn run(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(|| {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".bridge").join("settings.toml")
    });

    let name = prompt("agent name")?;
    let bot_token_env = prompt_default("bot token env var", &format!("{}_BOT_TOKEN", name.to_uppercase()))?;
    let mode = prompt_default("mode (topic|chat)", "topic")?;
    let allowed_users_raw = prompt("allowed user ids (comma separated)")?;
    let allowed_users: Vec<i64> = allowed_users_raw
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect();
    if allowed_users.is_empty() {
        anyhow::bail!("at least one allowed user id is required");
    }
    let claude_command = prompt("claude command override (blank for global default)")?;
    let require_mention = prompt_default("require @mention in groups? (y/n)", "y")?;
    let dm_allowed = prompt_default("allow direct messages? (y/n)", "y")?;

    let block = AgentBlock {
        name,
        bot_token_env,
        mode,
        allowed_users,
        claude_command: if claude_command.is_empty() { None } else { Some(claude_command) },
        require_mention: Some(require_mention.eq_ignore_ascii_case("y")),
        dm_allowed: Some(dm_allowed.eq_ignore_ascii_case("y")),
    };

    let rendered = toml::to_string_pretty(&Wrapper { agents: vec![block] })?;

    let existing = std::fs::read_to_string(&path).unwrap_or_default();
    let mut updated = existing;
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push('\n');
    updated.push_str(&rendered);

    bridge_core::atomic::write_text(&path, &updated)?;
    println!("appended new agent to {}", path.display());
    Ok(())
}
