use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::types::AgentMode;

pub const DEFAULT_SHARE_PORT: u16 = 8787;
pub const DEFAULT_STATUS_POLL_SECS: u64 = 1;
pub const DEFAULT_MONITOR_POLL_SECS: u64 = 2;
pub const DEFAULT_FREEZE_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_CRON_TICK_SECS: u64 = 60;
pub const DEFAULT_SHARE_TTL_SECS: u64 = 1800;

/// Top-level settings file (`settings.toml`) plus `BRIDGE_*` env overrides.
///
/// Mirrors spec.md §6: a `[global]` table and one or more `[[agents]]`
/// blocks, each of which may override any `[global]` key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub agents: Vec<AgentSettings>,
    #[serde(default)]
    pub share: ShareConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            global: GlobalConfig::default(),
            agents: Vec::new(),
            share: ShareConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Defaults applied to every `[[agents]]` block unless overridden.
    #[serde(default = "default_claude_command")]
    pub claude_command: String,
    #[serde(default)]
    pub whisper_model: Option<String>,
    #[serde(default = "default_tz")]
    pub cron_default_tz: String,
    #[serde(default = "default_locale")]
    pub locale: String,
    /// Agent-dir root: persisted state files (spec.md §6) live under
    /// `<agent_dir>/<agent-name>/`.
    #[serde(default = "default_agent_dir")]
    pub agent_dir: String,
    /// Root(s) under which agent workspaces may be created.
    #[serde(default = "default_workspace_root")]
    pub workspace_root: String,
    /// User ids (platform-native, e.g. Telegram numeric ids as strings)
    /// alerted by J2 after repeated consecutive failures, and by the
    /// Tunnel Supervisor on give-up.
    #[serde(default)]
    pub admin_user_ids: Vec<String>,
    #[serde(default = "default_status_poll_secs")]
    pub status_poll_secs: u64,
    #[serde(default = "default_monitor_poll_secs")]
    pub monitor_poll_secs: u64,
    #[serde(default = "default_freeze_timeout_secs")]
    pub freeze_timeout_secs: u64,
    #[serde(default = "default_cron_tick_secs")]
    pub cron_tick_secs: u64,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            claude_command: default_claude_command(),
            whisper_model: None,
            cron_default_tz: default_tz(),
            locale: default_locale(),
            agent_dir: default_agent_dir(),
            workspace_root: default_workspace_root(),
            admin_user_ids: Vec::new(),
            status_poll_secs: default_status_poll_secs(),
            monitor_poll_secs: default_monitor_poll_secs(),
            freeze_timeout_secs: default_freeze_timeout_secs(),
            cron_tick_secs: default_cron_tick_secs(),
        }
    }
}

/// One `[[agents]]` block. Any field left `None` falls back to `[global]`
/// (see `AgentSettings::resolved`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    pub name: String,
    /// Name of the environment variable holding the bot token (not the
    /// token itself — spec.md §6 `<AGENT>_BOT_TOKEN`).
    pub bot_token_env: String,
    pub mode: AgentMode,
    #[serde(default)]
    pub allowed_users: Vec<i64>,
    pub claude_command: Option<String>,
    pub whisper_model: Option<String>,
    pub cron_default_tz: Option<String>,
    pub locale: Option<String>,
    /// Whether group/supergroup messages require an @mention to be acted on.
    #[serde(default = "bool_true")]
    pub require_mention: bool,
    /// Whether private DMs are accepted at all.
    #[serde(default = "bool_true")]
    pub dm_allowed: bool,
}

/// Fully resolved per-agent settings (global defaults applied).
#[derive(Debug, Clone)]
pub struct ResolvedAgent {
    pub name: String,
    pub bot_token_env: String,
    pub mode: AgentMode,
    pub allowed_users: Vec<i64>,
    pub claude_command: String,
    pub whisper_model: Option<String>,
    pub cron_default_tz: String,
    pub locale: String,
    pub require_mention: bool,
    pub dm_allowed: bool,
}

impl AgentSettings {
    pub fn resolved(&self, global: &GlobalConfig) -> ResolvedAgent {
        ResolvedAgent {
            name: self.name.clone(),
            bot_token_env: self.bot_token_env.clone(),
            mode: self.mode,
            allowed_users: self.allowed_users.clone(),
            claude_command: self
                .claude_command
                .clone()
                .unwrap_or_else(|| global.claude_command.clone()),
            whisper_model: self.whisper_model.clone().or_else(|| global.whisper_model.clone()),
            cron_default_tz: self
                .cron_default_tz
                .clone()
                .unwrap_or_else(|| global.cron_default_tz.clone()),
            locale: self.locale.clone().unwrap_or_else(|| global.locale.clone()),
            require_mention: self.require_mention,
            dm_allowed: self.dm_allowed,
        }
    }

    /// Read the bot token out of `bot_token_env`'s named environment variable.
    pub fn bot_token(&self) -> crate::error::Result<String> {
        std::env::var(&self.bot_token_env).map_err(|_| {
            crate::error::BridgeError::Config(format!(
                "environment variable {} is not set (agent {})",
                self.bot_token_env, self.name
            ))
        })
    }
}

/// Share/upload HTTP surface configuration (component C).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareConfig {
    #[serde(default = "default_share_port")]
    pub port: u16,
    #[serde(default = "default_share_ttl_secs")]
    pub default_ttl_secs: u64,
    #[serde(default = "default_max_upload_files")]
    pub max_upload_files: usize,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_file_bytes: u64,
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            port: default_share_port(),
            default_ttl_secs: default_share_ttl_secs(),
            max_upload_files: default_max_upload_files(),
            max_upload_file_bytes: default_max_upload_bytes(),
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_claude_command() -> String {
    "claude".to_string()
}
fn default_tz() -> String {
    "UTC".to_string()
}
fn default_locale() -> String {
    "en".to_string()
}
fn default_agent_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.bridge/agents", home)
}
fn default_workspace_root() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.bridge/workspaces", home)
}
fn default_status_poll_secs() -> u64 {
    DEFAULT_STATUS_POLL_SECS
}
fn default_monitor_poll_secs() -> u64 {
    DEFAULT_MONITOR_POLL_SECS
}
fn default_freeze_timeout_secs() -> u64 {
    DEFAULT_FREEZE_TIMEOUT_SECS
}
fn default_cron_tick_secs() -> u64 {
    DEFAULT_CRON_TICK_SECS
}
fn default_share_port() -> u16 {
    DEFAULT_SHARE_PORT
}
fn default_share_ttl_secs() -> u64 {
    DEFAULT_SHARE_TTL_SECS
}
fn default_max_upload_files() -> usize {
    20
}
fn default_max_upload_bytes() -> u64 {
    50 * 1024 * 1024
}

impl BridgeConfig {
    /// Load config from a TOML file with `BRIDGE_*` env var overrides.
    ///
    /// Checks in order: explicit path argument, then `~/.bridge/settings.toml`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: BridgeConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("BRIDGE_").split("_"))
            .extract()
            .map_err(|e| crate::error::BridgeError::Config(e.to_string()))?;

        if config.agents.is_empty() {
            return Err(crate::error::BridgeError::Config(
                "settings file has no [[agents]] blocks".into(),
            ));
        }
        for agent in &config.agents {
            if agent.allowed_users.is_empty() {
                return Err(crate::error::BridgeError::Config(format!(
                    "agent '{}' has an empty allowed_users allow-list",
                    agent.name
                )));
            }
        }

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.bridge/settings.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolved_agent_falls_back_to_global() {
        let global = GlobalConfig::default();
        let agent = AgentSettings {
            name: "main".into(),
            bot_token_env: "MAIN_BOT_TOKEN".into(),
            mode: AgentMode::Topic,
            allowed_users: vec![1],
            claude_command: None,
            whisper_model: None,
            cron_default_tz: None,
            locale: None,
            require_mention: true,
            dm_allowed: true,
        };
        let resolved = agent.resolved(&global);
        assert_eq!(resolved.claude_command, global.claude_command);
        assert_eq!(resolved.locale, global.locale);
    }

    #[test]
    fn resolved_agent_override_wins() {
        let global = GlobalConfig::default();
        let agent = AgentSettings {
            name: "main".into(),
            bot_token_env: "MAIN_BOT_TOKEN".into(),
            mode: AgentMode::Chat,
            allowed_users: vec![1],
            claude_command: Some("claude-beta".into()),
            whisper_model: None,
            cron_default_tz: None,
            locale: Some("fr".into()),
            require_mention: false,
            dm_allowed: true,
        };
        let resolved = agent.resolved(&global);
        assert_eq!(resolved.claude_command, "claude-beta");
        assert_eq!(resolved.locale, "fr");
    }
}
