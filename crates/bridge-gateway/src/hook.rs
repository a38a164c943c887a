//! `hook` subcommand (spec.md §6): the assistant CLI's session-start hook
//! invokes `bridge-gateway hook --window <id> --agent <name>` and pipes a
//! JSON payload on stdin. We record it in that agent's `session_map.json` so
//! `WindowManager::wait_for_session_map_entry` can later find the session id,
//! cwd, and transcript path a freshly spawned window belongs to.

use std::io::Read;
use std::path::PathBuf;

use bridge_sessions::{SessionMap, SessionMapEntry};

pub fn run(config_path: Option<PathBuf>, window: &str, agent: &str) -> anyhow::Result<()> {
    let mut raw = String::new();
    std::io::stdin().read_to_string(&mut raw)?;
    let entry: SessionMapEntry = serde_json::from_str(&raw)?;

    let config_path_str = config_path.as_ref().and_then(|p| p.to_str());
    let config = bridge_core::config::BridgeConfig::load(config_path_str)?;
    let agent_dir = PathBuf::from(&config.global.agent_dir).join(agent);
    std::fs::create_dir_all(&agent_dir)?;
    let session_map_path = agent_dir.join("session_map.json");

    let mut map: SessionMap = bridge_core::atomic::read_json_or_default(&session_map_path)?;
    map.insert(window.to_string(), entry);
    bridge_core::atomic::write_json(&session_map_path, &map)?;

    Ok(())
}
