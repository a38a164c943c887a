//! Tunnel state file (spec.md §4.D), grounded on `bridge_core::atomic`'s
//! write-to-temp-then-rename idiom and `tunnel.py`'s `_save_state`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TunnelState {
    pub pid: Option<u32>,
    pub url: Option<String>,
    pub port: Option<u16>,
    pub started_at: Option<DateTime<Utc>>,
}

/// Default location, mirroring `~/.baobaobot/.tunnel_state.json`.
pub fn default_state_path() -> PathBuf {
    dirs_home().join(".bridgebot").join("tunnel_state.json")
}

fn dirs_home() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn load(path: &Path) -> Result<TunnelState> {
    Ok(bridge_core::atomic::read_json_or_default(path)?)
}

pub fn save(path: &Path, state: &TunnelState) -> Result<()> {
    Ok(bridge_core::atomic::write_json(path, state)?)
}

pub fn remove(path: &Path) {
    let _ = std::fs::remove_file(path);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tunnel_state.json");

        let state = TunnelState {
            pid: Some(1234),
            url: Some("https://foo.trycloudflare.com".to_string()),
            port: Some(8787),
            started_at: Some(Utc::now()),
        };
        save(&path, &state).unwrap();
        assert_eq!(load(&path).unwrap(), state);
    }

    #[test]
    fn missing_file_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        assert_eq!(load(&path).unwrap(), TunnelState::default());
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.json");
        remove(&path);
        remove(&path);
    }
}
