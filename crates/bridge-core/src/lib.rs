pub mod config;
pub mod error;
pub mod types;

pub use error::{BridgeError, Result};
pub use types::{
    AgentId, AgentMode, ConnId, Destination, RoutingKey, SessionKey, UserId, UserRole, WindowId,
    WindowState,
};

/// Read a JSON file and atomically write it back via write-to-temp + rename.
///
/// The workspace-wide pattern for every persisted state file named in the
/// external interfaces (`state.json`, `session_map.json`, `monitor_state.json`,
/// `.tunnel_state.json`): never leaves a half-written file behind if the
/// process is killed mid-write.
pub mod atomic {
    use std::io::Write;
    use std::path::Path;

    /// Serialize `value` as pretty JSON and replace `path` atomically.
    pub fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::Builder::new()
            .prefix(".tmp-")
            .tempfile_in(dir)?;
        let json = serde_json::to_vec_pretty(value)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        tmp.write_all(&json)?;
        tmp.flush()?;
        tmp.persist(path)
            .map_err(|e| e.error)?;
        Ok(())
    }

    /// Replace `path` atomically with `content` (for plain-text outputs like
    /// an assembled `CLAUDE.md`, not just JSON state files).
    pub fn write_text(path: &Path, content: &str) -> std::io::Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::Builder::new()
            .prefix(".tmp-")
            .tempfile_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.flush()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Load JSON from `path`, returning `default` if the file does not exist.
    pub fn read_json_or_default<T>(path: &Path) -> std::io::Result<T>
    where
        T: serde::de::DeserializeOwned + Default,
    {
        match std::fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
            Err(e) => Err(e),
        }
    }
}
