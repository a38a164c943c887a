//! `Multiplexer` — the seam between a window and the terminal multiplexer
//! process backing it.
//!
//! [`TmuxMultiplexer`] drives a real `tmux` binary via `tokio::process::Command`,
//! the way `bridge-terminal`'s PTY code drives a shell directly (see
//! `session.rs`) but one level up: each window is a named tmux session, and
//! every operation shells out rather than owning a PTY master fd itself.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{Result, TerminalError};

const DEFAULT_CAPTURE_LINES: &str = "-2000";

#[async_trait]
pub trait Multiplexer: Send + Sync {
    /// True if a session named `window_id` is currently running.
    async fn has_session(&self, window_id: &str) -> Result<bool>;

    /// Start a detached session named `window_id`, running `command` with
    /// `cwd` as its starting directory.
    async fn new_session(&self, window_id: &str, cwd: &str, command: &str) -> Result<()>;

    /// Send literal keystrokes to the session, optionally followed by Enter.
    async fn send_keys(&self, window_id: &str, text: &str, press_enter: bool) -> Result<()>;

    /// Capture the pane's current visible + scrollback text, plain (no
    /// ANSI escapes — tmux's `-p` capture mode already strips colour).
    async fn capture_pane(&self, window_id: &str) -> Result<String>;

    /// Terminate the session outright.
    async fn kill_session(&self, window_id: &str) -> Result<()>;

    /// List every live session name the multiplexer currently tracks.
    async fn list_sessions(&self) -> Result<Vec<String>>;

    /// Resize the session's window.
    async fn resize(&self, window_id: &str, cols: u16, rows: u16) -> Result<()>;
}

/// Drives an external `tmux` binary. One tmux session == one [`WindowId`].
pub struct TmuxMultiplexer {
    tmux_bin: String,
}

impl TmuxMultiplexer {
    pub fn new() -> Self {
        Self::with_binary("tmux")
    }

    pub fn with_binary(tmux_bin: impl Into<String>) -> Self {
        Self { tmux_bin: tmux_bin.into() }
    }

    fn command(&self) -> Command {
        Command::new(&self.tmux_bin)
    }

    async fn run(&self, args: &[&str]) -> Result<std::process::Output> {
        debug!(args = ?args, "tmux");
        self.command()
            .args(args)
            .output()
            .await
            .map_err(|e| TerminalError::PtySpawn(format!("tmux {args:?} failed to spawn: {e}")))
    }
}

impl Default for TmuxMultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Multiplexer for TmuxMultiplexer {
    async fn has_session(&self, window_id: &str) -> Result<bool> {
        let output = self.run(&["has-session", "-t", window_id]).await?;
        Ok(output.status.success())
    }

    async fn new_session(&self, window_id: &str, cwd: &str, command: &str) -> Result<()> {
        let output = self
            .run(&["new-session", "-d", "-s", window_id, "-c", cwd, command])
            .await?;
        if !output.status.success() {
            return Err(TerminalError::PtySpawn(format!(
                "tmux new-session failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(())
    }

    async fn send_keys(&self, window_id: &str, text: &str, press_enter: bool) -> Result<()> {
        let output = self.run(&["send-keys", "-t", window_id, "-l", text]).await?;
        if !output.status.success() {
            return Err(TerminalError::IoError(std::io::Error::other(format!(
                "tmux send-keys failed: {}",
                String::from_utf8_lossy(&output.stderr)
            ))));
        }
        if press_enter {
            let output = self.run(&["send-keys", "-t", window_id, "Enter"]).await?;
            if !output.status.success() {
                warn!(window_id, "tmux send-keys Enter failed");
            }
        }
        Ok(())
    }

    async fn capture_pane(&self, window_id: &str) -> Result<String> {
        let output = self
            .run(&["capture-pane", "-t", window_id, "-p", "-S", DEFAULT_CAPTURE_LINES])
            .await?;
        if !output.status.success() {
            return Err(TerminalError::SessionNotFound(window_id.to_string()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn kill_session(&self, window_id: &str) -> Result<()> {
        let output = self.run(&["kill-session", "-t", window_id]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("session not found") || stderr.contains("can't find session") {
                return Ok(());
            }
            return Err(TerminalError::IoError(std::io::Error::other(stderr.into_owned())));
        }
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<String>> {
        let output = self.run(&["list-sessions", "-F", "#{session_name}"]).await?;
        if !output.status.success() {
            // No server running at all == no sessions, not an error.
            return Ok(Vec::new());
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect())
    }

    async fn resize(&self, window_id: &str, cols: u16, rows: u16) -> Result<()> {
        let output = self
            .run(&["resize-window", "-t", window_id, "-x", &cols.to_string(), "-y", &rows.to_string()])
            .await?;
        if !output.status.success() {
            return Err(TerminalError::IoError(std::io::Error::other(format!(
                "tmux resize-window failed: {}",
                String::from_utf8_lossy(&output.stderr)
            ))));
        }
        Ok(())
    }
}
