//! Decoupling traits so the scheduler never depends on `bridge-sessions` or
//! `bridge-channels` concrete types, matching the pattern already used by
//! `bridge-terminal::StatusSink` and `bridge-channels::ChatProbe`.

use async_trait::async_trait;

use crate::types::WorkspaceMeta;

/// Resolves and drives the tmux window a workspace's jobs fire into.
#[async_trait]
pub trait JobSink: Send + Sync {
    /// Find the currently live window for this workspace, if one exists.
    async fn resolve_window(&self, meta: &WorkspaceMeta) -> Option<String>;

    /// Recreate a window for a workspace whose original window is gone
    /// (spec.md §4.J.1: missed/stuck jobs must still be able to fire).
    async fn recreate_window(&self, meta: &WorkspaceMeta) -> Result<String, String>;

    /// Inject `text` into the given window as if typed by the user.
    async fn send_keys(&self, window_id: &str, text: &str) -> Result<(), String>;
}

/// Delivers out-of-band notifications (system-task `[NOTIFY]` output,
/// repeated-failure admin alerts) to a chat destination.
#[async_trait]
pub trait NotifySink: Send + Sync {
    async fn notify(&self, user_id: i64, chat_id: i64, thread_id: Option<i64>, text: &str);
}
