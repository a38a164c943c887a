//! Window/Session Manager (spec.md §4.E) — durable `(routing key) → window`
//! bindings plus per-window state, persisted as JSON under the agent
//! directory with write-to-temp + rename, per spec.md §6.
//!
//! This is a distinct concept from `Session`/`SessionManager` elsewhere in
//! this crate (per-user LLM conversation stats): a *window* is one pane of
//! a terminal multiplexer running one assistant CLI instance, bound to one
//! or more routing keys.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};

use bridge_core::{Destination, RoutingKey, WindowId, WindowState};

#[derive(Debug, Error)]
pub enum WindowError {
    #[error("io error persisting window state: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WindowError>;

/// One entry of `session_map.json`, written by the assistant CLI's external
/// session-start hook (see `bridge-hooks`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMapEntry {
    pub session_id: String,
    pub cwd: String,
    pub file_path: String,
}

pub type SessionMap = HashMap<String, SessionMapEntry>;

/// One binding row: the routing key that created it plus the window it
/// points at. Kept alongside the key (not just `binding_key`'s string form)
/// so callers like `Router::iter_bindings` can reconstruct the original key.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BindingEntry {
    routing_key: RoutingKey,
    window_id: WindowId,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PersistedState {
    /// `binding_key(routing) -> entry`.
    #[serde(default)]
    bindings: HashMap<String, BindingEntry>,
    /// `thread_id -> window_id`, the shared-window promotion index.
    #[serde(default)]
    thread_windows: HashMap<String, WindowId>,
    /// `window_id.0 -> WindowState`.
    #[serde(default)]
    windows: HashMap<String, WindowState>,
    /// `destination_key(dest, window_id) -> last_read_offset`.
    #[serde(default)]
    offsets: HashMap<String, u64>,
}

fn binding_key(routing: &RoutingKey) -> String {
    match routing.thread_id {
        Some(thread_id) => format!("user:{}:thread:{}", routing.user_id, thread_id),
        None => format!("chat:{}", routing.chat_id),
    }
}

fn destination_key(dest: &Destination, window_id: &WindowId) -> String {
    let dest_part = match dest.thread_id {
        Some(thread_id) => format!("user:{}:thread:{}", dest.user_id, thread_id),
        None => format!("chat:{}", dest.chat_id),
    };
    format!("{dest_part}:{}", window_id.as_str())
}

/// Durable `(routing key) -> window` bindings plus per-window state.
pub struct WindowManager {
    state_path: PathBuf,
    session_map_path: PathBuf,
    state: Mutex<PersistedState>,
}

impl WindowManager {
    pub fn new(state_path: impl Into<PathBuf>, session_map_path: impl Into<PathBuf>) -> Self {
        let state_path = state_path.into();
        let state = bridge_core::atomic::read_json_or_default(&state_path).unwrap_or_default();
        Self {
            state_path,
            session_map_path: session_map_path.into(),
            state: Mutex::new(state),
        }
    }

    fn persist(&self) -> Result<()> {
        let state = self.state.lock().unwrap();
        bridge_core::atomic::write_json(&self.state_path, &*state)?;
        Ok(())
    }

    /// Idempotent: rebinding the same key to the same window is a no-op
    /// write (still persisted, but produces no observable state change).
    #[instrument(skip(self, display_name))]
    pub fn bind(&self, routing: &RoutingKey, window_id: WindowId, display_name: impl Into<String>) -> Result<()> {
        let key = binding_key(routing);
        {
            let mut state = self.state.lock().unwrap();
            state
                .bindings
                .insert(key, BindingEntry { routing_key: routing.clone(), window_id: window_id.clone() });
            if let Some(thread_id) = routing.thread_id {
                state
                    .thread_windows
                    .entry(thread_id.to_string())
                    .or_insert_with(|| window_id.clone());
            }
            state
                .windows
                .entry(window_id.as_str().to_string())
                .or_insert_with(|| WindowState::new(window_id.clone(), display_name.into()));
        }
        self.persist()
    }

    /// Look up the window bound to `routing`. In thread mode, if no binding
    /// exists for this specific user but another user has one for the same
    /// thread, promote this user onto it (persisting the new binding).
    #[instrument(skip(self))]
    pub fn get_window(&self, routing: &RoutingKey) -> Result<Option<WindowId>> {
        let key = binding_key(routing);
        let promoted = {
            let mut state = self.state.lock().unwrap();
            if let Some(entry) = state.bindings.get(&key) {
                return Ok(Some(entry.window_id.clone()));
            }
            match routing.thread_id.and_then(|t| state.thread_windows.get(&t.to_string()).cloned()) {
                Some(shared) => {
                    state
                        .bindings
                        .insert(key, BindingEntry { routing_key: routing.clone(), window_id: shared.clone() });
                    Some(shared)
                }
                None => None,
            }
        };
        if promoted.is_some() {
            debug!("promoted user onto shared thread window");
            self.persist()?;
        }
        Ok(promoted)
    }

    /// Remove every binding pointing at `window_id` and drop its state.
    #[instrument(skip(self))]
    pub fn unbind_window(&self, window_id: &WindowId) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            state.bindings.retain(|_, v| &v.window_id != window_id);
            state.thread_windows.retain(|_, v| v != window_id);
            state.windows.remove(window_id.as_str());
            state.offsets.retain(|k, _| !k.ends_with(&format!(":{}", window_id.as_str())));
        }
        self.persist()
    }

    /// Remove a single `routing`'s binding, leaving the window and any other
    /// user's binding to it intact. Returns the window it was pointing at.
    #[instrument(skip(self))]
    pub fn unbind_key(&self, routing: &RoutingKey) -> Result<Option<WindowId>> {
        let key = binding_key(routing);
        let removed = {
            let mut state = self.state.lock().unwrap();
            state.bindings.remove(&key).map(|entry| entry.window_id)
        };
        if removed.is_some() {
            self.persist()?;
        }
        Ok(removed)
    }

    /// Reconcile persisted bindings against the live set the multiplexer
    /// reports at startup; returns the window ids that were dropped.
    #[instrument(skip(self, live_windows))]
    pub fn resolve_stale(&self, live_windows: &[WindowId]) -> Result<Vec<WindowId>> {
        let live: std::collections::HashSet<&str> = live_windows.iter().map(|w| w.as_str()).collect();
        let stale: Vec<WindowId> = {
            let state = self.state.lock().unwrap();
            state
                .windows
                .keys()
                .filter(|id| !live.contains(id.as_str()))
                .map(|id| WindowId(id.clone()))
                .collect()
        };
        for window_id in &stale {
            self.unbind_window(window_id)?;
        }
        if !stale.is_empty() {
            info!(count = stale.len(), "dropped stale window bindings at startup");
        }
        Ok(stale)
    }

    /// Poll `session_map.json` until the external hook has populated
    /// `{session_id, cwd, file_path}` for `window_id`, up to `timeout`.
    /// Returns whether the entry appeared in time.
    #[instrument(skip(self))]
    pub async fn wait_for_session_map_entry(&self, window_id: &WindowId, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            let map: SessionMap = bridge_core::atomic::read_json_or_default(&self.session_map_path)?;
            if let Some(entry) = map.get(window_id.as_str()) {
                let mut state = self.state.lock().unwrap();
                if let Some(window) = state.windows.get_mut(window_id.as_str()) {
                    window.session_id = Some(entry.session_id.clone());
                    window.cwd = Some(entry.cwd.clone());
                }
                drop(state);
                self.persist()?;
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    /// Persisted per-destination read cursor used by the delivery pipeline.
    #[instrument(skip(self))]
    pub fn update_user_window_offset(&self, dest: &Destination, window_id: &WindowId, byte_offset: u64) -> Result<()> {
        let key = destination_key(dest, window_id);
        {
            let mut state = self.state.lock().unwrap();
            state.offsets.insert(key, byte_offset);
        }
        self.persist()
    }

    pub fn user_window_offset(&self, dest: &Destination, window_id: &WindowId) -> u64 {
        let key = destination_key(dest, window_id);
        let state = self.state.lock().unwrap();
        *state.offsets.get(&key).unwrap_or(&0)
    }

    pub fn window_state(&self, window_id: &WindowId) -> Option<WindowState> {
        self.state.lock().unwrap().windows.get(window_id.as_str()).cloned()
    }

    /// Snapshot of every live `(routing key, window id)` pair, for callers
    /// (e.g. a `Router` implementation) that need to iterate bindings.
    pub fn all_bindings(&self) -> Vec<(RoutingKey, WindowId)> {
        self.state
            .lock()
            .unwrap()
            .bindings
            .values()
            .map(|entry| (entry.routing_key.clone(), entry.window_id.clone()))
            .collect()
    }
}

#[allow(dead_code)]
fn session_map_path_hint(agent_dir: &Path) -> PathBuf {
    agent_dir.join("session_map.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn routing(user_id: &str, chat_id: i64, thread_id: Option<i64>) -> RoutingKey {
        RoutingKey { agent: "main".into(), user_id: user_id.into(), chat_id, thread_id }
    }

    #[test]
    fn bind_then_get_window_round_trips() {
        let dir = tempdir().unwrap();
        let mgr = WindowManager::new(dir.path().join("state.json"), dir.path().join("session_map.json"));
        let window = WindowId::from("w1");
        let key = routing("u1", 100, Some(5));
        mgr.bind(&key, window.clone(), "w1 display").unwrap();
        assert_eq!(mgr.get_window(&key).unwrap(), Some(window));
    }

    #[test]
    fn shared_thread_window_promotes_second_user() {
        let dir = tempdir().unwrap();
        let mgr = WindowManager::new(dir.path().join("state.json"), dir.path().join("session_map.json"));
        let window = WindowId::from("shared-window");
        let alice = routing("alice", 100, Some(7));
        let bob = routing("bob", 100, Some(7));

        mgr.bind(&alice, window.clone(), "topic").unwrap();
        assert_eq!(mgr.get_window(&bob).unwrap(), Some(window.clone()), "bob should be promoted onto alice's window");

        // Promotion persists: bob now has his own binding row too.
        assert_eq!(mgr.all_bindings().len(), 2);
    }

    #[test]
    fn chat_mode_bindings_do_not_cross_promote() {
        let dir = tempdir().unwrap();
        let mgr = WindowManager::new(dir.path().join("state.json"), dir.path().join("session_map.json"));
        let window = WindowId::from("w1");
        let alice_chat = routing("alice", 100, None);
        let bob_chat = routing("bob", 200, None);
        mgr.bind(&alice_chat, window, "chat").unwrap();
        assert_eq!(mgr.get_window(&bob_chat).unwrap(), None);
    }

    #[test]
    fn unbind_window_removes_every_pointer() {
        let dir = tempdir().unwrap();
        let mgr = WindowManager::new(dir.path().join("state.json"), dir.path().join("session_map.json"));
        let window = WindowId::from("w1");
        let alice = routing("alice", 100, Some(1));
        let bob = routing("bob", 100, Some(1));
        mgr.bind(&alice, window.clone(), "topic").unwrap();
        mgr.get_window(&bob).unwrap();

        mgr.unbind_window(&window).unwrap();
        assert_eq!(mgr.get_window(&alice).unwrap(), None);
        assert_eq!(mgr.get_window(&bob).unwrap(), None);
        assert!(mgr.window_state(&window).is_none());
    }

    #[test]
    fn resolve_stale_drops_windows_not_in_live_set() {
        let dir = tempdir().unwrap();
        let mgr = WindowManager::new(dir.path().join("state.json"), dir.path().join("session_map.json"));
        let live = WindowId::from("live");
        let dead = WindowId::from("dead");
        mgr.bind(&routing("u1", 1, None), live.clone(), "live").unwrap();
        mgr.bind(&routing("u2", 2, None), dead.clone(), "dead").unwrap();

        let dropped = mgr.resolve_stale(&[live.clone()]).unwrap();
        assert_eq!(dropped, vec![dead]);
        assert!(mgr.window_state(&live).is_some());
    }

    #[tokio::test]
    async fn wait_for_session_map_entry_times_out_when_absent() {
        let dir = tempdir().unwrap();
        let mgr = WindowManager::new(dir.path().join("state.json"), dir.path().join("session_map.json"));
        let found = mgr
            .wait_for_session_map_entry(&WindowId::from("nope"), Duration::from_millis(50))
            .await
            .unwrap();
        assert!(!found);
    }

    #[tokio::test]
    async fn wait_for_session_map_entry_finds_entry_written_concurrently() {
        let dir = tempdir().unwrap();
        let session_map_path = dir.path().join("session_map.json");
        let mgr = WindowManager::new(dir.path().join("state.json"), &session_map_path);
        let window = WindowId::from("w1");
        mgr.bind(&routing("u1", 1, None), window.clone(), "w1").unwrap();

        let mut map = SessionMap::new();
        map.insert(
            window.as_str().to_string(),
            SessionMapEntry { session_id: "s1".into(), cwd: "/tmp".into(), file_path: "/tmp/t.jsonl".into() },
        );
        bridge_core::atomic::write_json(&session_map_path, &map).unwrap();

        let found = mgr.wait_for_session_map_entry(&window, Duration::from_secs(1)).await.unwrap();
        assert!(found);
        let state = mgr.window_state(&window).unwrap();
        assert_eq!(state.session_id.as_deref(), Some("s1"));
        assert_eq!(state.cwd.as_deref(), Some("/tmp"));
    }

    #[test]
    fn update_and_read_window_offset() {
        let dir = tempdir().unwrap();
        let mgr = WindowManager::new(dir.path().join("state.json"), dir.path().join("session_map.json"));
        let window = WindowId::from("w1");
        let dest = Destination { agent: "main".into(), user_id: "u1".into(), chat_id: 1, thread_id: None };
        assert_eq!(mgr.user_window_offset(&dest, &window), 0);
        mgr.update_user_window_offset(&dest, &window, 512).unwrap();
        assert_eq!(mgr.user_window_offset(&dest, &window), 512);
    }
}
