//! Router (spec.md §4.F) — maps an inbound platform update onto a
//! `RoutingKey`, and binds/looks up the terminal window a routing key owns.
//!
//! Two modes exist, matching the two ways a Telegram deployment can be set
//! up: `TopicRouter` treats each forum topic as one workspace and silently
//! shares a window across every user who posts in that topic (delegated to
//! `bridge_sessions::WindowManager`'s promotion logic); `ChatRouter` treats
//! each group chat as one workspace with no cross-user sharing needed, since
//! a chat only ever has one binding.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use bridge_core::types::{RoutingKey, WindowId};
use bridge_sessions::WindowManager;

/// Platform-agnostic shape of an inbound update, enough for a `Router` to
/// decide whether it owns this chat and what routing key it maps to.
#[derive(Debug, Clone)]
pub struct InboundContext {
    pub user_id: String,
    pub chat_id: i64,
    pub chat_kind: ChatKind,
    /// Telegram forum-topic id the message was posted in, if any.
    pub thread_id: Option<i64>,
    /// Whether the chat has forum topics enabled at all.
    pub is_forum: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendKwargs {
    pub message_thread_id: Option<i64>,
}

/// Platform hook for checking whether a destination still exists on the
/// remote side (e.g. the forum topic wasn't deleted out from under us).
/// Kept as a trait so this crate never depends on a concrete bot client.
#[async_trait]
pub trait ChatProbe: Send + Sync {
    async fn topic_exists(&self, chat_id: i64, thread_id: i64) -> bool;
}

/// Platform hook for wiring lifecycle event handlers (forum topic created
/// or closed). The router only declares which event kinds it needs; the
/// concrete handler logic and dispatcher registration live with the bot.
pub trait LifecycleRegistrar {
    fn register_topic_created(&mut self);
    fn register_topic_closed(&mut self);
}

#[async_trait]
pub trait Router: Send + Sync {
    fn agent(&self) -> &str;
    fn extract(&self, ctx: &InboundContext) -> Option<RoutingKey>;
    fn rejection_message(&self) -> &str;
    fn workspace_name(&self, key: &RoutingKey) -> String;
    fn get_window(&self, key: &RoutingKey) -> Option<WindowId>;
    fn bind(&self, key: &RoutingKey, window_id: WindowId, display_name: &str);
    fn unbind(&self, key: &RoutingKey) -> Option<WindowId>;
    fn resolve_chat_id(&self, key: &RoutingKey) -> i64;
    fn send_kwargs(&self, key: &RoutingKey) -> SendKwargs;
    fn iter_bindings(&self) -> Vec<(RoutingKey, WindowId)>;
    fn register_lifecycle_handlers(&self, registrar: &mut dyn LifecycleRegistrar);
    async fn probe_destination_exists(&self, key: &RoutingKey) -> bool;
}

/// Small persisted `id -> display name` map, for `workspace_name()` lookups
/// before any window (and thus `WindowState::display_name`) exists. Filled
/// in by lifecycle handlers (topic-created / chat-title-changed events).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct NameRegistryState {
    #[serde(default)]
    names: HashMap<String, String>,
}

struct NameRegistry {
    path: PathBuf,
    state: Mutex<NameRegistryState>,
}

impl NameRegistry {
    fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = bridge_core::atomic::read_json_or_default(&path).unwrap_or_default();
        Self { path, state: Mutex::new(state) }
    }

    fn get(&self, id: &str) -> Option<String> {
        self.state.lock().unwrap().names.get(id).cloned()
    }

    fn set(&self, id: impl Into<String>, name: impl Into<String>) {
        let mut state = self.state.lock().unwrap();
        state.names.insert(id.into(), name.into());
        let _ = bridge_core::atomic::write_json(&self.path, &*state);
    }
}

/// One forum topic per routing key. A second user posting in a topic
/// someone else already bound gets silently promoted onto that user's
/// window — see `WindowManager::get_window`.
pub struct TopicRouter {
    agent: String,
    windows: Arc<WindowManager>,
    topic_names: NameRegistry,
    probe: Arc<dyn ChatProbe>,
}

impl TopicRouter {
    pub fn new(
        agent: impl Into<String>,
        windows: Arc<WindowManager>,
        topic_names_path: impl Into<PathBuf>,
        probe: Arc<dyn ChatProbe>,
    ) -> Self {
        Self { agent: agent.into(), windows, topic_names: NameRegistry::new(topic_names_path), probe }
    }

    /// Called by the forum-topic-created lifecycle handler once the topic's
    /// name is known, so `workspace_name` can use it before any window binds.
    pub fn record_topic_name(&self, thread_id: i64, name: impl Into<String>) {
        self.topic_names.set(thread_id.to_string(), name);
    }
}

#[async_trait]
impl Router for TopicRouter {
    fn agent(&self) -> &str {
        &self.agent
    }

    fn extract(&self, ctx: &InboundContext) -> Option<RoutingKey> {
        if !ctx.is_forum {
            return None;
        }
        let thread_id = ctx.thread_id?;
        // Telegram's unnamed "General" topic always has id 1 and isn't an
        // addressable workspace.
        if thread_id == 1 {
            return None;
        }
        Some(RoutingKey {
            agent: self.agent.clone(),
            user_id: ctx.user_id.clone(),
            chat_id: ctx.chat_id,
            thread_id: Some(thread_id),
        })
    }

    fn rejection_message(&self) -> &str {
        "Please use a topic (not General) in this forum group."
    }

    fn workspace_name(&self, key: &RoutingKey) -> String {
        match key.thread_id {
            Some(thread_id) => self
                .topic_names
                .get(&thread_id.to_string())
                .unwrap_or_else(|| format!("topic-{thread_id}")),
            None => format!("chat-{}", key.chat_id),
        }
    }

    fn get_window(&self, key: &RoutingKey) -> Option<WindowId> {
        self.windows.get_window(key).ok().flatten()
    }

    fn bind(&self, key: &RoutingKey, window_id: WindowId, display_name: &str) {
        let _ = self.windows.bind(key, window_id, display_name);
    }

    fn unbind(&self, key: &RoutingKey) -> Option<WindowId> {
        self.windows.unbind_key(key).ok().flatten()
    }

    fn resolve_chat_id(&self, key: &RoutingKey) -> i64 {
        key.chat_id
    }

    fn send_kwargs(&self, key: &RoutingKey) -> SendKwargs {
        SendKwargs { message_thread_id: key.thread_id }
    }

    fn iter_bindings(&self) -> Vec<(RoutingKey, WindowId)> {
        self.windows.all_bindings()
    }

    fn register_lifecycle_handlers(&self, registrar: &mut dyn LifecycleRegistrar) {
        registrar.register_topic_created();
        registrar.register_topic_closed();
    }

    async fn probe_destination_exists(&self, key: &RoutingKey) -> bool {
        match key.thread_id {
            Some(thread_id) => self.probe.topic_exists(key.chat_id, thread_id).await,
            None => false,
        }
    }
}

/// One group chat (or DM) per routing key. No sharing is needed since a
/// chat has exactly one binding; forum-enabled supergroups are rejected so
/// `TopicRouter` can own them instead.
pub struct ChatRouter {
    agent: String,
    windows: Arc<WindowManager>,
    chat_titles: NameRegistry,
}

impl ChatRouter {
    pub fn new(agent: impl Into<String>, windows: Arc<WindowManager>, chat_titles_path: impl Into<PathBuf>) -> Self {
        Self { agent: agent.into(), windows, chat_titles: NameRegistry::new(chat_titles_path) }
    }

    /// Called by the chat-title-changed lifecycle handler.
    pub fn record_chat_title(&self, chat_id: i64, title: impl Into<String>) {
        self.chat_titles.set(chat_id.to_string(), title);
    }
}

#[async_trait]
impl Router for ChatRouter {
    fn agent(&self) -> &str {
        &self.agent
    }

    fn extract(&self, ctx: &InboundContext) -> Option<RoutingKey> {
        if !matches!(ctx.chat_kind, ChatKind::Group | ChatKind::Supergroup) || ctx.is_forum {
            return None;
        }
        Some(RoutingKey { agent: self.agent.clone(), user_id: ctx.user_id.clone(), chat_id: ctx.chat_id, thread_id: None })
    }

    fn rejection_message(&self) -> &str {
        "This bot only works in group chats."
    }

    fn workspace_name(&self, key: &RoutingKey) -> String {
        self.chat_titles.get(&key.chat_id.to_string()).unwrap_or_else(|| format!("group-{}", key.chat_id))
    }

    fn get_window(&self, key: &RoutingKey) -> Option<WindowId> {
        self.windows.get_window(key).ok().flatten()
    }

    fn bind(&self, key: &RoutingKey, window_id: WindowId, display_name: &str) {
        let _ = self.windows.bind(key, window_id, display_name);
    }

    fn unbind(&self, key: &RoutingKey) -> Option<WindowId> {
        self.windows.unbind_key(key).ok().flatten()
    }

    fn resolve_chat_id(&self, key: &RoutingKey) -> i64 {
        key.chat_id
    }

    fn send_kwargs(&self, _key: &RoutingKey) -> SendKwargs {
        SendKwargs::default()
    }

    fn iter_bindings(&self) -> Vec<(RoutingKey, WindowId)> {
        self.windows.all_bindings()
    }

    fn register_lifecycle_handlers(&self, _registrar: &mut dyn LifecycleRegistrar) {}

    async fn probe_destination_exists(&self, _key: &RoutingKey) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    struct AlwaysExists;

    #[async_trait]
    impl ChatProbe for AlwaysExists {
        async fn topic_exists(&self, _chat_id: i64, _thread_id: i64) -> bool {
            true
        }
    }

    fn topic_router(dir: &std::path::Path) -> TopicRouter {
        let windows = Arc::new(WindowManager::new(dir.join("state.json"), dir.join("session_map.json")));
        TopicRouter::new("main", windows, dir.join("topic_names.json"), Arc::new(AlwaysExists))
    }

    fn chat_router(dir: &std::path::Path) -> ChatRouter {
        let windows = Arc::new(WindowManager::new(dir.join("state.json"), dir.join("session_map.json")));
        ChatRouter::new("main", windows, dir.join("chat_titles.json"))
    }

    fn ctx(user_id: &str, chat_id: i64, thread_id: Option<i64>, is_forum: bool) -> InboundContext {
        InboundContext { user_id: user_id.into(), chat_id, chat_kind: ChatKind::Supergroup, thread_id, is_forum }
    }

    #[test]
    fn topic_router_rejects_general_topic() {
        let dir = tempdir().unwrap();
        let router = topic_router(dir.path());
        assert!(router.extract(&ctx("u1", 1, Some(1), true)).is_none());
        assert!(router.extract(&ctx("u1", 1, None, true)).is_none());
    }

    #[test]
    fn topic_router_extracts_named_topic() {
        let dir = tempdir().unwrap();
        let router = topic_router(dir.path());
        let key = router.extract(&ctx("u1", 1, Some(42), true)).unwrap();
        assert_eq!(key.thread_id, Some(42));
        assert_eq!(key.chat_id, 1);
    }

    #[test]
    fn topic_router_workspace_name_falls_back_then_uses_registry() {
        let dir = tempdir().unwrap();
        let router = topic_router(dir.path());
        let key = router.extract(&ctx("u1", 1, Some(42), true)).unwrap();
        assert_eq!(router.workspace_name(&key), "topic-42");
        router.record_topic_name(42, "design-review");
        assert_eq!(router.workspace_name(&key), "design-review");
    }

    #[test]
    fn topic_router_shares_window_across_users_in_same_topic() {
        let dir = tempdir().unwrap();
        let router = topic_router(dir.path());
        let alice = router.extract(&ctx("alice", 1, Some(7), true)).unwrap();
        let bob = router.extract(&ctx("bob", 1, Some(7), true)).unwrap();

        let window = WindowId::from("w1");
        router.bind(&alice, window.clone(), "design-review");
        assert_eq!(router.get_window(&bob), Some(window));
    }

    #[test]
    fn topic_router_unbind_does_not_disturb_other_users_binding() {
        let dir = tempdir().unwrap();
        let router = topic_router(dir.path());
        let alice = router.extract(&ctx("alice", 1, Some(7), true)).unwrap();
        let bob = router.extract(&ctx("bob", 1, Some(7), true)).unwrap();
        let window = WindowId::from("w1");
        router.bind(&alice, window.clone(), "design-review");
        router.get_window(&bob);

        let removed = router.unbind(&bob);
        assert_eq!(removed, Some(window.clone()));
        assert_eq!(router.get_window(&alice), Some(window));
    }

    #[test]
    fn chat_router_rejects_forum_supergroups() {
        let dir = tempdir().unwrap();
        let router = chat_router(dir.path());
        assert!(router.extract(&ctx("u1", 1, None, true)).is_none());
        assert!(router.extract(&InboundContext { chat_kind: ChatKind::Private, ..ctx("u1", 1, None, false) }).is_none());
    }

    #[test]
    fn chat_router_extracts_group_chat() {
        let dir = tempdir().unwrap();
        let router = chat_router(dir.path());
        let key = router.extract(&ctx("u1", 55, None, false)).unwrap();
        assert_eq!(key.chat_id, 55);
        assert_eq!(key.thread_id, None);
        assert_eq!(router.send_kwargs(&key), SendKwargs::default());
    }

    #[test]
    fn chat_router_workspace_name_falls_back_then_uses_registry() {
        let dir = tempdir().unwrap();
        let router = chat_router(dir.path());
        let key = router.extract(&ctx("u1", 55, None, false)).unwrap();
        assert_eq!(router.workspace_name(&key), "group-55");
        router.record_chat_title(55, "Engineering");
        assert_eq!(router.workspace_name(&key), "Engineering");
    }
}
