use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a user (UUIDv7 — time-sortable for easier log correlation).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn new() -> Self {
        // UUIDv7 includes timestamp — sortable and traceable in logs
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifies which agent instance handles a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(name: &str) -> Self {
        Self(name.to_string())
    }

    /// The default single-agent setup uses "main".
    pub fn main() -> Self {
        Self("main".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// User-centric session key.
///
/// Breaking change from OpenClaw: sessions belong to users, not channels.
/// Format: `user:{user_id}:agent:{agent_id}:{session_name}`
///
/// Alice on Telegram + Alice on Discord = same session `user:u2:agent:main:main`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey(pub String);

impl SessionKey {
    pub fn for_user(user_id: &UserId, agent_id: &AgentId, session: &str) -> Self {
        Self(format!("user:{}:agent:{}:{}", user_id, agent_id, session))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-connection identifier (random UUID, not persisted).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnId(pub String);

impl ConnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// User role hierarchy: admin > user > child.
///
/// Controls which permissions are available without a DB lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    #[default]
    User,
    Child,
}

impl UserRole {
    pub fn is_admin(&self) -> bool {
        matches!(self, UserRole::Admin)
    }

    pub fn is_child(&self) -> bool {
        matches!(self, UserRole::Child)
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserRole::Admin => write!(f, "admin"),
            UserRole::User => write!(f, "user"),
            UserRole::Child => write!(f, "child"),
        }
    }
}

impl std::str::FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "admin" => Ok(UserRole::Admin),
            "user" => Ok(UserRole::User),
            "child" => Ok(UserRole::Child),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// Which front-end mode an agent runs in.
///
/// Topic mode binds one window per (user, forum-thread) pair and lets
/// several users share a thread's window (see `RoutingKey::session_key`).
/// Chat mode binds one window per chat, private or group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    Topic,
    Chat,
}

/// Opaque window identifier, as returned by the multiplexer (tmux pane id
/// or window name — whichever the `Multiplexer` implementation uses as its
/// stable handle).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowId(pub String);

impl WindowId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for WindowId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for WindowId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Value object identifying one conversation destination.
///
/// Two shapes per the agent's mode: topic mode sets `thread_id` and uses it
/// as the logical `session_key`; chat mode leaves `thread_id` unset and uses
/// `chat_id` as the session key. Two inbound events with the same
/// `session_key` (for the same agent) must route to the same window — that
/// invariant is what makes this hashable and safe as a map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoutingKey {
    pub agent: String,
    pub user_id: String,
    pub chat_id: i64,
    pub thread_id: Option<i64>,
}

impl RoutingKey {
    /// The logical key two different inbound events are compared on to
    /// decide whether they share a window: the thread in topic mode, the
    /// chat in chat mode.
    pub fn session_key(&self) -> String {
        match self.thread_id {
            Some(t) => format!("{}:{}", self.chat_id, t),
            None => self.chat_id.to_string(),
        }
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.agent, self.session_key())
    }
}

/// The addressable target of outbound messages: `(user, thread)` in topic
/// mode, `chat` in chat mode. Distinct from `RoutingKey` because several
/// users can share one destination's window without sharing delivery state
/// (each user still gets their own status line bookkeeping).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    pub agent: String,
    pub user_id: String,
    pub chat_id: i64,
    pub thread_id: Option<i64>,
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.thread_id {
            Some(t) => write!(f, "{}:{}:{}:{}", self.agent, self.user_id, self.chat_id, t),
            None => write!(f, "{}:{}:{}", self.agent, self.user_id, self.chat_id),
        }
    }
}

impl From<&RoutingKey> for Destination {
    fn from(key: &RoutingKey) -> Self {
        Self { agent: key.agent.clone(), user_id: key.user_id.clone(), chat_id: key.chat_id, thread_id: key.thread_id }
    }
}

impl From<RoutingKey> for Destination {
    fn from(key: RoutingKey) -> Self {
        Self::from(&key)
    }
}

/// Per-window state tracked by the Window/Session Manager.
///
/// `session_id` rotates on `/clear`; `last_read_offset` is the transcript
/// monitor's persisted byte cursor. `pending_tool_uses` mirrors the
/// transcript parser's carried state so a restart doesn't re-emit paired
/// tool calls as unpaired.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowState {
    pub window_id: WindowId,
    pub display_name: String,
    pub cwd: Option<String>,
    pub session_id: Option<String>,
    pub last_read_offset: u64,
}

impl WindowState {
    pub fn new(window_id: WindowId, display_name: impl Into<String>) -> Self {
        Self {
            window_id,
            display_name: display_name.into(),
            cwd: None,
            session_id: None,
            last_read_offset: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_key_session_key_topic_mode() {
        let k = RoutingKey {
            agent: "main".into(),
            user_id: "u1".into(),
            chat_id: -100123,
            thread_id: Some(7),
        };
        assert_eq!(k.session_key(), "-100123:7");
    }

    #[test]
    fn routing_key_session_key_chat_mode() {
        let k = RoutingKey {
            agent: "main".into(),
            user_id: "u1".into(),
            chat_id: 555,
            thread_id: None,
        };
        assert_eq!(k.session_key(), "555");
    }

    #[test]
    fn same_session_key_same_thread_different_user() {
        let a = RoutingKey { agent: "main".into(), user_id: "u1".into(), chat_id: -1, thread_id: Some(3) };
        let b = RoutingKey { agent: "main".into(), user_id: "u2".into(), chat_id: -1, thread_id: Some(3) };
        assert_eq!(a.session_key(), b.session_key());
    }
}
