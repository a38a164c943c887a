//! Shared context interface for all channel adapters.
//!
//! `MessageContext` is the single trait that every channel host (gateway, discord,
//! future telegram, etc.) must implement. It replaces the old `DiscordAppContext`
//! and lets the pipeline crate stay channel-agnostic.

use bridge_memory::manager::MemoryManager;
use bridge_scheduler::SchedulerHandle;
use bridge_terminal::manager::TerminalManager;

use crate::runtime::AgentRuntime;

/// Minimal context interface required by the shared message pipeline.
///
/// Implemented by `AppState` in `bridge-gateway` and any future channel host.
/// Defined here (in `bridge-agent`) to avoid circular dependency: all channel
/// crates depend on `bridge-agent`; `bridge-agent` depends only on `bridge-core`,
/// `bridge-memory`, `bridge-scheduler`, and `bridge-terminal`.
pub trait MessageContext: Send + Sync {
    fn agent(&self) -> &AgentRuntime;
    fn memory(&self) -> &MemoryManager;
    fn terminal(&self) -> &tokio::sync::Mutex<TerminalManager>;
    fn scheduler(&self) -> &SchedulerHandle;
}
