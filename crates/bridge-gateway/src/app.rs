//! Wires every spec-grounded component into one process: per-agent
//! window/session managers and routers, the share/upload HTTP surface, the
//! tunnel supervisor, and the workspace-scoped memory store. Channel
//! adapters (Telegram) own their own client and register destinations
//! through a `Router`; this state is what they and the scheduler share.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{routing::get, Router as AxumRouter};
use dashmap::DashMap;
use teloxide::Bot;
use tokio::sync::Mutex;
use tracing::{info, warn};

use bridge_channels::{ChatRouter, Router as ChannelRouter, TopicRouter};
use bridge_core::config::{BridgeConfig, ResolvedAgent};
use bridge_core::types::{AgentMode, RoutingKey, WindowId};
use bridge_delivery::LinkResolver;
use bridge_memory::MemoryManager;
use bridge_scheduler::{JobSink, NotifySink, WorkspaceMeta};
use bridge_sessions::WindowManager;
use bridge_share::{ShareState, UploadSink};
use bridge_telegram::{TelegramChatProbe, WindowOpener};
use bridge_terminal::{Multiplexer, TmuxMultiplexer};
use bridge_tunnel::{TunnelManager, UrlChangeSink};

/// One configured agent's live routing state.
pub struct AgentRuntime {
    pub settings: ResolvedAgent,
    pub router: Arc<dyn ChannelRouter>,
    pub windows: Arc<WindowManager>,
    pub workspace_root: PathBuf,
}

/// Everything the gateway binary owns for the lifetime of the process.
pub struct AppState {
    pub config: BridgeConfig,
    pub agents: HashMap<String, AgentRuntime>,
    /// One Telegram bot client per agent, keyed by agent name. Built once
    /// at startup and shared between the channel adapter, the delivery
    /// sink, and each agent's forum-topic liveness probe.
    pub bots: HashMap<String, Bot>,
    pub multiplexer: Arc<dyn Multiplexer>,
    pub memories: DashMap<String, Arc<Mutex<MemoryManager>>>,
    pub share: Arc<ShareState>,
    pub tunnel: Arc<TunnelManager>,
}

impl AppState {
    pub fn build(config: BridgeConfig) -> anyhow::Result<Arc<Self>> {
        let workspace_root = PathBuf::from(&config.global.workspace_root);
        let agent_dir_root = PathBuf::from(&config.global.agent_dir);
        std::fs::create_dir_all(&workspace_root)?;
        std::fs::create_dir_all(&agent_dir_root)?;

        let mut agents = HashMap::new();
        let mut bots = HashMap::new();
        let mut share_roots = Vec::new();
        for agent_settings in &config.agents {
            let resolved = agent_settings.resolved(&config.global);
            let agent_dir = agent_dir_root.join(&resolved.name);
            std::fs::create_dir_all(&agent_dir)?;

            let bot = Bot::new(resolved.bot_token()?);

            let windows = Arc::new(WindowManager::new(
                agent_dir.join("state.json"),
                agent_dir.join("session_map.json"),
            ));

            let router: Arc<dyn ChannelRouter> = match resolved.mode {
                AgentMode::Topic => Arc::new(TopicRouter::new(
                    resolved.name.clone(),
                    windows.clone(),
                    agent_dir.join("topic_names.json"),
                    Arc::new(TelegramChatProbe::new(bot.clone())),
                )),
                AgentMode::Chat => Arc::new(ChatRouter::new(
                    resolved.name.clone(),
                    windows.clone(),
                    agent_dir.join("chat_titles.json"),
                )),
            };

            let agent_workspace_root = workspace_root.join(&resolved.name);
            std::fs::create_dir_all(&agent_workspace_root)?;
            share_roots.push(agent_workspace_root.clone());

            bots.insert(resolved.name.clone(), bot);
            agents.insert(
                resolved.name.clone(),
                AgentRuntime { settings: resolved, router, windows, workspace_root: agent_workspace_root },
            );
        }

        let (secret, generated) = bridge_share::load_secret();
        if generated {
            warn!("SHARE_SECRET not set; generated a random secret for this run only");
        }
        let share = ShareState::new(secret, share_roots, Some(Arc::new(LoggingUploadSink)));

        let tunnel_state_path = agent_dir_root.join(".tunnel_state.json");
        let tunnel = TunnelManager::new(config.share.port, Some(tunnel_state_path), Arc::new(EnvMirrorUrlSink));

        Ok(Arc::new(Self {
            config,
            agents,
            bots,
            multiplexer: Arc::new(TmuxMultiplexer::new()),
            memories: DashMap::new(),
            share,
            tunnel,
        }))
    }

    /// Fetch or open the `MemoryManager` for a workspace directory, caching
    /// it across calls the same way `memories` caches per destination in the
    /// delivery pipeline.
    pub fn memory_for(&self, workspace_dir: &Path) -> anyhow::Result<Arc<Mutex<MemoryManager>>> {
        let key = workspace_dir.to_string_lossy().to_string();
        if let Some(existing) = self.memories.get(&key) {
            return Ok(existing.clone());
        }
        let manager = Arc::new(Mutex::new(MemoryManager::open(workspace_dir)?));
        self.memories.insert(key, manager.clone());
        Ok(manager)
    }

    /// Build a `JobSink` for one agent's scheduler, bound to its `Router`.
    pub fn job_sink_for(self: &Arc<Self>, agent_name: &str) -> Option<TmuxJobSink> {
        if !self.agents.contains_key(agent_name) {
            return None;
        }
        Some(TmuxJobSink { state: self.clone(), agent_name: agent_name.to_string() })
    }

    pub fn link_resolver(self: &Arc<Self>) -> Arc<dyn LinkResolver> {
        Arc::new(GatewayLinkResolver { share: self.share.clone() })
    }
}

pub fn build_router(state: Arc<AppState>) -> AxumRouter {
    AxumRouter::new()
        .route("/health", get(health))
        .merge(bridge_share::router(state.share.clone()))
}

async fn health() -> &'static str {
    "ok"
}

struct LoggingUploadSink;

#[async_trait]
impl UploadSink for LoggingUploadSink {
    async fn on_upload(&self, upload_dir: &Path, filenames: &[String], description: &str) {
        info!(dir = %upload_dir.display(), files = ?filenames, %description, "received upload");
    }
}

/// Mirrors the tunnel's public URL into `SHARE_PUBLIC_URL` for other
/// in-process readers (spec.md §6 environment variables), matching the
/// original's behavior of publishing it somewhere other components can read.
struct EnvMirrorUrlSink;

#[async_trait]
impl UrlChangeSink for EnvMirrorUrlSink {
    async fn on_url_change(&self, url: &str) {
        info!(%url, "tunnel public URL changed");
        std::env::set_var("SHARE_PUBLIC_URL", url);
    }
}

/// Bridges the Scheduler's `JobSink` seam (spec.md §4.J.1) and the Telegram
/// adapter's `WindowOpener` seam to the same live-tmux-window logic,
/// resolved through one agent's `Router`. Holds the whole `AppState` rather
/// than cloning out its own copies of the multiplexer/router/workspace root
/// so that opening a window can also warm that workspace's `MemoryManager`.
pub struct TmuxJobSink {
    state: Arc<AppState>,
    agent_name: String,
}

impl TmuxJobSink {
    fn agent(&self) -> &AgentRuntime {
        self.state.agents.get(&self.agent_name).expect("job sink built for a known agent")
    }

    fn routing_key(&self, meta: &WorkspaceMeta) -> RoutingKey {
        RoutingKey {
            agent: self.agent_name.clone(),
            user_id: meta.user_id.to_string(),
            chat_id: meta.chat_id,
            thread_id: meta.thread_id,
        }
    }

    async fn create_window(&self, key: &RoutingKey) -> Result<String, String> {
        let agent = self.agent();
        let display_name = agent.router.workspace_name(key);
        let cwd = agent.workspace_root.join(&display_name);
        std::fs::create_dir_all(&cwd).map_err(|e| e.to_string())?;

        if let Ok(memory) = self.state.memory_for(&cwd) {
            memory.lock().await.sync().ok();
        }

        let window_id = uuid::Uuid::new_v4().to_string();
        self.state
            .multiplexer
            .new_session(&window_id, &cwd.to_string_lossy(), &agent.settings.claude_command)
            .await
            .map_err(|e| e.to_string())?;
        agent.router.bind(key, WindowId::from(window_id.clone()), &display_name);
        Ok(window_id)
    }
}

#[async_trait]
impl JobSink for TmuxJobSink {
    async fn resolve_window(&self, meta: &WorkspaceMeta) -> Option<String> {
        let key = self.routing_key(meta);
        self.agent().router.get_window(&key).map(|w| w.as_str().to_string())
    }

    async fn recreate_window(&self, meta: &WorkspaceMeta) -> Result<String, String> {
        let key = self.routing_key(meta);
        self.create_window(&key).await
    }

    async fn send_keys(&self, window_id: &str, text: &str) -> Result<(), String> {
        self.state.multiplexer.send_keys(window_id, text, true).await.map_err(|e| e.to_string())
    }
}

#[async_trait]
impl WindowOpener for TmuxJobSink {
    async fn open_window(&self, key: &RoutingKey) -> Result<String, String> {
        self.create_window(key).await
    }
}

/// Resolves `[SHARE_LINK:...]`/`[UPLOAD_LINK]`/`[SEND_FILE:...]` markers
/// (spec.md §6) into signed `bridge-share` URLs.
pub struct GatewayLinkResolver {
    share: Arc<ShareState>,
}

#[async_trait]
impl LinkResolver for GatewayLinkResolver {
    async fn share_link(&self, _window_id: &str, abs_path: &str, ttl: Duration) -> Option<String> {
        let roots = self.share.workspace_roots().await;
        let (workspace, rel) = bridge_share::paths::resolve_relative(&roots, Path::new(abs_path))?;
        let token = self.share.file_token(&workspace, &rel, ttl).await.ok()?;
        Some(format!("/f/{token}/{rel}"))
    }

    async fn upload_link(&self, _window_id: &str, ttl: Duration) -> Option<String> {
        let roots = self.share.workspace_roots().await;
        let workspace = roots.first()?;
        let token = self.share.upload_token(workspace, ttl).await.ok()?;
        Some(format!("/u/{token}"))
    }

    async fn send_file(&self, _window_id: &str, _abs_path: &str) -> bool {
        // Out-of-band file push belongs to the channel adapter (bridge-telegram);
        // the gateway itself has no chat client to push through.
        false
    }
}
