//! Default subcommand: assemble every component and run until killed.
//!
//! Starts the share/upload HTTP surface, the tunnel supervisor, the Telegram
//! adapters, the Delivery Pipeline backing them, a Status Poller ticking
//! every bound window, a Transcript Monitor per bound window, and the J1/J2
//! scheduler loops (spec.md §4.J: cron storage lives in each workspace's own
//! `memory.db`, not one global scheduler database).

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rusqlite::Connection;
use tracing::{error, info, warn};

use bridge_channels::Router as ChannelRouter;
use bridge_core::types::WindowId;
use bridge_delivery::{ContentKind, ContentTask, DeliveryPipeline};
use bridge_scheduler::{
    CronEngine, CronStore, SchedulerError, SummaryRecipient, SummaryTarget, SystemTaskEngine, WorkspaceMeta,
    DEFAULT_SUMMARY_TEMPLATE,
};
use bridge_telegram::{TelegramAdapter, TelegramSink};
use bridge_terminal::status_poller::StatusPoller;
use bridge_transcript::{ContentType, TranscriptMonitor};

use crate::app::AppState;
use crate::delivery::{destinations_for_window, GatewayPaneStatusSource, GatewayStatusSink, PipelineNotifySink};
use crate::transcript_paths::find_transcript_path;

pub async fn run(state: Arc<AppState>) -> anyhow::Result<()> {
    let router = crate::app::build_router(state.clone());
    let addr = format!("0.0.0.0:{}", state.config.share.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "share server listening");
    let server_state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            error!(error = %e, "share server exited");
        }
        let _ = server_state;
    });

    match state.tunnel.start().await {
        Ok(url) => info!(%url, "tunnel established"),
        Err(e) => warn!(error = %e, "tunnel did not start; share links will only work locally"),
    }

    let pane_source = Arc::new(GatewayPaneStatusSource { multiplexer: state.multiplexer.clone() });
    let sink = Arc::new(TelegramSink::new(state.bots.clone()));
    let pipeline = Arc::new(DeliveryPipeline::new(sink, pane_source).with_link_resolver(state.link_resolver()));

    spawn_status_poller(state.clone(), pipeline.clone());
    spawn_transcript_monitors(state.clone(), pipeline.clone());
    spawn_telegram_adapters(state.clone());

    let active_workspaces: Arc<DashMap<String, ()>> = Arc::new(DashMap::new());
    let tick_interval = Duration::from_secs(state.config.global.cron_tick_secs);

    loop {
        for (_, agent) in state.agents.iter() {
            for (routing_key, window_id) in agent.router.iter_bindings() {
                let workspace_dir = agent.workspace_root.join(agent.router.workspace_name(&routing_key));
                let workspace_key = workspace_dir.to_string_lossy().to_string();
                if active_workspaces.contains_key(&workspace_key) {
                    continue;
                }
                active_workspaces.insert(workspace_key.clone(), ());

                let Some(job_sink) = state.job_sink_for(&agent.settings.name) else {
                    continue;
                };
                let meta = WorkspaceMeta {
                    user_id: routing_key.user_id.parse().unwrap_or_default(),
                    chat_id: routing_key.chat_id,
                    thread_id: routing_key.thread_id,
                };
                let default_tz = Some(agent.settings.cron_default_tz.clone());
                let active_workspaces = active_workspaces.clone();

                let notify_sink = PipelineNotifySink { agent_name: agent.settings.name.clone(), pipeline: pipeline.clone() };
                let system_task_engine = SystemTaskEngine::new(
                    agent.settings.claude_command.clone(),
                    DEFAULT_SUMMARY_TEMPLATE.to_string(),
                    agent.settings.locale.clone(),
                    agent.settings.cron_default_tz.clone(),
                    state.config.global.admin_user_ids.iter().filter_map(|s| s.parse().ok()).collect(),
                    notify_sink,
                );
                let summary_target = SummaryTarget {
                    workspace_name: agent.router.workspace_name(&routing_key),
                    workspace_dir: workspace_dir.clone(),
                    jsonl_path: window_id_jsonl_path(&agent.windows, &window_id),
                    recipients: vec![SummaryRecipient {
                        user_id: meta.user_id,
                        chat_id: meta.chat_id,
                        thread_id: meta.thread_id,
                    }],
                };

                tokio::spawn(async move {
                    if let Err(e) = run_workspace_cron(
                        workspace_dir.clone(),
                        job_sink,
                        meta,
                        default_tz,
                        tick_interval,
                        system_task_engine,
                        summary_target,
                    )
                    .await
                    {
                        error!(workspace = %workspace_dir.display(), error = %e, "workspace cron loop exited");
                    }
                    active_workspaces.remove(&workspace_key);
                });
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(tick_interval) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested, detaching tunnel");
                state.tunnel.detach().await;
                return Ok(());
            }
        }
    }
}

fn window_id_jsonl_path(windows: &bridge_sessions::WindowManager, window_id: &WindowId) -> std::path::PathBuf {
    windows
        .window_state(window_id)
        .and_then(|w| w.session_id)
        .and_then(|sid| find_transcript_path(&sid))
        .unwrap_or_default()
}

#[allow(clippy::too_many_arguments)]
async fn run_workspace_cron(
    workspace_dir: std::path::PathBuf,
    job_sink: crate::app::TmuxJobSink,
    meta: WorkspaceMeta,
    default_tz: Option<String>,
    tick_interval: Duration,
    system_task_engine: SystemTaskEngine<PipelineNotifySink>,
    summary_target: SummaryTarget,
) -> Result<(), SchedulerError> {
    std::fs::create_dir_all(&workspace_dir).map_err(SchedulerError::Io)?;
    let db_path = workspace_dir.join("memory.db");
    let conn = Connection::open(&db_path).map_err(SchedulerError::Database)?;
    let store = CronStore::open(conn)?;
    let mut engine = CronEngine::new(store, job_sink, meta, default_tz);
    engine.recover_on_startup().await?;

    // J2 reads/writes the same workspace's `cron_meta` table through its own
    // connection — J1's `CronEngine` owns the store it needs for job rows.
    let system_conn = Connection::open(&db_path).map_err(SchedulerError::Database)?;
    let mut system_store = CronStore::open(system_conn)?;

    loop {
        if let Err(e) = engine.tick().await {
            warn!(error = %e, "cron tick failed");
        }

        if !summary_target.jsonl_path.as_os_str().is_empty() {
            match system_task_engine.run_if_due(&mut system_store, &summary_target).await {
                Ok(true) => info!(workspace = %summary_target.workspace_name, "ran system-task summary"),
                Ok(false) => {}
                Err(e) => warn!(error = %e, "system-task summary tick failed"),
            }
        }

        tokio::time::sleep(tick_interval).await;
    }
}

/// Tick the Status Poller over every currently bound window, fanning status
/// lines, interactive frames, and freeze notifications out through the
/// Delivery Pipeline.
fn spawn_status_poller(state: Arc<AppState>, pipeline: Arc<crate::delivery::GatewayPipeline>) {
    let tick_interval = Duration::from_secs(2);
    tokio::spawn(async move {
        let status_sink = Arc::new(GatewayStatusSink { state: state.clone(), pipeline });
        let mut poller = StatusPoller::new(state.multiplexer.clone(), status_sink);
        loop {
            let window_ids: Vec<String> = state
                .agents
                .values()
                .flat_map(|a| a.router.iter_bindings().into_iter().map(|(_, w)| w.as_str().to_string()))
                .collect();
            poller.tick(&window_ids).await;
            tokio::time::sleep(tick_interval).await;
        }
    });
}

/// Spawn one `TranscriptMonitor` per currently bound window (deduped so a
/// window only ever gets one tailing task), feeding parsed entries into the
/// Delivery Pipeline for every destination bound to that window.
fn spawn_transcript_monitors(state: Arc<AppState>, pipeline: Arc<crate::delivery::GatewayPipeline>) {
    let active: Arc<DashMap<String, ()>> = Arc::new(DashMap::new());
    let scan_interval = Duration::from_secs(2);
    tokio::spawn(async move {
        loop {
            for agent in state.agents.values() {
                for (routing_key, window_id) in agent.router.iter_bindings() {
                    let window_id_str = window_id.as_str().to_string();
                    if active.contains_key(&window_id_str) {
                        continue;
                    }
                    let Some(window_state) = agent.windows.window_state(&window_id) else { continue };
                    let Some(session_id) = window_state.session_id else { continue };
                    let Some(transcript_path) = find_transcript_path(&session_id) else { continue };

                    let display_name = agent.router.workspace_name(&routing_key);
                    let monitor_state_path = agent.workspace_root.join(&display_name).join(".monitor_state.json");

                    active.insert(window_id_str.clone(), ());
                    let state = state.clone();
                    let pipeline = pipeline.clone();
                    tokio::spawn(run_transcript_monitor(
                        state,
                        pipeline,
                        window_id_str,
                        transcript_path,
                        monitor_state_path,
                    ));
                }
            }
            tokio::time::sleep(scan_interval).await;
        }
    });
}

async fn run_transcript_monitor(
    state: Arc<AppState>,
    pipeline: Arc<crate::delivery::GatewayPipeline>,
    window_id: String,
    transcript_path: std::path::PathBuf,
    monitor_state_path: std::path::PathBuf,
) {
    let mut monitor = TranscriptMonitor::new(transcript_path, monitor_state_path);
    let poll_interval = Duration::from_millis(750);
    loop {
        match monitor.poll().await {
            Ok(entries) if !entries.is_empty() => {
                let dests = destinations_for_window(&state, &window_id);
                for entry in entries {
                    if entry.no_notify || dests.is_empty() {
                        continue;
                    }
                    let kind = match entry.content_type {
                        ContentType::ToolUse => ContentKind::ToolUse,
                        ContentType::ToolResult => ContentKind::ToolResult,
                        _ => ContentKind::Text,
                    };
                    let mut task = ContentTask::new(window_id.clone(), vec![entry.text]);
                    if let Some(tool_use_id) = entry.tool_use_id {
                        task = task.with_tool_use(tool_use_id, kind);
                    }
                    for dest in &dests {
                        pipeline.enqueue_content(dest, task.clone());
                    }
                }
            }
            Ok(_) => {}
            Err(e) => warn!(window_id, error = %e, "transcript monitor poll failed"),
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// Spawn one `TelegramAdapter` long-polling loop per configured agent, each
/// with its own bot client and the same `TmuxJobSink` the J1 cron loop uses
/// as its `WindowOpener`.
fn spawn_telegram_adapters(state: Arc<AppState>) {
    for agent_name in state.agents.keys().cloned().collect::<Vec<_>>() {
        let Some(bot) = state.bots.get(&agent_name).cloned() else { continue };
        let Some(agent) = state.agents.get(&agent_name) else { continue };
        let Some(opener) = state.job_sink_for(&agent_name) else { continue };

        let settings = agent.settings.clone();
        let router = agent.router.clone();
        let multiplexer = state.multiplexer.clone();
        let adapter = TelegramAdapter::new(bot, settings, router, multiplexer, Arc::new(opener));

        tokio::spawn(async move {
            adapter.run().await;
        });
    }
}
