//! Wires the Delivery Pipeline (spec.md §4.H) and Status Poller (spec.md
//! §4.F) to the gateway's live agent/router state, via the same
//! decoupling-trait pattern the libraries already use: `PaneStatusSource`
//! reads a pane through the shared `Multiplexer`, `StatusSink` fans a pane's
//! status line out to every destination bound to its window, and
//! `NotifySink` does the same for one-shot system-task summaries.

use std::sync::Arc;

use async_trait::async_trait;

use bridge_channels::Router as ChannelRouter;
use bridge_core::types::Destination;
use bridge_delivery::{ContentTask, DeliveryPipeline, PaneStatusSource};
use bridge_scheduler::NotifySink;
use bridge_telegram::TelegramSink;
use bridge_terminal::pane::{parse_status_line, InteractiveFrame};
use bridge_terminal::status_poller::StatusSink;
use bridge_terminal::Multiplexer;

use crate::app::AppState;

pub type GatewayPipeline = DeliveryPipeline<TelegramSink, GatewayPaneStatusSource>;

pub struct GatewayPaneStatusSource {
    pub multiplexer: Arc<dyn Multiplexer>,
}

#[async_trait]
impl PaneStatusSource for GatewayPaneStatusSource {
    async fn status_line(&self, window_id: &str) -> Option<String> {
        let pane_text = self.multiplexer.capture_pane(window_id).await.ok()?;
        parse_status_line(&pane_text)
    }
}

/// Every destination any agent's router currently has bound to `window_id`.
pub(crate) fn destinations_for_window(state: &AppState, window_id: &str) -> Vec<Destination> {
    let mut dests = Vec::new();
    for agent in state.agents.values() {
        for (key, bound) in agent.router.iter_bindings() {
            if bound.as_str() == window_id {
                dests.push(Destination::from(&key));
            }
        }
    }
    dests
}

/// Fans one window's status/interactive/freeze events out to every
/// destination bound to it, and tears down windows whose destinations have
/// all gone away.
pub struct GatewayStatusSink {
    pub state: Arc<AppState>,
    pub pipeline: Arc<GatewayPipeline>,
}

#[async_trait]
impl StatusSink for GatewayStatusSink {
    async fn update_status(&self, window_id: &str, text: &str) {
        for dest in destinations_for_window(&self.state, window_id) {
            self.pipeline.enqueue_status_update(&dest, window_id, Some(text.to_string()));
        }
    }

    async fn clear_status(&self, window_id: &str) {
        for dest in destinations_for_window(&self.state, window_id) {
            self.pipeline.enqueue_status_clear(&dest, window_id);
        }
    }

    async fn send_interactive_frame(&self, window_id: &str, frame: &InteractiveFrame) {
        let text = format!("{:?}\n{}", frame.tag, frame.content);
        for dest in destinations_for_window(&self.state, window_id) {
            self.pipeline.enqueue_content(&dest, ContentTask::new(window_id, vec![text.clone()]));
        }
    }

    async fn notify_frozen(&self, window_id: &str) {
        let text = "Session appears frozen (no output change for a while).".to_string();
        for dest in destinations_for_window(&self.state, window_id) {
            self.pipeline.enqueue_content(&dest, ContentTask::new(window_id, vec![text.clone()]));
        }
    }

    async fn probe_destinations_gone(&self, window_id: &str) -> bool {
        let mut saw_any = false;
        for agent in self.state.agents.values() {
            for (key, bound) in agent.router.iter_bindings() {
                if bound.as_str() != window_id {
                    continue;
                }
                saw_any = true;
                if agent.router.probe_destination_exists(&key).await {
                    return false;
                }
            }
        }
        saw_any
    }
}

/// Delivers J2 system-task summaries and admin alerts through the same
/// pipeline a window's own content uses, on a synthetic per-workspace
/// destination (no single tmux window backs a summary run).
pub struct PipelineNotifySink {
    pub agent_name: String,
    pub pipeline: Arc<GatewayPipeline>,
}

#[async_trait]
impl NotifySink for PipelineNotifySink {
    async fn notify(&self, user_id: i64, chat_id: i64, thread_id: Option<i64>, text: &str) {
        let dest =
            Destination { agent: self.agent_name.clone(), user_id: user_id.to_string(), chat_id, thread_id };
        let window_id = format!("system:{}", self.agent_name);
        self.pipeline.enqueue_content(&dest, ContentTask::new(window_id, vec![text.to_string()]));
    }
}
