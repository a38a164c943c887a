//! Background loop that captures each bound window's pane on a fixed
//! cadence and turns it into status updates, interactive-frame hand-offs,
//! and freeze notifications.
//!
//! Decoupled from routing/delivery via the [`StatusSink`] trait so this
//! crate never depends on `bridge-sessions`/`bridge-channels`/`bridge-delivery`
//! — the wiring lives in the binary that owns all of them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::freeze::FreezeDetector;
use crate::multiplexer::Multiplexer;
use crate::pane::{extract_interactive_frame, is_interactive_ui, parse_status_line, InteractiveFrame};

/// Default freeze-detection timeout (spec.md default: 60s).
pub const DEFAULT_FREEZE_TIMEOUT: Duration = Duration::from_secs(60);
/// How often destinations are re-probed for liveness (spec.md: every minute).
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(60);

#[async_trait::async_trait]
pub trait StatusSink: Send + Sync {
    /// Enqueue a `StatusUpdateTask` carrying the latest status line.
    async fn update_status(&self, window_id: &str, text: &str);
    /// Delete the tracked status message, if any.
    async fn clear_status(&self, window_id: &str);
    /// Send an interactive-frame's contents directly (outside the queue).
    async fn send_interactive_frame(&self, window_id: &str, frame: &InteractiveFrame);
    /// Send a "session appears frozen" notification with a restart action.
    async fn notify_frozen(&self, window_id: &str);
    /// Probe whether every destination bound to this window still exists.
    /// Returns `true` if the window should be torn down (all gone).
    async fn probe_destinations_gone(&self, window_id: &str) -> bool;
}

struct WindowPollState {
    interactive_mode: bool,
    freeze: FreezeDetector,
    last_probe_at: Instant,
}

impl WindowPollState {
    fn new() -> Self {
        Self {
            interactive_mode: false,
            freeze: FreezeDetector::new(),
            last_probe_at: Instant::now(),
        }
    }
}

pub struct StatusPoller<M: Multiplexer + ?Sized, S: StatusSink> {
    multiplexer: Arc<M>,
    sink: Arc<S>,
    freeze_timeout: Duration,
    probe_interval: Duration,
    states: HashMap<String, WindowPollState>,
}

impl<M: Multiplexer + ?Sized, S: StatusSink> StatusPoller<M, S> {
    pub fn new(multiplexer: Arc<M>, sink: Arc<S>) -> Self {
        Self {
            multiplexer,
            sink,
            freeze_timeout: DEFAULT_FREEZE_TIMEOUT,
            probe_interval: DEFAULT_PROBE_INTERVAL,
            states: HashMap::new(),
        }
    }

    pub fn with_timeouts(mut self, freeze_timeout: Duration, probe_interval: Duration) -> Self {
        self.freeze_timeout = freeze_timeout;
        self.probe_interval = probe_interval;
        self
    }

    /// Run one poll tick across every currently bound window.
    pub async fn tick(&mut self, window_ids: &[String]) {
        for window_id in window_ids {
            self.tick_one(window_id).await;
        }
        self.states.retain(|id, _| window_ids.iter().any(|w| w == id));
    }

    async fn tick_one(&mut self, window_id: &str) {
        let pane_text = match self.multiplexer.capture_pane(window_id).await {
            Ok(text) => text,
            Err(err) => {
                debug!(window_id, %err, "capture_pane failed, skipping tick");
                return;
            }
        };

        let state = self
            .states
            .entry(window_id.to_string())
            .or_insert_with(WindowPollState::new);

        let interactive = is_interactive_ui(&pane_text);
        if state.interactive_mode && interactive {
            return;
        }

        if interactive {
            self.sink.clear_status(window_id).await;
            state.interactive_mode = true;
            if let Some(frame) = extract_interactive_frame(&pane_text) {
                self.sink.send_interactive_frame(window_id, &frame).await;
            }
        } else {
            state.interactive_mode = false;
        }

        let status = parse_status_line(&pane_text);
        if !interactive {
            if let Some(status) = &status {
                self.sink.update_status(window_id, status).await;
            }
            // Empty status is not cleared — last known status stays sticky.
        }

        if state.freeze.observe(&pane_text, status.is_some(), self.freeze_timeout) {
            self.sink.notify_frozen(window_id).await;
        }

        if state.last_probe_at.elapsed() >= self.probe_interval {
            state.last_probe_at = Instant::now();
            if self.sink.probe_destinations_gone(window_id).await {
                warn!(window_id, "all destinations gone, killing window");
                let _ = self.multiplexer.kill_session(window_id).await;
                self.states.remove(window_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use std::sync::Mutex;

    struct FakeMultiplexer {
        pane_text: Mutex<String>,
    }

    #[async_trait::async_trait]
    impl Multiplexer for FakeMultiplexer {
        async fn has_session(&self, _window_id: &str) -> Result<bool> {
            Ok(true)
        }
        async fn new_session(&self, _window_id: &str, _cwd: &str, _command: &str) -> Result<()> {
            Ok(())
        }
        async fn send_keys(&self, _window_id: &str, _text: &str, _press_enter: bool) -> Result<()> {
            Ok(())
        }
        async fn capture_pane(&self, _window_id: &str) -> Result<String> {
            Ok(self.pane_text.lock().unwrap().clone())
        }
        async fn kill_session(&self, _window_id: &str) -> Result<()> {
            Ok(())
        }
        async fn list_sessions(&self) -> Result<Vec<String>> {
            Ok(vec![])
        }
        async fn resize(&self, _window_id: &str, _cols: u16, _rows: u16) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        statuses: Mutex<Vec<String>>,
        frozen_notifications: Mutex<u32>,
    }

    #[async_trait::async_trait]
    impl StatusSink for RecordingSink {
        async fn update_status(&self, _window_id: &str, text: &str) {
            self.statuses.lock().unwrap().push(text.to_string());
        }
        async fn clear_status(&self, _window_id: &str) {}
        async fn send_interactive_frame(&self, _window_id: &str, _frame: &InteractiveFrame) {}
        async fn notify_frozen(&self, _window_id: &str) {
            *self.frozen_notifications.lock().unwrap() += 1;
        }
        async fn probe_destinations_gone(&self, _window_id: &str) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn status_update_enqueued_when_spinner_present() {
        let mux = Arc::new(FakeMultiplexer { pane_text: Mutex::new("✻ Thinking\n".into()) });
        let sink = Arc::new(RecordingSink::default());
        let mut poller = StatusPoller::new(mux, sink.clone());
        poller.tick(&["w1".to_string()]).await;
        assert_eq!(sink.statuses.lock().unwrap().as_slice(), ["Thinking".to_string()]);
    }

    #[tokio::test]
    async fn freeze_notification_fires_once_after_timeout() {
        let mux = Arc::new(FakeMultiplexer { pane_text: Mutex::new("✻ stuck\n".into()) });
        let sink = Arc::new(RecordingSink::default());
        let mut poller = StatusPoller::new(mux, sink.clone())
            .with_timeouts(Duration::from_millis(20), Duration::from_secs(3600));

        poller.tick(&["w1".to_string()]).await;
        std::thread::sleep(Duration::from_millis(30));
        poller.tick(&["w1".to_string()]).await;
        poller.tick(&["w1".to_string()]).await;

        assert_eq!(*sink.frozen_notifications.lock().unwrap(), 1);
    }
}
