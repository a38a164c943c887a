//! Per-destination delivery worker.
//!
//! Grounded in the original's `message_queue.py` worker loop: one task
//! processed at a time, content runs merged opportunistically, status
//! messages converted into content in place rather than deleted and
//! resent, bounded retry for transient network errors, flood control
//! respected by sleeping rather than retrying.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use bridge_core::types::Destination;

use crate::error::PlatformError;
use crate::marker::{rewrite_markers, LinkResolver};
use crate::sink::DeliverySink;
use crate::types::{
    merge_content_run, ContentKind, ContentTask, DeliveryTask, MessageId, StatusMessageInfo, StatusUpdateTask,
    WORKER_MAX_RETRIES, WORKER_RETRY_DELAY_SECS,
};

/// Minimum gap between chat-send calls for one destination.
const MIN_SEND_INTERVAL: Duration = Duration::from_millis(1100);

/// Reads a window's current terminal status line, decoupling this crate
/// from `bridge-terminal`'s `Multiplexer`/pane-parsing types the way
/// `bridge-terminal::StatusSink` decouples the status poller from this one.
#[async_trait]
pub trait PaneStatusSource: Send + Sync {
    async fn status_line(&self, window_id: &str) -> Option<String>;
}

pub struct DestinationWorker<S: DeliverySink, P: PaneStatusSource> {
    dest: Destination,
    sink: Arc<S>,
    pane_source: Arc<P>,
    links: Option<Arc<dyn LinkResolver>>,
    rx: mpsc::UnboundedReceiver<DeliveryTask>,
    pending: VecDeque<DeliveryTask>,
    tool_msg_ids: std::collections::HashMap<String, i64>,
    status_msg_info: Option<StatusMessageInfo>,
    last_send_at: Option<Instant>,
}

impl<S: DeliverySink, P: PaneStatusSource> DestinationWorker<S, P> {
    pub fn new(dest: Destination, sink: Arc<S>, pane_source: Arc<P>, rx: mpsc::UnboundedReceiver<DeliveryTask>) -> Self {
        Self {
            dest,
            sink,
            pane_source,
            links: None,
            rx,
            pending: VecDeque::new(),
            tool_msg_ids: Default::default(),
            status_msg_info: None,
            last_send_at: None,
        }
    }

    /// Resolve `[SHARE_LINK:...]`/`[UPLOAD_LINK]`/`[SEND_FILE:...]` markers
    /// in outbound text through `resolver` instead of sending them verbatim.
    pub fn with_link_resolver(mut self, resolver: Arc<dyn LinkResolver>) -> Self {
        self.links = Some(resolver);
        self
    }

    async fn resolve_markers(&self, window_id: &str, text: &str) -> String {
        match &self.links {
            Some(resolver) => rewrite_markers(text, window_id, resolver.as_ref()).await,
            None => text.to_string(),
        }
    }

    /// Gate every platform send/edit call behind a per-destination minimum
    /// interval, so a burst of content doesn't trip the platform's own
    /// flood control.
    async fn rate_limit_gate(&mut self) {
        if let Some(last) = self.last_send_at {
            let elapsed = last.elapsed();
            if elapsed < MIN_SEND_INTERVAL {
                tokio::time::sleep(MIN_SEND_INTERVAL - elapsed).await;
            }
        }
        self.last_send_at = Some(Instant::now());
    }

    async fn send_text(&mut self, text: &str) -> Result<MessageId, PlatformError> {
        self.rate_limit_gate().await;
        self.sink.send_text(&self.dest, text).await
    }

    async fn edit_text(&mut self, message_id: MessageId, text: &str) -> Result<(), PlatformError> {
        self.rate_limit_gate().await;
        self.sink.edit_text(&self.dest, message_id, text).await
    }

    pub async fn run(mut self) {
        info!(dest = %self.dest, "delivery worker started");
        loop {
            let task = match self.pending.pop_front() {
                Some(t) => t,
                None => match self.rx.recv().await {
                    Some(t) => t,
                    None => break,
                },
            };
            self.handle(task).await;
        }
        info!(dest = %self.dest, "delivery worker stopped");
    }

    /// Non-destructively pull everything currently queued (both the local
    /// look-ahead buffer and whatever the channel already holds).
    fn drain_queued(&mut self) -> Vec<DeliveryTask> {
        let mut items: Vec<DeliveryTask> = self.pending.drain(..).collect();
        while let Ok(t) = self.rx.try_recv() {
            items.push(t);
        }
        items
    }

    async fn handle(&mut self, task: DeliveryTask) {
        let task = match task {
            DeliveryTask::Content(content) => {
                let queued = self.drain_queued();
                let (merged, remaining) = merge_content_run(content, queued);
                if !remaining.is_empty() {
                    debug!(dest = %self.dest, remaining = remaining.len(), "re-queuing unmerged tasks");
                }
                self.pending.extend(remaining);
                DeliveryTask::Content(merged)
            }
            other => other,
        };

        match self.process_with_retry(task).await {
            Ok(()) => {}
            Err(err) => warn!(dest = %self.dest, %err, "dropping delivery task after retries exhausted"),
        }
    }

    async fn process_with_retry(&mut self, mut task: DeliveryTask) -> Result<(), PlatformError> {
        loop {
            let result = match &task {
                DeliveryTask::Content(content) => self.process_content(content.clone()).await,
                DeliveryTask::StatusUpdate(status) => self.process_status_update(status.clone()).await,
            };

            match result {
                Ok(()) => return Ok(()),
                Err(PlatformError::Flood(retry_after)) => {
                    warn!(dest = %self.dest, ?retry_after, "flood control, pausing delivery");
                    sleep_logging_progress(retry_after).await;
                    // The original drops the task once the wait elapses rather
                    // than resending it — flood control is rare enough in
                    // practice that silently resending risks a duplicate.
                    return Ok(());
                }
                Err(PlatformError::Transient(msg)) if task.retry_count() < WORKER_MAX_RETRIES => {
                    task.bump_retry();
                    warn!(
                        dest = %self.dest,
                        retry = task.retry_count(),
                        max = WORKER_MAX_RETRIES,
                        %msg,
                        "transient delivery error, retrying"
                    );
                    tokio::time::sleep(Duration::from_secs(WORKER_RETRY_DELAY_SECS)).await;
                    continue;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn process_content(&mut self, task: ContentTask) -> Result<(), PlatformError> {
        if matches!(task.kind, ContentKind::ToolResult) {
            if let Some(tool_use_id) = &task.tool_use_id {
                if let Some(message_id) = self.tool_msg_ids.remove(tool_use_id) {
                    self.clear_status().await?;
                    let full_text = task.parts.join("\n\n");
                    let full_text = self.resolve_markers(&task.window_id, &full_text).await;
                    self.edit_text(message_id, &full_text).await?;
                    self.maybe_send_status(&task.window_id).await;
                    return Ok(());
                }
            }
        }

        let mut last_message_id = None;
        for (i, part) in task.parts.iter().enumerate() {
            let part = self.resolve_markers(&task.window_id, part).await;
            if i == 0 {
                if let Some(converted) = self.convert_status_to_content(&task.window_id, &part).await? {
                    last_message_id = Some(converted);
                    continue;
                }
            }
            let sent = self.send_text(&part).await?;
            last_message_id = Some(sent);
        }

        if matches!(task.kind, ContentKind::ToolUse) {
            if let (Some(tool_use_id), Some(message_id)) = (&task.tool_use_id, last_message_id) {
                self.tool_msg_ids.insert(tool_use_id.clone(), message_id);
            }
        }

        self.maybe_send_status(&task.window_id).await;
        Ok(())
    }

    /// If the current status message belongs to the same window, edit it
    /// into the first content part instead of deleting-then-sending.
    async fn convert_status_to_content(&mut self, window_id: &str, text: &str) -> Result<Option<i64>, PlatformError> {
        let Some(info) = self.status_msg_info.take() else { return Ok(None) };
        if info.window_id != window_id {
            let _ = self.sink.delete_message(&self.dest, info.message_id).await;
            return Ok(None);
        }
        match self.edit_text(info.message_id, text).await {
            Ok(()) => Ok(Some(info.message_id)),
            Err(_) => Ok(None),
        }
    }

    async fn process_status_update(&mut self, task: StatusUpdateTask) -> Result<(), PlatformError> {
        let Some(text) = task.text.filter(|t| !t.is_empty()) else {
            return self.clear_status().await;
        };

        if text.to_lowercase().contains("esc to interrupt") {
            self.sink.send_typing(&self.dest).await;
        }

        match self.status_msg_info.clone() {
            Some(info) if info.window_id != task.window_id => {
                self.clear_status().await?;
                self.send_new_status(task.window_id, text).await
            }
            Some(info) if info.last_text == text => Ok(()),
            Some(info) => {
                self.edit_text(info.message_id, &text).await?;
                self.status_msg_info = Some(StatusMessageInfo { last_text: text, ..info });
                Ok(())
            }
            None => self.send_new_status(task.window_id, text).await,
        }
    }

    async fn send_new_status(&mut self, window_id: String, text: String) -> Result<(), PlatformError> {
        let message_id = self.send_text(&text).await?;
        self.status_msg_info = Some(StatusMessageInfo { message_id, window_id, last_text: text });
        Ok(())
    }

    async fn clear_status(&mut self) -> Result<(), PlatformError> {
        if let Some(info) = self.status_msg_info.take() {
            if let Err(err) = self.sink.delete_message(&self.dest, info.message_id).await {
                debug!(dest = %self.dest, %err, "failed to delete status message, ignoring");
            }
        }
        Ok(())
    }

    /// Only send a status line if nothing else is already waiting for this
    /// destination — the original's check against `queue.empty()`.
    async fn maybe_send_status(&mut self, window_id: &str) {
        if !self.pending.is_empty() {
            return;
        }
        if let Some(status) = self.pane_source.status_line(window_id).await {
            let _ = self.send_new_status(window_id.to_string(), status).await;
        }
    }
}

async fn sleep_logging_progress(total: Duration) {
    let mut remaining = total;
    while remaining > Duration::ZERO {
        let chunk = remaining.min(Duration::from_secs(30));
        tokio::time::sleep(chunk).await;
        remaining -= chunk;
        if remaining > Duration::ZERO {
            warn!(remaining_secs = remaining.as_secs(), "flood control still in effect");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageId;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Mutex;

    struct RecordingSink {
        next_id: AtomicI64,
        sent: Mutex<Vec<String>>,
        edits: Mutex<Vec<(i64, String)>>,
        deletes: Mutex<Vec<i64>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self { next_id: AtomicI64::new(1), sent: Mutex::new(vec![]), edits: Mutex::new(vec![]), deletes: Mutex::new(vec![]) }
        }
    }

    #[async_trait]
    impl DeliverySink for RecordingSink {
        async fn send_text(&self, _dest: &Destination, text: &str) -> Result<MessageId, PlatformError> {
            self.sent.lock().unwrap().push(text.to_string());
            Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
        }
        async fn edit_text(&self, _dest: &Destination, message_id: MessageId, text: &str) -> Result<(), PlatformError> {
            self.edits.lock().unwrap().push((message_id, text.to_string()));
            Ok(())
        }
        async fn delete_message(&self, _dest: &Destination, message_id: MessageId) -> Result<(), PlatformError> {
            self.deletes.lock().unwrap().push(message_id);
            Ok(())
        }
        async fn send_typing(&self, _dest: &Destination) {}
    }

    struct NoStatus;
    #[async_trait]
    impl PaneStatusSource for NoStatus {
        async fn status_line(&self, _window_id: &str) -> Option<String> {
            None
        }
    }

    fn dest() -> Destination {
        Destination { agent: "main".into(), user_id: "u1".into(), chat_id: 1, thread_id: None }
    }

    #[tokio::test]
    async fn tool_use_then_tool_result_edits_in_place() {
        let sink = Arc::new(RecordingSink::new());
        let pane = Arc::new(NoStatus);
        let (tx, rx) = mpsc::unbounded_channel();
        let mut worker = DestinationWorker::new(dest(), sink.clone(), pane, rx);

        let tool_use = ContentTask::new("w1", vec!["running ls".into()]).with_tool_use("t1", ContentKind::ToolUse);
        worker.process_content(tool_use).await.unwrap();
        assert_eq!(sink.sent.lock().unwrap().len(), 1);

        let tool_result = ContentTask::new("w1", vec!["file1\nfile2".into()]).with_tool_use("t1", ContentKind::ToolResult);
        worker.process_content(tool_result).await.unwrap();
        assert_eq!(sink.edits.lock().unwrap().len(), 1);
        assert_eq!(sink.edits.lock().unwrap()[0].1, "file1\nfile2");

        drop(tx);
    }

    #[tokio::test]
    async fn status_converts_into_first_content_part() {
        let sink = Arc::new(RecordingSink::new());
        let pane = Arc::new(NoStatus);
        let (_tx, rx) = mpsc::unbounded_channel();
        let mut worker = DestinationWorker::new(dest(), sink.clone(), pane, rx);

        worker.send_new_status("w1".into(), "Thinking…".into()).await.unwrap();
        let content = ContentTask::new("w1", vec!["Done.".into()]);
        worker.process_content(content).await.unwrap();

        assert_eq!(sink.sent.lock().unwrap().len(), 0, "converted in place, no new send");
        assert_eq!(sink.edits.lock().unwrap().last().unwrap().1, "Done.");
    }

    #[tokio::test]
    async fn status_for_different_window_deletes_instead_of_converting() {
        let sink = Arc::new(RecordingSink::new());
        let pane = Arc::new(NoStatus);
        let (_tx, rx) = mpsc::unbounded_channel();
        let mut worker = DestinationWorker::new(dest(), sink.clone(), pane, rx);

        worker.send_new_status("w1".into(), "Thinking…".into()).await.unwrap();
        let content = ContentTask::new("w2", vec!["Done.".into()]);
        worker.process_content(content).await.unwrap();

        assert_eq!(sink.deletes.lock().unwrap().len(), 1);
        assert_eq!(sink.sent.lock().unwrap().len(), 1, "sent as a new message in the new window");
    }
}
