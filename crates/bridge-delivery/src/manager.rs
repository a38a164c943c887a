use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::info;

use bridge_core::types::Destination;

use crate::marker::LinkResolver;
use crate::queue::{DestinationWorker, PaneStatusSource};
use crate::sink::DeliverySink;
use crate::types::{ContentTask, DeliveryTask, StatusUpdateTask};

/// Owns one FIFO worker task per destination, the way `bridge-gateway::AppState`
/// holds `ws_clients`/`channel_senders` in a `DashMap`.
pub struct DeliveryPipeline<S: DeliverySink + 'static, P: PaneStatusSource + 'static> {
    sink: Arc<S>,
    pane_source: Arc<P>,
    links: Option<Arc<dyn LinkResolver>>,
    senders: DashMap<Destination, mpsc::UnboundedSender<DeliveryTask>>,
}

impl<S: DeliverySink + 'static, P: PaneStatusSource + 'static> DeliveryPipeline<S, P> {
    pub fn new(sink: Arc<S>, pane_source: Arc<P>) -> Self {
        Self { sink, pane_source, links: None, senders: DashMap::new() }
    }

    /// Every worker this pipeline spawns from now on resolves
    /// `[SHARE_LINK:...]`/`[UPLOAD_LINK]`/`[SEND_FILE:...]` markers through
    /// `resolver` before sending (spec.md §6).
    pub fn with_link_resolver(mut self, resolver: Arc<dyn LinkResolver>) -> Self {
        self.links = Some(resolver);
        self
    }

    fn sender_for(&self, dest: &Destination) -> mpsc::UnboundedSender<DeliveryTask> {
        if let Some(tx) = self.senders.get(dest) {
            return tx.clone();
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.insert(dest.clone(), tx.clone());
        let mut worker = DestinationWorker::new(dest.clone(), self.sink.clone(), self.pane_source.clone(), rx);
        if let Some(links) = &self.links {
            worker = worker.with_link_resolver(links.clone());
        }
        tokio::spawn(worker.run());
        info!(dest = %dest, "spawned delivery worker");
        tx
    }

    pub fn enqueue_content(&self, dest: &Destination, task: ContentTask) {
        let _ = self.sender_for(dest).send(DeliveryTask::Content(task));
    }

    pub fn enqueue_status_update(&self, dest: &Destination, window_id: impl Into<String>, text: Option<String>) {
        let task = StatusUpdateTask { window_id: window_id.into(), text, retry_count: 0 };
        let _ = self.sender_for(dest).send(DeliveryTask::StatusUpdate(task));
    }

    pub fn enqueue_status_clear(&self, dest: &Destination, window_id: impl Into<String>) {
        self.enqueue_status_update(dest, window_id, None);
    }

    /// Drop every worker's sender, letting each worker task drain its
    /// channel and exit once the receiver sees `None`.
    pub fn shutdown(&self) {
        self.senders.clear();
        info!("delivery pipeline shut down, workers draining");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlatformError;
    use crate::types::MessageId;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink(AtomicUsize);

    #[async_trait]
    impl DeliverySink for CountingSink {
        async fn send_text(&self, _dest: &Destination, _text: &str) -> Result<MessageId, PlatformError> {
            Ok(self.0.fetch_add(1, Ordering::SeqCst) as i64)
        }
        async fn edit_text(&self, _dest: &Destination, _message_id: MessageId, _text: &str) -> Result<(), PlatformError> {
            Ok(())
        }
        async fn delete_message(&self, _dest: &Destination, _message_id: MessageId) -> Result<(), PlatformError> {
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

    #[tokio::test]
    async fn enqueue_spawns_one_worker_per_destination() {
        let pipeline = DeliveryPipeline::new(Arc::new(CountingSink(AtomicUsize::new(0))), Arc::new(NoStatus));
        let dest_a = Destination { agent: "main".into(), user_id: "a".into(), chat_id: 1, thread_id: None };
        let dest_b = Destination { agent: "main".into(), user_id: "b".into(), chat_id: 2, thread_id: None };

        pipeline.enqueue_content(&dest_a, ContentTask::new("w1", vec!["hi".into()]));
        pipeline.enqueue_content(&dest_b, ContentTask::new("w2", vec!["hi".into()]));
        assert_eq!(pipeline.senders.len(), 2);

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
}
