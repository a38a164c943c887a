/// Leaves room for markdown-conversion overhead, per the original's
/// `MERGE_MAX_LENGTH`.
pub const MERGE_MAX_LENGTH: usize = 3800;
pub const WORKER_MAX_RETRIES: u32 = 3;
pub const WORKER_RETRY_DELAY_SECS: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Text,
    ToolUse,
    ToolResult,
}

/// A content message produced by the transcript parser, queued for delivery
/// to one destination.
#[derive(Debug, Clone)]
pub struct ContentTask {
    pub window_id: String,
    pub parts: Vec<String>,
    pub tool_use_id: Option<String>,
    pub kind: ContentKind,
    pub retry_count: u32,
}

impl ContentTask {
    pub fn new(window_id: impl Into<String>, parts: Vec<String>) -> Self {
        Self { window_id: window_id.into(), parts, tool_use_id: None, kind: ContentKind::Text, retry_count: 0 }
    }

    pub fn with_tool_use(mut self, tool_use_id: impl Into<String>, kind: ContentKind) -> Self {
        self.tool_use_id = Some(tool_use_id.into());
        self.kind = kind;
        self
    }

    fn parts_len(&self) -> usize {
        self.parts.iter().map(|p| p.len()).sum()
    }
}

#[derive(Debug, Clone)]
pub struct StatusUpdateTask {
    pub window_id: String,
    /// `None` (or empty once built) means "clear the status message".
    pub text: Option<String>,
    pub retry_count: u32,
}

/// One unit of work for a destination's delivery worker.
#[derive(Debug, Clone)]
pub enum DeliveryTask {
    Content(ContentTask),
    StatusUpdate(StatusUpdateTask),
}

impl DeliveryTask {
    pub fn window_id(&self) -> &str {
        match self {
            DeliveryTask::Content(t) => &t.window_id,
            DeliveryTask::StatusUpdate(t) => &t.window_id,
        }
    }

    pub fn retry_count(&self) -> u32 {
        match self {
            DeliveryTask::Content(t) => t.retry_count,
            DeliveryTask::StatusUpdate(t) => t.retry_count,
        }
    }

    pub fn bump_retry(&mut self) {
        match self {
            DeliveryTask::Content(t) => t.retry_count += 1,
            DeliveryTask::StatusUpdate(t) => t.retry_count += 1,
        }
    }
}

/// Can `candidate` be folded into `base`'s content run?
///
/// tool_use/tool_result tasks break the merge chain: a tool_use will later
/// be edited in place by its tool_result, and a tool_result itself edits a
/// prior message — merging either into a neighboring plain-text run would
/// scramble delivery order.
pub fn can_merge(base: &ContentTask, candidate: &DeliveryTask) -> bool {
    let DeliveryTask::Content(candidate) = candidate else { return false };
    if base.window_id != candidate.window_id {
        return false;
    }
    !matches!(base.kind, ContentKind::ToolUse | ContentKind::ToolResult)
        && !matches!(candidate.kind, ContentKind::ToolUse | ContentKind::ToolResult)
}

/// Fold every task in `queued` that can legally merge with `base` (in order,
/// stopping at the first non-mergeable or over-length task) into `base`.
/// Returns the merged task plus the tasks that were not consumed.
pub fn merge_content_run(base: ContentTask, queued: Vec<DeliveryTask>) -> (ContentTask, Vec<DeliveryTask>) {
    let mut merged = base;
    let mut current_length = merged.parts_len();
    let mut remaining = Vec::with_capacity(queued.len());
    let mut consuming = true;

    for task in queued {
        if consuming && can_merge(&merged, &task) {
            let DeliveryTask::Content(candidate) = &task else { unreachable!() };
            let candidate_len = candidate.parts_len();
            if current_length + candidate_len > MERGE_MAX_LENGTH {
                consuming = false;
                remaining.push(task);
                continue;
            }
            let DeliveryTask::Content(candidate) = task else { unreachable!() };
            current_length += candidate_len;
            merged.parts.extend(candidate.parts);
        } else {
            consuming = false;
            remaining.push(task);
        }
    }

    (merged, remaining)
}

/// Per-destination delivery state a worker tracks between tasks.
#[derive(Debug, Clone, Default)]
pub struct StatusMessageInfo {
    pub message_id: i64,
    pub window_id: String,
    pub last_text: String,
}

pub type MessageId = i64;

#[cfg(test)]
mod tests {
    use super::*;

    fn content(window_id: &str, text: &str) -> DeliveryTask {
        DeliveryTask::Content(ContentTask::new(window_id, vec![text.to_string()]))
    }

    #[test]
    fn merges_consecutive_text_runs_same_window() {
        let base = ContentTask::new("w1", vec!["a".into()]);
        let queued = vec![content("w1", "b"), content("w1", "c")];
        let (merged, remaining) = merge_content_run(base, queued);
        assert_eq!(merged.parts, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
        assert!(remaining.is_empty());
    }

    #[test]
    fn stops_merging_at_different_window() {
        let base = ContentTask::new("w1", vec!["a".into()]);
        let queued = vec![content("w1", "b"), content("w2", "c"), content("w1", "d")];
        let (merged, remaining) = merge_content_run(base, queued);
        assert_eq!(merged.parts, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(remaining.len(), 2, "items after the window break stay queued in order");
    }

    #[test]
    fn tool_result_task_never_merges() {
        let base = ContentTask::new("w1", vec!["a".into()]).with_tool_use("t1", ContentKind::ToolResult);
        let queued = vec![content("w1", "b")];
        let (merged, remaining) = merge_content_run(base, queued);
        assert_eq!(merged.parts, vec!["a".to_string()]);
        assert_eq!(remaining.len(), 1);
    }

    #[test]
    fn respects_merge_max_length() {
        let base = ContentTask::new("w1", vec!["x".repeat(MERGE_MAX_LENGTH - 1)]);
        let queued = vec![content("w1", "yy")];
        let (merged, remaining) = merge_content_run(base, queued);
        assert_eq!(merged.parts.len(), 1, "oversized candidate stays unmerged");
        assert_eq!(remaining.len(), 1);
    }
}
