//! Tails an assistant CLI transcript file incrementally and turns newly
//! appended JSON-lines entries into chat-facing entries.
//!
//! Grounded on `bridge-sessions`'s offset-tracking idiom and spec.md §6's
//! `monitor_state.json` persisted-state shape; carrier reset-on-rotation is
//! OQ-4 (see DESIGN.md).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tracing::{info, instrument, warn};

use crate::parser::parse_entries;
use crate::types::{ParsedMessageEntry, PendingTools, RawEntry};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MonitorState {
    pub byte_offset: u64,
    pub last_session_id: Option<String>,
    #[serde(default)]
    pub pending_tools: PendingTools,
    #[serde(default)]
    pub no_notify_active: bool,
}

/// Owns the offset + parser carrier for one transcript file and persists
/// both to `monitor_state.json` after every poll.
pub struct TranscriptMonitor {
    transcript_path: PathBuf,
    state_path: PathBuf,
    state: MonitorState,
}

impl TranscriptMonitor {
    pub fn new(transcript_path: impl Into<PathBuf>, state_path: impl Into<PathBuf>) -> Self {
        let state_path = state_path.into();
        let state = bridge_core::atomic::read_json_or_default(&state_path).unwrap_or_default();
        Self {
            transcript_path: transcript_path.into(),
            state_path,
            state,
        }
    }

    /// Read any bytes appended since the last poll and parse them.
    ///
    /// A shrinking file (the assistant CLI started a fresh transcript at
    /// the same path) resets the offset to 0 rather than erroring.
    #[instrument(skip(self), fields(path = %self.transcript_path.display()))]
    pub async fn poll(&mut self) -> std::io::Result<Vec<ParsedMessageEntry>> {
        let Ok(mut file) = tokio::fs::File::open(&self.transcript_path).await else {
            return Ok(Vec::new());
        };
        let metadata = file.metadata().await?;
        if metadata.len() < self.state.byte_offset {
            info!("transcript file shrank, resetting read offset");
            self.state.byte_offset = 0;
        }
        file.seek(std::io::SeekFrom::Start(self.state.byte_offset)).await?;

        let mut reader = BufReader::new(file);
        let mut line = String::new();
        let mut raw_entries = Vec::new();
        loop {
            line.clear();
            let read = reader.read_line(&mut line).await?;
            if read == 0 {
                break;
            }
            self.state.byte_offset += read as u64;
            let trimmed = line.trim_end();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<RawEntry>(trimmed) {
                Ok(entry) => raw_entries.push(entry),
                Err(err) => warn!(%err, line = %trimmed, "skipping malformed transcript line"),
            }
        }

        let mut emitted = Vec::new();
        for entry in raw_entries {
            self.maybe_reset_on_rotation(&entry);
            let (mut out, pending, no_notify) = parse_entries(
                std::slice::from_ref(&entry),
                std::mem::take(&mut self.state.pending_tools),
                self.state.no_notify_active,
            );
            self.state.pending_tools = pending;
            self.state.no_notify_active = no_notify;
            emitted.append(&mut out);
        }

        self.persist()?;
        Ok(emitted)
    }

    fn maybe_reset_on_rotation(&mut self, entry: &RawEntry) {
        let Some(session_id) = &entry.session_id else {
            return;
        };
        if self.state.last_session_id.as_deref() == Some(session_id.as_str()) {
            return;
        }
        if self.state.last_session_id.is_some() {
            info!(new_session = %session_id, "session rotated, discarding pending tool_uses");
        }
        self.state.last_session_id = Some(session_id.clone());
        self.state.pending_tools = PendingTools::new();
        self.state.no_notify_active = false;
    }

    fn persist(&self) -> std::io::Result<()> {
        bridge_core::atomic::write_json(&self.state_path, &self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    async fn write_lines(path: &std::path::Path, lines: &[&str]) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
    }

    #[tokio::test]
    async fn poll_is_incremental_and_persists_offset() {
        let dir = tempdir().unwrap();
        let transcript = dir.path().join("transcript.jsonl");
        let state_path = dir.path().join("monitor_state.json");

        write_lines(&transcript, &[r#"{"type":"user","message":{"content":"hi"}}"#]).await;

        let mut monitor = TranscriptMonitor::new(&transcript, &state_path);
        let first = monitor.poll().await.unwrap();
        assert_eq!(first.len(), 1);

        let second = monitor.poll().await.unwrap();
        assert!(second.is_empty(), "no new bytes should yield no new entries");

        write_lines(&transcript, &[r#"{"type":"user","message":{"content":"again"}}"#]).await;
        let third = monitor.poll().await.unwrap();
        assert_eq!(third.len(), 1);
        assert_eq!(third[0].text, "again");
    }

    #[tokio::test]
    async fn session_rotation_discards_pending_tools() {
        let dir = tempdir().unwrap();
        let transcript = dir.path().join("transcript.jsonl");
        let state_path = dir.path().join("monitor_state.json");

        write_lines(
            &transcript,
            &[r#"{"type":"assistant","session_id":"s1","message":{"content":[{"type":"tool_use","id":"tu_1","name":"Bash","input":{"command":"ls"}}]}}"#],
        )
        .await;
        let mut monitor = TranscriptMonitor::new(&transcript, &state_path);
        monitor.poll().await.unwrap();
        assert_eq!(monitor.state.pending_tools.len(), 1);

        write_lines(
            &transcript,
            &[r#"{"type":"user","session_id":"s2","message":{"content":"fresh session"}}"#],
        )
        .await;
        monitor.poll().await.unwrap();
        assert!(monitor.state.pending_tools.is_empty(), "rotation must flush pending tool_uses");
    }
}
