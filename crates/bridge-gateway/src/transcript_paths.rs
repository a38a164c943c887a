//! Locates the assistant CLI's JSONL transcript for a live session.
//!
//! Grounded on the original's `system_scheduler.py::_get_jsonl_path`: the
//! session id is unique, so the first `~/.claude/projects/*/​<id>.jsonl` match
//! is the transcript, without needing to reconstruct the project-dir slug.

use std::path::{Path, PathBuf};

pub fn claude_projects_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".claude").join("projects")
}

pub fn find_transcript_path(session_id: &str) -> Option<PathBuf> {
    let projects_dir = claude_projects_dir();
    let entries = std::fs::read_dir(&projects_dir).ok()?;
    for entry in entries.flatten() {
        if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        let candidate = entry.path().join(format!("{session_id}.jsonl"));
        if candidate.exists() {
            return Some(candidate);
        }
    }
    None
}
