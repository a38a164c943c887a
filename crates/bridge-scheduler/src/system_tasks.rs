//! System Tasks (J2, spec.md §4.J.2): periodic workspace summaries run via
//! one-shot `claude -p` subprocesses instead of injected into a live window.
//!
//! Window/session resolution and recipient lookup stay with the caller
//! (`bridge-sessions`/`bridge-channels` own that state); this crate only
//! needs a [`SummaryTarget`] and delivers through [`NotifySink`].

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::error::Result;
use crate::sink::NotifySink;
use crate::store::CronStore;
use crate::types::SummaryState;

/// How often to attempt a summary per workspace.
pub const SUMMARY_INTERVAL: chrono::Duration = chrono::Duration::seconds(3600);
/// Subprocess timeout for `claude -p`.
pub const SUBPROCESS_TIMEOUT: Duration = Duration::from_secs(300);
/// Max concurrent `claude -p` processes across all workspaces.
pub const MAX_CONCURRENT_SUMMARIES: usize = 2;
/// JSONL must be idle this long before summarizing (don't interrupt an
/// active session).
pub const IDLE_THRESHOLD: chrono::Duration = chrono::Duration::seconds(300);
/// Alert an admin after this many consecutive summary failures.
pub const ADMIN_NOTIFY_THRESHOLD: u32 = 5;

/// Default prompt template for a workspace summary run, substituted via
/// `{placeholder}` tokens before being passed to `claude -p`.
pub const DEFAULT_SUMMARY_TEMPLATE: &str = "\
You are reviewing a coding session's transcript to decide whether anything \
happened since the last summary that the user would want to hear about.

Transcript: {jsonl_path}
Workspace: {workspace_path}
Last summary: {last_summary_time}
Current date: {today_date}
Timezone: {timezone}
Locale: {locale}

Read the transcript since the last summary. If nothing noteworthy happened \
(no completed tasks, no decisions, no blockers), reply with exactly:
[SILENT]

Otherwise, write a short summary (a few sentences, in {locale}) of what was \
accomplished or decided, and reply with:
[NOTIFY]
<your summary>

Save the summary to {summary_path}. If useful, record durable facts with \
{memory_save_bin}.
";

/// A workspace's summary inputs, resolved by the caller from live session
/// state (window binding, transcript path, chat recipients).
#[derive(Debug, Clone)]
pub struct SummaryTarget {
    pub workspace_name: String,
    pub workspace_dir: PathBuf,
    pub jsonl_path: PathBuf,
    pub recipients: Vec<SummaryRecipient>,
}

#[derive(Debug, Clone)]
pub struct SummaryRecipient {
    pub user_id: i64,
    pub chat_id: i64,
    pub thread_id: Option<i64>,
}

/// Parsed outcome of a `claude -p` summary run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryOutcome {
    Silent,
    Notify(String),
}

/// Parse `claude -p` stdout for a leading `[SILENT]` or `[NOTIFY]` tag line.
/// Only the first line is checked — an untagged first line (even if a later
/// line happens to carry a tag) is treated as silent, to avoid noise from a
/// model that didn't follow the summary prompt's instructions.
pub fn parse_claude_output(stdout: &str) -> SummaryOutcome {
    let mut lines = stdout.lines();
    let Some(first) = lines.next() else {
        return SummaryOutcome::Silent;
    };
    match first.trim() {
        "[SILENT]" => SummaryOutcome::Silent,
        "[NOTIFY]" => {
            let content = lines.collect::<Vec<_>>().join("\n").trim().to_string();
            if content.is_empty() {
                SummaryOutcome::Silent
            } else {
                SummaryOutcome::Notify(content)
            }
        }
        _ => SummaryOutcome::Silent,
    }
}

pub struct SystemTaskEngine<N: NotifySink> {
    claude_command: String,
    summary_template: String,
    locale: String,
    timezone: String,
    admin_user_ids: Vec<i64>,
    notify: N,
    semaphore: Semaphore,
}

impl<N: NotifySink> SystemTaskEngine<N> {
    pub fn new(
        claude_command: String,
        summary_template: String,
        locale: String,
        timezone: String,
        admin_user_ids: Vec<i64>,
        notify: N,
    ) -> Self {
        Self {
            claude_command,
            summary_template,
            locale,
            timezone,
            admin_user_ids,
            notify,
            semaphore: Semaphore::new(MAX_CONCURRENT_SUMMARIES),
        }
    }

    /// Whether `target`'s workspace is due for a summary right now: the
    /// schedule has elapsed, the JSONL has grown since last time, and it's
    /// been idle long enough that Claude Code isn't mid-write.
    pub fn is_due(&self, store: &CronStore, target: &SummaryTarget) -> Result<bool> {
        let state = store.get_summary_state()?;
        let now = Utc::now();

        if let Some(next) = state.next_summary_run {
            if now < next {
                return Ok(false);
            }
        }
        if !has_new_content(&state, &target.jsonl_path) {
            return Ok(false);
        }
        Ok(is_idle(&target.jsonl_path, now))
    }

    /// Run the summary for `target` if due, gated by the concurrency
    /// semaphore. Returns `true` if a summary actually ran.
    #[instrument(skip(self, store, target), fields(workspace = %target.workspace_name))]
    pub async fn run_if_due(&self, store: &mut CronStore, target: &SummaryTarget) -> Result<bool> {
        if !self.is_due(store, target)? {
            return Ok(false);
        }
        let _permit = self.semaphore.acquire().await.expect("semaphore never closed");
        self.run_summary(store, target).await?;
        Ok(true)
    }

    async fn run_summary(&self, store: &mut CronStore, target: &SummaryTarget) -> Result<()> {
        let state = store.get_summary_state()?;
        let now = Utc::now();
        let today = now.format("%Y-%m-%d").to_string();
        let summary_path = target.workspace_dir.join("memory").join("summaries").join(format!("{today}.md"));
        let memory_save_bin = memory_save_bin_path();

        let last_summary_time = state
            .last_summary_time
            .map(|t| t.format("%Y-%m-%dT%H:%M:%S").to_string())
            .unwrap_or_else(|| "1970-01-01T00:00:00".to_string());

        let prompt = self
            .summary_template
            .replace("{jsonl_path}", &target.jsonl_path.display().to_string())
            .replace("{workspace_path}", &target.workspace_dir.display().to_string())
            .replace("{last_summary_time}", &last_summary_time)
            .replace("{locale}", &self.locale)
            .replace("{summary_path}", &summary_path.display().to_string())
            .replace("{today_date}", &today)
            .replace("{memory_save_bin}", &memory_save_bin.display().to_string())
            .replace("{timezone}", &self.timezone);

        info!(last_summary_time, "running workspace summary");

        match run_claude_p(&self.claude_command, &prompt, &target.workspace_dir).await {
            Ok(stdout) => {
                let mut new_state = SummaryState {
                    last_summary_time: Some(now),
                    last_summary_jsonl: Some(target.jsonl_path.display().to_string()),
                    last_summary_offset: file_size(&target.jsonl_path),
                    next_summary_run: Some(now + SUMMARY_INTERVAL),
                    consecutive_errors: 0,
                };
                store.set_summary_state(&mut new_state)?;

                if let SummaryOutcome::Notify(content) = parse_claude_output(&stdout) {
                    self.deliver(target, &content).await;
                }
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "summary run failed");
                let mut new_state = state;
                new_state.consecutive_errors += 1;
                new_state.next_summary_run = Some(now + SUMMARY_INTERVAL);
                let errors = new_state.consecutive_errors;
                store.set_summary_state(&mut new_state)?;
                self.maybe_notify_admin(target, errors, &e).await;
                Ok(())
            }
        }
    }

    async fn deliver(&self, target: &SummaryTarget, content: &str) {
        if target.recipients.is_empty() {
            warn!(workspace = %target.workspace_name, "summary ready but no delivery recipients");
            return;
        }
        for r in &target.recipients {
            self.notify.notify(r.user_id, r.chat_id, r.thread_id, content).await;
        }
    }

    async fn maybe_notify_admin(&self, target: &SummaryTarget, errors: u32, error: &str) {
        if errors < ADMIN_NOTIFY_THRESHOLD {
            return;
        }
        let msg = format!(
            "System scheduler: summary failed {errors} times for `{}`\nError: {error}",
            target.workspace_name
        );
        for admin_id in &self.admin_user_ids {
            if let Some(r) = target.recipients.iter().find(|r| r.user_id == *admin_id) {
                self.notify.notify(r.user_id, r.chat_id, r.thread_id, &msg).await;
            }
        }
    }
}

fn has_new_content(state: &SummaryState, jsonl_path: &Path) -> bool {
    let current_size = match std::fs::metadata(jsonl_path) {
        Ok(m) => m.len(),
        Err(_) => return false,
    };
    match &state.last_summary_jsonl {
        Some(last) if last != &jsonl_path.display().to_string() => true,
        _ => current_size > state.last_summary_offset,
    }
}

fn is_idle(jsonl_path: &Path, now: chrono::DateTime<Utc>) -> bool {
    let Ok(meta) = std::fs::metadata(jsonl_path) else {
        return false;
    };
    let Ok(modified) = meta.modified() else {
        return true;
    };
    let elapsed = now.signed_duration_since(chrono::DateTime::<Utc>::from(modified));
    elapsed >= IDLE_THRESHOLD
}

fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

fn memory_save_bin_path() -> PathBuf {
    std::env::var("HOME")
        .map(|home| Path::new(&home).join(".bridge/shared/bin/memory-save"))
        .unwrap_or_else(|_| PathBuf::from("memory-save"))
}

/// Spawn `claude -p` as a one-shot subprocess with `CLAUDECODE` stripped
/// from its environment (so it doesn't think it's running nested inside
/// an existing session), timing out after [`SUBPROCESS_TIMEOUT`].
async fn run_claude_p(command: &str, prompt: &str, cwd: &Path) -> std::result::Result<String, String> {
    let mut cmd = Command::new(command);
    cmd.arg("-p")
        .arg(prompt)
        .arg("--dangerously-skip-permissions")
        .arg("--output-format")
        .arg("text")
        .arg("--no-session-persistence")
        .current_dir(cwd)
        .env_remove("CLAUDECODE")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!(command, prompt_len = prompt.len(), "spawning claude -p for summary");

    let mut child = cmd.spawn().map_err(|e| format!("failed to spawn claude CLI: {e}"))?;
    let output = match tokio::time::timeout(SUBPROCESS_TIMEOUT, child.wait_with_output()).await {
        Ok(res) => res.map_err(|e| format!("claude CLI process error: {e}"))?,
        Err(_) => return Err("timeout".to_string()),
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!("claude CLI exited with {}: {stderr}", output.status));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silent_tag_parses_as_silent() {
        assert_eq!(parse_claude_output("[SILENT]\n"), SummaryOutcome::Silent);
    }

    #[test]
    fn notify_tag_captures_trailing_content() {
        let out = parse_claude_output("[NOTIFY]\nYou finished the migration today.\n");
        assert_eq!(out, SummaryOutcome::Notify("You finished the migration today.".to_string()));
    }

    #[test]
    fn notify_tag_with_no_content_is_silent() {
        assert_eq!(parse_claude_output("[NOTIFY]\n\n"), SummaryOutcome::Silent);
    }

    #[test]
    fn untagged_output_is_silent() {
        assert_eq!(parse_claude_output("I did some stuff.\n"), SummaryOutcome::Silent);
    }

    #[test]
    fn notify_tag_on_a_later_line_is_ignored() {
        let out = parse_claude_output("Let me check the transcript first.\n[NOTIFY]\nBig update!");
        assert_eq!(out, SummaryOutcome::Silent);
    }

    #[test]
    fn has_new_content_detects_growth() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.jsonl");
        std::fs::write(&path, "0123456789").unwrap();

        let state = SummaryState {
            last_summary_jsonl: Some(path.display().to_string()),
            last_summary_offset: 5,
            ..Default::default()
        };
        assert!(has_new_content(&state, &path));

        let state_caught_up = SummaryState {
            last_summary_offset: 10,
            ..state
        };
        assert!(!has_new_content(&state_caught_up, &path));
    }

    #[test]
    fn has_new_content_true_on_session_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.jsonl");
        std::fs::write(&path, "x").unwrap();

        let state = SummaryState {
            last_summary_jsonl: Some("/some/other/session.jsonl".to_string()),
            last_summary_offset: 999,
            ..Default::default()
        };
        assert!(has_new_content(&state, &path));
    }
}
