use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Defines when and how often a job should run (spec.md §4.J).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    /// Run exactly once at the given instant.
    At { at: DateTime<Utc> },

    /// Run repeatedly with a fixed interval in seconds.
    Every { every_seconds: u64 },

    /// Cron expression, evaluated in `tz` (default: the workspace's
    /// configured `cron_default_tz`, falling back to UTC).
    Cron {
        expr: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        tz: Option<String>,
    },
}

/// Lifecycle state of a job's most recent execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Ok,
    Error,
    Skipped,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Ok => "ok",
            JobStatus::Error => "error",
            JobStatus::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ok" => Ok(JobStatus::Ok),
            "error" => Ok(JobStatus::Error),
            "skipped" => Ok(JobStatus::Skipped),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Workspace destination metadata, persisted once per workspace cron store
/// (`cron_meta`), used by (J1) to `recreate_window` when a window has been
/// torn down since the job was created — binds to the same destination the
/// user originally used.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceMeta {
    pub user_id: i64,
    pub chat_id: i64,
    pub thread_id: Option<i64>,
}

/// A persisted cron job record (`cron_jobs` table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// UUID v4 string — primary key.
    pub id: String,
    pub name: String,
    pub schedule: Schedule,
    /// Message text injected into the window on fire. System jobs carry
    /// their own `[System]` prefix already; user jobs are wrapped at
    /// delivery time (see `format_user_job_message`).
    pub message: String,
    pub enabled: bool,
    /// Removed after its next successful run instead of rescheduled.
    pub delete_after_run: bool,
    /// System-managed jobs cannot be removed by a user command.
    pub system: bool,
    /// Telegram user id of the job's creator, used in the delivery prefix.
    pub creator_user_id: Option<i64>,
    pub creator_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    // --- runtime state ---
    pub next_run_at: Option<DateTime<Utc>>,
    pub running_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_status: Option<JobStatus>,
    pub last_error: Option<String>,
    pub consecutive_errors: u32,
}

/// Compose the delivery message for a fired job per spec.md §4.J.1: system
/// jobs are sent verbatim (already prefixed), user jobs get a creator
/// attribution and an `@[id]` reply hint.
pub fn format_job_message(job: &Job) -> String {
    if job.system {
        return job.message.clone();
    }
    let creator_id = job.creator_user_id.unwrap_or(0);
    let creator_name = job.creator_name.as_deref().unwrap_or("unknown");
    format!(
        "[{creator_name}|{creator_id}] [Scheduled Task] {}\n(When done, please @[{creator_id}] with the result)",
        job.message
    )
}

/// One immutable row in `cron_history`, appended after every fired job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRow {
    pub job_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: JobStatus,
    pub duration_s: f64,
    pub error: Option<String>,
}

/// J2 (System Tasks) bookkeeping, persisted as key/value rows in
/// `cron_meta` alongside the `workspace_meta` row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryState {
    pub last_summary_time: Option<DateTime<Utc>>,
    pub last_summary_jsonl: Option<String>,
    pub last_summary_offset: u64,
    pub next_summary_run: Option<DateTime<Utc>>,
    pub consecutive_errors: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_job_message_is_sent_verbatim() {
        let job = Job {
            id: "1".into(),
            name: "heartbeat".into(),
            schedule: Schedule::Every { every_seconds: 60 },
            message: "[System] heartbeat ok".into(),
            enabled: true,
            delete_after_run: false,
            system: true,
            creator_user_id: None,
            creator_name: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            next_run_at: None,
            running_at: None,
            last_run_at: None,
            last_status: None,
            last_error: None,
            consecutive_errors: 0,
        };
        assert_eq!(format_job_message(&job), "[System] heartbeat ok");
    }

    #[test]
    fn user_job_message_gets_creator_prefix_and_reply_hint() {
        let job = Job {
            id: "1".into(),
            name: "reminder".into(),
            schedule: Schedule::At { at: Utc::now() },
            message: "water the plants".into(),
            enabled: true,
            delete_after_run: true,
            system: false,
            creator_user_id: Some(42),
            creator_name: Some("alice".into()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            next_run_at: None,
            running_at: None,
            last_run_at: None,
            last_status: None,
            last_error: None,
            consecutive_errors: 0,
        };
        let msg = format_job_message(&job);
        assert!(msg.starts_with("[alice|42] [Scheduled Task] water the plants"));
        assert!(msg.contains("@[42]"));
    }
}
