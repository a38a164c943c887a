//! Scheduler (spec.md §4.J): two cooperating engines sharing one workspace's
//! `cron_jobs` / `cron_meta` / `cron_history` tables inside `memory.db`.
//!
//! - **J1 Workspace Cron** (`engine`): user/system jobs on `At`/`Every`/
//!   `Cron` schedules, fired into a live tmux window via [`sink::JobSink`].
//! - **J2 System Tasks** (`system_tasks`): periodic workspace summaries run
//!   as one-shot `claude -p` subprocesses instead.

pub mod backoff;
pub mod db;
pub mod engine;
pub mod error;
pub mod schedule;
pub mod sink;
pub mod store;
pub mod system_tasks;
pub mod types;

pub use engine::CronEngine;
pub use error::{Result, SchedulerError};
pub use schedule::compute_next_run;
pub use sink::{JobSink, NotifySink};
pub use store::CronStore;
pub use system_tasks::{
    parse_claude_output, SummaryOutcome, SummaryRecipient, SummaryTarget, SystemTaskEngine,
    DEFAULT_SUMMARY_TEMPLATE,
};
pub use types::{format_job_message, HistoryRow, Job, JobStatus, Schedule, SummaryState, WorkspaceMeta};
