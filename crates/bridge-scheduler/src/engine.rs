//! Workspace Cron (J1, spec.md §4.J.1): fires due jobs into a workspace's
//! tmux window on a fixed cadence.
//!
//! Decoupled from window management and delivery via [`JobSink`] so this
//! crate never depends on `bridge-sessions`/`bridge-channels` — the caller
//! drives [`CronEngine::tick`] on its own timer, the same shape as
//! `bridge-terminal`'s `StatusPoller`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{instrument, warn};

use crate::backoff::{backoff_delay, STUCK_TIMEOUT};
use crate::error::Result;
use crate::schedule::compute_next_run;
use crate::sink::JobSink;
use crate::store::CronStore;
use crate::types::{format_job_message, HistoryRow, Job, JobStatus, WorkspaceMeta};

/// Default tick cadence (spec.md: ~60s).
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(60);

pub struct CronEngine<S: JobSink> {
    store: CronStore,
    sink: S,
    meta: WorkspaceMeta,
    default_tz: Option<String>,
}

impl<S: JobSink> CronEngine<S> {
    pub fn new(store: CronStore, sink: S, meta: WorkspaceMeta, default_tz: Option<String>) -> Self {
        Self { store, sink, meta, default_tz }
    }

    /// Clear any job left `running_at` by a previous process. Call once
    /// before the first `tick`.
    #[instrument(skip(self))]
    pub async fn recover_on_startup(&self) -> Result<()> {
        self.clear_stuck(Utc::now())
    }

    /// Run one tick: clear stuck jobs, then fire everything due.
    #[instrument(skip(self))]
    pub async fn tick(&mut self) -> Result<()> {
        let now = Utc::now();
        self.clear_stuck(now)?;

        for job in self.store.list_due(now)? {
            if let Err(e) = self.fire(job).await {
                warn!(error = %e, "failed to deliver cron job");
            }
        }
        Ok(())
    }

    fn clear_stuck(&self, now: DateTime<Utc>) -> Result<()> {
        for job in self.store.list_running()? {
            if let Some(running_at) = job.running_at {
                if now - running_at >= STUCK_TIMEOUT {
                    warn!(job_id = %job.id, "job exceeded stuck timeout, forcing failure");
                    self.store.mark_stuck_failed(&job.id)?;
                }
            }
        }
        Ok(())
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, job_name = %job.name))]
    async fn fire(&mut self, job: Job) -> Result<()> {
        if self.in_backoff(&job) {
            return Ok(());
        }

        let started_at = Utc::now();
        self.store.mark_running(&job.id, started_at)?;

        let outcome = self.deliver(&job).await;
        let (status, error) = match &outcome {
            Ok(()) => (JobStatus::Ok, None),
            Err(e) => (JobStatus::Error, Some(e.clone())),
        };

        let finished_at = Utc::now();
        let next_run_at = compute_next_run(&job.schedule, finished_at, self.default_tz.as_deref());
        let will_delete = job.delete_after_run && next_run_at.is_none();

        self.store.complete_run(
            &job.id,
            finished_at,
            status.clone(),
            error.as_deref(),
            next_run_at,
            will_delete,
        )?;
        self.store.append_history(&HistoryRow {
            job_id: job.id.clone(),
            started_at,
            finished_at,
            status,
            duration_s: (finished_at - started_at).num_milliseconds() as f64 / 1000.0,
            error,
        })?;

        Ok(())
    }

    /// A job that failed recently waits out its backoff delay before the
    /// next attempt, even if it was rescheduled for right away.
    fn in_backoff(&self, job: &Job) -> bool {
        if job.consecutive_errors == 0 {
            return false;
        }
        match job.last_run_at {
            Some(last_run_at) => Utc::now() < last_run_at + backoff_delay(job.consecutive_errors),
            None => false,
        }
    }

    async fn deliver(&self, job: &Job) -> std::result::Result<(), String> {
        let window_id = match self.sink.resolve_window(&self.meta).await {
            Some(w) => w,
            None => self.sink.recreate_window(&self.meta).await?,
        };
        let message = format_job_message(job);
        self.sink.send_keys(&window_id, &message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Schedule;
    use async_trait::async_trait;
    use rusqlite::Connection;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeSink {
        sent: Mutex<Vec<(String, String)>>,
        fail_delivery: bool,
        window: Option<String>,
    }

    #[async_trait]
    impl JobSink for FakeSink {
        async fn resolve_window(&self, _meta: &WorkspaceMeta) -> Option<String> {
            self.window.clone()
        }
        async fn recreate_window(&self, _meta: &WorkspaceMeta) -> std::result::Result<String, String> {
            Ok("recreated-window".to_string())
        }
        async fn send_keys(&self, window_id: &str, text: &str) -> std::result::Result<(), String> {
            if self.fail_delivery {
                return Err("delivery failed".to_string());
            }
            self.sent.lock().unwrap().push((window_id.to_string(), text.to_string()));
            Ok(())
        }
    }

    fn store() -> CronStore {
        CronStore::open(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn due_job_fires_and_is_removed_after_run() {
        let store = store();
        store
            .add_job(
                "heartbeat",
                Schedule::At { at: Utc::now() - chrono::Duration::seconds(1) },
                "hello",
                true,
                None,
                None,
                None,
            )
            .unwrap();

        let sink = FakeSink { window: Some("w1".to_string()), ..Default::default() };
        let mut engine = CronEngine::new(store, sink, WorkspaceMeta::default(), None);
        engine.tick().await.unwrap();

        assert_eq!(engine.sink.sent.lock().unwrap().len(), 1);
        assert!(engine.store.list_jobs().unwrap().is_empty(), "at-job with no next run should be deleted");
    }

    #[tokio::test]
    async fn missing_window_is_recreated() {
        let store = store();
        store
            .add_job("reminder", Schedule::At { at: Utc::now() }, "hi", false, Some(1), Some("a"), None)
            .unwrap();

        let sink = FakeSink { window: None, ..Default::default() };
        let mut engine = CronEngine::new(store, sink, WorkspaceMeta::default(), None);
        engine.tick().await.unwrap();

        let sent = engine.sink.sent.lock().unwrap();
        assert_eq!(sent[0].0, "recreated-window");
    }

    #[tokio::test]
    async fn delivery_failure_records_error_and_increments_count() {
        let store = store();
        let job = store
            .add_job("recurring", Schedule::Every { every_seconds: 60 }, "x", false, None, None, None)
            .unwrap();

        let sink = FakeSink { window: Some("w1".to_string()), fail_delivery: true, ..Default::default() };
        let mut engine = CronEngine::new(store, sink, WorkspaceMeta::default(), None);
        // `tick` wouldn't find this job due for another 60s; fire it directly.
        engine.fire(job).await.unwrap();

        let reloaded = &engine.store.list_jobs().unwrap()[0];
        assert_eq!(reloaded.consecutive_errors, 1);
        assert_eq!(reloaded.last_status, Some(JobStatus::Error));
    }

    #[tokio::test]
    async fn job_in_backoff_window_is_skipped() {
        let store = store();
        let job = store
            .add_job("recurring", Schedule::Every { every_seconds: 60 }, "x", false, None, None, None)
            .unwrap();
        // Simulate a prior failure a moment ago, well inside the 30s backoff.
        store
            .complete_run(
                &job.id,
                Utc::now(),
                JobStatus::Error,
                Some("boom"),
                Some(Utc::now() - chrono::Duration::seconds(1)),
                false,
            )
            .unwrap();

        let sink = FakeSink { window: Some("w1".to_string()), ..Default::default() };
        let mut engine = CronEngine::new(store, sink, WorkspaceMeta::default(), None);
        engine.tick().await.unwrap();

        assert!(engine.sink.sent.lock().unwrap().is_empty());
    }
}
