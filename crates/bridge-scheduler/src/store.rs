use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::instrument;
use uuid::Uuid;

use crate::db::init_db;
use crate::error::{Result, SchedulerError};
use crate::schedule::compute_next_run;
use crate::types::{HistoryRow, Job, JobStatus, Schedule, SummaryState, WorkspaceMeta};

const META_KEY_WORKSPACE: &str = "workspace_meta";
const META_KEY_LAST_SUMMARY_TIME: &str = "system_scheduler.last_summary_time";
const META_KEY_LAST_SUMMARY_JSONL: &str = "system_scheduler.last_summary_jsonl";
const META_KEY_LAST_SUMMARY_OFFSET: &str = "system_scheduler.last_summary_offset";
const META_KEY_NEXT_SUMMARY_RUN: &str = "system_scheduler.next_summary_run";
const META_KEY_SUMMARY_ERRORS: &str = "system_scheduler.summary_consecutive_errors";

/// Owns one workspace's cron tables inside its shared `memory.db`
/// (`cron_jobs`, `cron_meta`, `cron_history` per spec.md §6).
pub struct CronStore {
    conn: Connection,
}

impl CronStore {
    pub fn open(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self { conn })
    }

    #[instrument(skip(self, schedule, message))]
    #[allow(clippy::too_many_arguments)]
    pub fn add_job(
        &self,
        name: &str,
        schedule: Schedule,
        message: &str,
        system: bool,
        creator_user_id: Option<i64>,
        creator_name: Option<&str>,
        default_tz: Option<&str>,
    ) -> Result<Job> {
        let now = Utc::now();
        let next_run_at = compute_next_run(&schedule, now, default_tz);
        let id = Uuid::new_v4().to_string();
        let schedule_json = serde_json::to_string(&schedule)
            .map_err(|e| SchedulerError::InvalidSchedule(e.to_string()))?;
        // An `at` job has nothing left to do after it fires once.
        let delete_after_run = matches!(schedule, Schedule::At { .. });

        self.conn.execute(
            "INSERT INTO cron_jobs
             (id, name, schedule, message, enabled, delete_after_run, system,
              creator_user_id, creator_name, created_at, updated_at, next_run_at)
             VALUES (?1,?2,?3,?4,1,?5,?6,?7,?8,?9,?9,?10)",
            params![
                id,
                name,
                schedule_json,
                message,
                delete_after_run as i64,
                system as i64,
                creator_user_id,
                creator_name,
                now.to_rfc3339(),
                next_run_at.map(|d| d.to_rfc3339()),
            ],
        )?;

        Ok(Job {
            id,
            name: name.to_string(),
            schedule,
            message: message.to_string(),
            enabled: true,
            delete_after_run,
            system,
            creator_user_id,
            creator_name: creator_name.map(|s| s.to_string()),
            created_at: now,
            updated_at: now,
            next_run_at,
            running_at: None,
            last_run_at: None,
            last_status: None,
            last_error: None,
            consecutive_errors: 0,
        })
    }

    /// Remove a job. System-managed jobs reject removal per spec.md's
    /// "cannot be removed by user" rule.
    pub fn remove_job(&self, id: &str) -> Result<()> {
        let system: Option<i64> = self
            .conn
            .query_row("SELECT system FROM cron_jobs WHERE id = ?1", [id], |r| r.get(0))
            .optional()?;
        match system {
            None => Err(SchedulerError::JobNotFound { id: id.to_string() }),
            Some(1) => Err(SchedulerError::SystemJobProtected { id: id.to_string() }),
            Some(_) => {
                self.conn.execute("DELETE FROM cron_jobs WHERE id = ?1", [id])?;
                Ok(())
            }
        }
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let n = self.conn.execute(
            "UPDATE cron_jobs SET enabled = ?1 WHERE id = ?2",
            params![enabled as i64, id],
        )?;
        if n == 0 {
            return Err(SchedulerError::JobNotFound { id: id.to_string() });
        }
        Ok(())
    }

    pub fn list_jobs(&self) -> Result<Vec<Job>> {
        let mut stmt = self.conn.prepare(&format!("{SELECT_JOB} ORDER BY created_at"))?;
        let jobs = stmt
            .query_map([], row_to_job)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(jobs)
    }

    /// Jobs that are enabled, not currently running, and due (`next_run_at
    /// <= now`). Backoff/stuck handling is the caller's (`CronEngine`)
    /// responsibility since it needs to mutate state per job anyway.
    pub fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Job>> {
        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_JOB} WHERE enabled = 1 AND next_run_at IS NOT NULL AND next_run_at <= ?1"
        ))?;
        let jobs = stmt
            .query_map([now.to_rfc3339()], row_to_job)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(jobs)
    }

    /// All enabled jobs with a `running_at` set (used to detect stuck jobs).
    pub fn list_running(&self) -> Result<Vec<Job>> {
        let mut stmt = self.conn.prepare(&format!("{SELECT_JOB} WHERE running_at IS NOT NULL"))?;
        let jobs = stmt
            .query_map([], row_to_job)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(jobs)
    }

    pub fn mark_running(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "UPDATE cron_jobs SET running_at = ?1 WHERE id = ?2",
            params![at.to_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Clear a stuck job: drop `running_at`, record the stuck error, bump
    /// `consecutive_errors`.
    pub fn mark_stuck_failed(&self, id: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE cron_jobs SET running_at = NULL, last_status = 'error',
                last_error = 'stuck (timeout)', consecutive_errors = consecutive_errors + 1
             WHERE id = ?1",
            [id],
        )?;
        Ok(())
    }

    /// Finalize a job run: clear `running_at`, record status/error, and
    /// either reschedule (`next_run_at`) or disable/delete it.
    pub fn complete_run(
        &self,
        id: &str,
        finished_at: DateTime<Utc>,
        status: JobStatus,
        error: Option<&str>,
        next_run_at: Option<DateTime<Utc>>,
        delete_after_run: bool,
    ) -> Result<()> {
        if next_run_at.is_none() && delete_after_run {
            self.conn.execute("DELETE FROM cron_jobs WHERE id = ?1", [id])?;
            return Ok(());
        }
        let consecutive_errors_expr = if status == JobStatus::Ok {
            "0"
        } else {
            "consecutive_errors + 1"
        };
        self.conn.execute(
            &format!(
                "UPDATE cron_jobs SET running_at = NULL, last_run_at = ?1, last_status = ?2,
                    last_error = ?3, next_run_at = ?4, enabled = ?5,
                    consecutive_errors = {consecutive_errors_expr}, updated_at = ?1
                 WHERE id = ?6"
            ),
            params![
                finished_at.to_rfc3339(),
                status.to_string(),
                error,
                next_run_at.map(|d| d.to_rfc3339()),
                next_run_at.is_some() as i64,
                id,
            ],
        )?;
        Ok(())
    }

    pub fn append_history(&self, row: &HistoryRow) -> Result<()> {
        self.conn.execute(
            "INSERT INTO cron_history (job_id, started_at, finished_at, status, duration_s, error)
             VALUES (?1,?2,?3,?4,?5,?6)",
            params![
                row.job_id,
                row.started_at.to_rfc3339(),
                row.finished_at.to_rfc3339(),
                row.status.to_string(),
                row.duration_s,
                row.error,
            ],
        )?;
        Ok(())
    }

    pub fn list_history(&self, job_id: &str, limit: u32) -> Result<Vec<HistoryRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT job_id, started_at, finished_at, status, duration_s, error
             FROM cron_history WHERE job_id = ?1 ORDER BY started_at DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![job_id, limit], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })?
            .filter_map(|r| r.ok())
            .filter_map(|(job_id, started_at, finished_at, status, duration_s, error)| {
                Some(HistoryRow {
                    job_id,
                    started_at: DateTime::parse_from_rfc3339(&started_at).ok()?.with_timezone(&Utc),
                    finished_at: DateTime::parse_from_rfc3339(&finished_at).ok()?.with_timezone(&Utc),
                    status: status.parse().ok()?,
                    duration_s,
                    error,
                })
            })
            .collect();
        Ok(rows)
    }

    /// Evict history rows older than `keep_days` (no spec-named retention
    /// limit; bounded housekeeping so the table doesn't grow unbounded).
    pub fn cleanup_history(&self, keep_days: i64) -> Result<usize> {
        let cutoff = (Utc::now() - chrono::Duration::days(keep_days)).to_rfc3339();
        let n = self
            .conn
            .execute("DELETE FROM cron_history WHERE started_at < ?1", [cutoff])?;
        Ok(n)
    }

    pub fn get_workspace_meta(&self) -> Result<WorkspaceMeta> {
        match self.get_meta(META_KEY_WORKSPACE)? {
            Some(json) => Ok(serde_json::from_str(&json).unwrap_or_default()),
            None => Ok(WorkspaceMeta::default()),
        }
    }

    pub fn set_workspace_meta(&self, meta: &WorkspaceMeta) -> Result<()> {
        let json = serde_json::to_string(meta).expect("WorkspaceMeta always serializes");
        self.set_meta(META_KEY_WORKSPACE, &json)
    }

    pub fn get_summary_state(&self) -> Result<SummaryState> {
        Ok(SummaryState {
            last_summary_time: self
                .get_meta(META_KEY_LAST_SUMMARY_TIME)?
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|d| d.with_timezone(&Utc)),
            last_summary_jsonl: self.get_meta(META_KEY_LAST_SUMMARY_JSONL)?,
            last_summary_offset: self
                .get_meta(META_KEY_LAST_SUMMARY_OFFSET)?
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            next_summary_run: self
                .get_meta(META_KEY_NEXT_SUMMARY_RUN)?
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|d| d.with_timezone(&Utc)),
            consecutive_errors: self
                .get_meta(META_KEY_SUMMARY_ERRORS)?
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
        })
    }

    /// Persist the whole summary state in one transaction, per spec.md
    /// §4.J.2 step 4 ("In one transaction update ...").
    pub fn set_summary_state(&mut self, state: &SummaryState) -> Result<()> {
        let tx = self.conn.transaction()?;
        if let Some(t) = state.last_summary_time {
            tx.execute(
                "INSERT OR REPLACE INTO cron_meta (key, value) VALUES (?1, ?2)",
                params![META_KEY_LAST_SUMMARY_TIME, t.to_rfc3339()],
            )?;
        }
        if let Some(ref jsonl) = state.last_summary_jsonl {
            tx.execute(
                "INSERT OR REPLACE INTO cron_meta (key, value) VALUES (?1, ?2)",
                params![META_KEY_LAST_SUMMARY_JSONL, jsonl],
            )?;
        }
        tx.execute(
            "INSERT OR REPLACE INTO cron_meta (key, value) VALUES (?1, ?2)",
            params![META_KEY_LAST_SUMMARY_OFFSET, state.last_summary_offset.to_string()],
        )?;
        if let Some(next) = state.next_summary_run {
            tx.execute(
                "INSERT OR REPLACE INTO cron_meta (key, value) VALUES (?1, ?2)",
                params![META_KEY_NEXT_SUMMARY_RUN, next.to_rfc3339()],
            )?;
        }
        tx.execute(
            "INSERT OR REPLACE INTO cron_meta (key, value) VALUES (?1, ?2)",
            params![META_KEY_SUMMARY_ERRORS, state.consecutive_errors.to_string()],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn get_meta(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row("SELECT value FROM cron_meta WHERE key = ?1", [key], |r| r.get(0))
            .optional()?)
    }

    fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO cron_meta (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }
}

const SELECT_JOB: &str = "SELECT id, name, schedule, message, enabled, delete_after_run, system,
        creator_user_id, creator_name, created_at, updated_at, next_run_at, running_at,
        last_run_at, last_status, last_error, consecutive_errors
    FROM cron_jobs";

fn parse_dt(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|d| d.with_timezone(&Utc))
}

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<Job> {
    let schedule_json: String = row.get(2)?;
    let schedule: Schedule = serde_json::from_str(&schedule_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e)))?;
    let last_status: Option<String> = row.get(14)?;
    let created_at: String = row.get(9)?;
    let updated_at: String = row.get(10)?;
    let next_run_at: Option<String> = row.get(11)?;
    let running_at: Option<String> = row.get(12)?;
    let last_run_at: Option<String> = row.get(13)?;

    Ok(Job {
        id: row.get(0)?,
        name: row.get(1)?,
        schedule,
        message: row.get(3)?,
        enabled: row.get::<_, i64>(4)? != 0,
        delete_after_run: row.get::<_, i64>(5)? != 0,
        system: row.get::<_, i64>(6)? != 0,
        creator_user_id: row.get(7)?,
        creator_name: row.get(8)?,
        created_at: parse_dt(&created_at).unwrap_or_else(Utc::now),
        updated_at: parse_dt(&updated_at).unwrap_or_else(Utc::now),
        next_run_at: next_run_at.and_then(|s| parse_dt(&s)),
        running_at: running_at.and_then(|s| parse_dt(&s)),
        last_run_at: last_run_at.and_then(|s| parse_dt(&s)),
        last_status: last_status.and_then(|s| s.parse().ok()),
        last_error: row.get(15)?,
        consecutive_errors: row.get::<_, i64>(16)? as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store() -> CronStore {
        let conn = Connection::open_in_memory().unwrap();
        CronStore::open(conn).unwrap()
    }

    #[test]
    fn add_and_list_job_round_trips() {
        let store = open_store();
        store
            .add_job(
                "reminder",
                Schedule::Every { every_seconds: 3600 },
                "check in",
                false,
                Some(7),
                Some("bob"),
                None,
            )
            .unwrap();

        let jobs = store.list_jobs().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].name, "reminder");
        assert!(jobs[0].next_run_at.is_some());
    }

    #[test]
    fn at_jobs_default_delete_after_run() {
        let store = open_store();
        let job = store
            .add_job(
                "one-shot",
                Schedule::At { at: Utc::now() + chrono::Duration::hours(1) },
                "fire once",
                false,
                None,
                None,
                None,
            )
            .unwrap();
        assert!(job.delete_after_run);
    }

    #[test]
    fn system_jobs_cannot_be_removed() {
        let store = open_store();
        let job = store
            .add_job(
                "heartbeat",
                Schedule::Every { every_seconds: 60 },
                "[System] ok",
                true,
                None,
                None,
                None,
            )
            .unwrap();
        let err = store.remove_job(&job.id).unwrap_err();
        assert!(matches!(err, SchedulerError::SystemJobProtected { .. }));
    }

    #[test]
    fn removing_unknown_job_errors() {
        let store = open_store();
        let err = store.remove_job("nope").unwrap_err();
        assert!(matches!(err, SchedulerError::JobNotFound { .. }));
    }

    #[test]
    fn complete_run_without_next_run_and_delete_after_run_removes_job() {
        let store = open_store();
        let job = store
            .add_job("once", Schedule::At { at: Utc::now() }, "x", false, None, None, None)
            .unwrap();
        store
            .complete_run(&job.id, Utc::now(), JobStatus::Ok, None, None, true)
            .unwrap();
        assert!(store.list_jobs().unwrap().is_empty());
    }

    #[test]
    fn complete_run_with_error_increments_consecutive_errors() {
        let store = open_store();
        let job = store
            .add_job(
                "recurring",
                Schedule::Every { every_seconds: 60 },
                "x",
                false,
                None,
                None,
                None,
            )
            .unwrap();
        let next = Utc::now() + chrono::Duration::seconds(60);
        store
            .complete_run(&job.id, Utc::now(), JobStatus::Error, Some("boom"), Some(next), false)
            .unwrap();
        let reloaded = &store.list_jobs().unwrap()[0];
        assert_eq!(reloaded.consecutive_errors, 1);
        assert_eq!(reloaded.last_error.as_deref(), Some("boom"));
    }

    #[test]
    fn workspace_meta_round_trips() {
        let store = open_store();
        let meta = WorkspaceMeta { user_id: 1, chat_id: 2, thread_id: Some(3) };
        store.set_workspace_meta(&meta).unwrap();
        assert_eq!(store.get_workspace_meta().unwrap(), meta);
    }

    #[test]
    fn summary_state_round_trips() {
        let mut store = open_store();
        let state = SummaryState {
            last_summary_time: Some(Utc::now()),
            last_summary_jsonl: Some("/tmp/x.jsonl".to_string()),
            last_summary_offset: 1234,
            next_summary_run: Some(Utc::now() + chrono::Duration::hours(1)),
            consecutive_errors: 2,
        };
        store.set_summary_state(&state).unwrap();
        let reloaded = store.get_summary_state().unwrap();
        assert_eq!(reloaded.last_summary_offset, 1234);
        assert_eq!(reloaded.consecutive_errors, 2);
        assert_eq!(reloaded.last_summary_jsonl, state.last_summary_jsonl);
    }

    #[test]
    fn mark_stuck_failed_clears_running_and_bumps_errors() {
        let store = open_store();
        let job = store
            .add_job("stuck", Schedule::Every { every_seconds: 60 }, "x", false, None, None, None)
            .unwrap();
        store.mark_running(&job.id, Utc::now()).unwrap();
        store.mark_stuck_failed(&job.id).unwrap();
        let reloaded = &store.list_jobs().unwrap()[0];
        assert!(reloaded.running_at.is_none());
        assert_eq!(reloaded.consecutive_errors, 1);
        assert_eq!(reloaded.last_error.as_deref(), Some("stuck (timeout)"));
    }
}
