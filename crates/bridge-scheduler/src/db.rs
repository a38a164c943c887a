use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduler's tables in a workspace's shared `memory.db`
/// (spec.md §6): `cron_jobs`, `cron_meta` (key/value, also used for the J2
/// summary bookkeeping), `cron_history`. Idempotent and independent of
/// `bridge-memory`'s own `PRAGMA user_version` migration — these tables
/// never need a destructive rebuild, so a plain `IF NOT EXISTS` is enough.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS cron_jobs (
            id                  TEXT    NOT NULL PRIMARY KEY,
            name                TEXT    NOT NULL,
            schedule            TEXT    NOT NULL,
            message             TEXT    NOT NULL,
            enabled             INTEGER NOT NULL DEFAULT 1,
            delete_after_run    INTEGER NOT NULL DEFAULT 0,
            system              INTEGER NOT NULL DEFAULT 0,
            creator_user_id     INTEGER,
            creator_name        TEXT,
            created_at          TEXT    NOT NULL,
            updated_at          TEXT    NOT NULL,
            next_run_at         TEXT,
            running_at          TEXT,
            last_run_at         TEXT,
            last_status         TEXT,
            last_error          TEXT,
            consecutive_errors  INTEGER NOT NULL DEFAULT 0
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_cron_jobs_next_run ON cron_jobs (next_run_at);

        CREATE TABLE IF NOT EXISTS cron_meta (
            key   TEXT NOT NULL PRIMARY KEY,
            value TEXT NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS cron_history (
            job_id       TEXT    NOT NULL,
            started_at   TEXT    NOT NULL,
            finished_at  TEXT    NOT NULL,
            status       TEXT    NOT NULL,
            duration_s   REAL    NOT NULL,
            error        TEXT
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_cron_history_job_id ON cron_history (job_id, started_at);
        ",
    )?;
    Ok(())
}
