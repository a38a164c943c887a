//! SQLite mirror of the on-disk memory files — `<workspace>/memory.db`.
//!
//! Sync is idempotent: walk the memory directories, content-hash each file,
//! and only re-index the ones whose hash changed since last sync. Schema
//! version is tracked via `PRAGMA user_version`; bumping the constant forces
//! a drop-and-rebuild on next connect.
//!
//! This file only owns the memory-related tables (`memories`, `file_meta`,
//! `memories_fts`, `attachment_meta`). `cron_jobs`/`cron_meta`/`cron_history`
//! live in the same `memory.db` file per spec.md §6 but are created and
//! owned by `bridge-scheduler`.

use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use rusqlite::{params, Connection};
use tracing::{debug, info, instrument};

use crate::error::Result;
use crate::frontmatter::{parse_attachment_refs, parse_tags, strip_frontmatter};
use crate::types::{AttachmentKind, AttachmentRef, MemoryRow, MemorySource, SearchResult};

const SCHEMA_VERSION: i64 = 4;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS memories (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    path        TEXT    NOT NULL,
    source      TEXT    NOT NULL,
    date        TEXT    NOT NULL,
    line_num    INTEGER NOT NULL,
    content     TEXT    NOT NULL,
    updated_at  TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS file_meta (
    path         TEXT PRIMARY KEY,
    content_hash TEXT NOT NULL,
    synced_at    TEXT NOT NULL,
    tags         TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS attachment_meta (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    memory_path TEXT    NOT NULL,
    description TEXT    NOT NULL,
    file_path   TEXT    NOT NULL,
    file_type   TEXT    NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_memories_date   ON memories(date);
CREATE INDEX IF NOT EXISTS idx_memories_source ON memories(source);
CREATE INDEX IF NOT EXISTS idx_memories_path   ON memories(path);
CREATE INDEX IF NOT EXISTS idx_attachment_path ON attachment_meta(memory_path);
";

const FTS_SCHEMA: &str = "
CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
    content, content='memories', content_rowid='id'
);
";

pub struct MemoryDb {
    workspace_dir: PathBuf,
    conn: Connection,
    fts_available: bool,
}

impl MemoryDb {
    #[instrument(skip(workspace_dir))]
    pub fn open(workspace_dir: impl Into<PathBuf>) -> Result<Self> {
        let workspace_dir = workspace_dir.into();
        let conn = Connection::open(workspace_dir.join("memory.db"))?;
        let mut db = Self { workspace_dir, conn, fts_available: true };
        db.ensure_schema()?;
        Ok(db)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        let version: i64 = self.conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
        if version < SCHEMA_VERSION {
            info!(from = version, to = SCHEMA_VERSION, "recreating memory DB schema");
            self.conn.execute_batch(
                "DROP TABLE IF EXISTS memories_fts;
                 DROP TABLE IF EXISTS attachment_meta;
                 DROP TABLE IF EXISTS memories;
                 DROP TABLE IF EXISTS file_meta;",
            )?;
            self.conn.execute_batch(SCHEMA)?;
            if self.conn.execute_batch(FTS_SCHEMA).is_err() {
                self.fts_available = false;
            }
            self.conn.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION}"))?;
        } else {
            let exists: Option<String> = self
                .conn
                .query_row("SELECT name FROM sqlite_master WHERE name = 'memories_fts'", [], |r| r.get(0))
                .ok();
            self.fts_available = exists.is_some();
        }
        Ok(())
    }

    fn file_hash(path: &Path) -> Result<String> {
        let bytes = std::fs::read(path)?;
        Ok(hex::encode(Md5::digest(&bytes)))
    }

    fn needs_sync(&self, path: &Path, rel: &str) -> Result<bool> {
        let existing: Option<String> =
            self.conn.query_row("SELECT content_hash FROM file_meta WHERE path = ?1", params![rel], |r| r.get(0)).ok();
        match existing {
            None => Ok(true),
            Some(hash) => Ok(hash != Self::file_hash(path)?),
        }
    }

    fn sync_file(&self, path: &Path, rel: &str, source: MemorySource, date: &str) -> Result<()> {
        let hash = Self::file_hash(path)?;
        let now = chrono::Utc::now().to_rfc3339();

        self.conn.execute("DELETE FROM memories WHERE path = ?1", params![rel])?;
        self.conn.execute("DELETE FROM attachment_meta WHERE memory_path = ?1", params![rel])?;

        let Ok(raw) = std::fs::read_to_string(path) else { return Ok(()) };
        let tags = parse_tags(&raw);
        let content = strip_frontmatter(&raw);

        for (i, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            self.conn.execute(
                "INSERT INTO memories (path, source, date, line_num, content, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![rel, source.as_str(), date, (i + 1) as i64, trimmed, now],
            )?;
        }

        for (description, file_path, is_image) in parse_attachment_refs(&content) {
            let kind = if is_image { "image" } else { "file" };
            self.conn.execute(
                "INSERT INTO attachment_meta (memory_path, description, file_path, file_type)
                 VALUES (?1, ?2, ?3, ?4)",
                params![rel, description, file_path, kind],
            )?;
        }

        self.conn.execute(
            "INSERT OR REPLACE INTO file_meta (path, content_hash, synced_at, tags) VALUES (?1, ?2, ?3, ?4)",
            params![rel, hash, now, serde_json::to_string(&tags).unwrap_or_default()],
        )?;
        Ok(())
    }

    /// Walk `experience/`, `daily/YYYY-MM/`, `summaries/`, re-indexing any
    /// file whose content hash changed and dropping rows for files that no
    /// longer exist. Rebuilds the FTS5 index if anything changed. Returns
    /// the number of files (re-)synced.
    #[instrument(skip(self))]
    pub fn sync(&mut self) -> Result<usize> {
        let memory_dir = self.workspace_dir.join("memory");
        let mut synced = 0usize;

        let experience_dir = memory_dir.join("experience");
        if experience_dir.is_dir() {
            for entry in walk_md_files(&experience_dir) {
                let topic = entry.file_stem().unwrap_or_default().to_string_lossy().to_string();
                let rel = format!("memory/experience/{}", entry.file_name().unwrap().to_string_lossy());
                if self.needs_sync(&entry, &rel)? {
                    self.sync_file(&entry, &rel, MemorySource::Experience, &topic)?;
                    synced += 1;
                }
            }
        }

        let daily_dir = memory_dir.join("daily");
        if daily_dir.is_dir() {
            for month_dir in sorted_subdirs(&daily_dir) {
                for entry in walk_md_files(&month_dir) {
                    let date_str = entry.file_stem().unwrap_or_default().to_string_lossy().to_string();
                    let month_name = month_dir.file_name().unwrap().to_string_lossy();
                    let rel = format!("memory/daily/{}/{}", month_name, entry.file_name().unwrap().to_string_lossy());
                    if self.needs_sync(&entry, &rel)? {
                        self.sync_file(&entry, &rel, MemorySource::Daily, &date_str)?;
                        synced += 1;
                    }
                }
            }
        }

        let summaries_dir = memory_dir.join("summaries");
        if summaries_dir.is_dir() {
            for entry in walk_md_files(&summaries_dir) {
                let date_str = entry.file_stem().unwrap_or_default().to_string_lossy().to_string();
                let rel = format!("memory/summaries/{}", entry.file_name().unwrap().to_string_lossy());
                if self.needs_sync(&entry, &rel)? {
                    self.sync_file(&entry, &rel, MemorySource::Summary, &date_str)?;
                    synced += 1;
                }
            }
        }

        synced += self.cleanup_deleted()?;

        if synced > 0 && self.fts_available {
            self.rebuild_fts()?;
        }
        if synced > 0 {
            debug!(synced, "synced memory files to SQLite");
        }
        Ok(synced)
    }

    fn rebuild_fts(&mut self) -> Result<()> {
        if self.conn.execute("INSERT INTO memories_fts(memories_fts) VALUES('rebuild')", []).is_err() {
            self.fts_available = false;
        }
        Ok(())
    }

    fn cleanup_deleted(&self) -> Result<usize> {
        let mut stmt = self.conn.prepare("SELECT path FROM file_meta")?;
        let paths: Vec<String> = stmt.query_map([], |r| r.get(0))?.filter_map(|r| r.ok()).collect();
        let mut cleaned = 0;
        for rel in paths {
            if !self.workspace_dir.join(&rel).exists() {
                self.conn.execute("DELETE FROM file_meta WHERE path = ?1", params![rel])?;
                self.conn.execute("DELETE FROM memories WHERE path = ?1", params![rel])?;
                self.conn.execute("DELETE FROM attachment_meta WHERE memory_path = ?1", params![rel])?;
                cleaned += 1;
            }
        }
        Ok(cleaned)
    }

    /// Reconstruct the on-disk relative path for a `(source, date)` pair.
    fn path_for(source: MemorySource, date: &str) -> String {
        match source {
            MemorySource::Experience => format!("memory/experience/{date}.md"),
            MemorySource::Summary => format!("memory/summaries/{date}.md"),
            MemorySource::Daily => format!("memory/daily/{}/{date}.md", &date[..7.min(date.len())]),
        }
    }

    /// FTS5 MATCH (phrase-quoted) for ASCII queries, LIKE fallback otherwise
    /// or when FTS5 isn't available. Caller is responsible for re-syncing
    /// first if freshness matters — `search`/`list_*` on `MemoryManager` do.
    pub fn search(&self, query: &str, days: Option<i64>, tag: Option<&str>) -> Result<Vec<SearchResult>> {
        let use_fts = self.fts_available && query.is_ascii();
        let rows = if use_fts {
            match self.search_fts(query, days, tag) {
                Ok(rows) => rows,
                Err(_) => self.search_like(query, days, tag)?,
            }
        } else {
            self.search_like(query, days, tag)?
        };
        Ok(rows.into_iter().map(|row| SearchResult { file: Self::path_for(row.source, &row.date), source: row.source, date: row.date, line_num: row.line_num, content: row.content }).collect())
    }

    fn search_fts(&self, query: &str, days: Option<i64>, tag: Option<&str>) -> Result<Vec<MemoryRow>> {
        let fts_query = format!("\"{}\"", query.replace('"', "\"\""));
        let mut sql = "SELECT m.source, m.date, m.line_num, m.content, m.path FROM memories_fts fts \
                        JOIN memories m ON m.id = fts.rowid"
            .to_string();
        let mut conditions = vec!["memories_fts MATCH ?1".to_string()];
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(fts_query)];

        if let Some(tag) = tag {
            sql.push_str(" JOIN file_meta fm ON fm.path = m.path");
            conditions.push(format!("fm.tags LIKE ?{}", params.len() + 1));
            params.push(Box::new(format!("%\"{tag}\"%")));
        }
        if let Some(days) = days {
            let cutoff = (chrono::Utc::now().date_naive() - chrono::Duration::days(days)).format("%Y-%m-%d").to_string();
            conditions.push("m.source IN ('daily', 'summary')".to_string());
            conditions.push(format!("m.date >= ?{}", params.len() + 1));
            params.push(Box::new(cutoff));
        }
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
        sql.push_str(" ORDER BY fts.rank");

        let mut stmt = self.conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt.query_map(param_refs.as_slice(), row_to_memory)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    fn search_like(&self, query: &str, days: Option<i64>, tag: Option<&str>) -> Result<Vec<MemoryRow>> {
        let mut sql = "SELECT m.source, m.date, m.line_num, m.content, m.path FROM memories m".to_string();
        let mut conditions = vec!["m.content LIKE ?1".to_string()];
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(format!("%{query}%"))];

        if let Some(tag) = tag {
            sql.push_str(" JOIN file_meta fm ON fm.path = m.path");
            conditions.push(format!("fm.tags LIKE ?{}", params.len() + 1));
            params.push(Box::new(format!("%\"{tag}\"%")));
        }
        if let Some(days) = days {
            let cutoff = (chrono::Utc::now().date_naive() - chrono::Duration::days(days)).format("%Y-%m-%d").to_string();
            conditions.push("m.source IN ('daily', 'summary')".to_string());
            conditions.push(format!("m.date >= ?{}", params.len() + 1));
            params.push(Box::new(cutoff));
        }
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
        sql.push_str(" ORDER BY m.date DESC, m.line_num ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt.query_map(param_refs.as_slice(), row_to_memory)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn list_dates(&self) -> Result<Vec<(String, u32)>> {
        let mut stmt = self.conn.prepare(
            "SELECT date, COUNT(*) FROM memories WHERE source = 'daily' GROUP BY date ORDER BY date DESC",
        )?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)? as u32)))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn list_tags(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT tags FROM file_meta WHERE tags != '' AND tags != '[]'")?;
        let rows: Vec<String> = stmt.query_map([], |r| r.get(0))?.filter_map(|r| r.ok()).collect();
        let mut all: std::collections::BTreeSet<String> = Default::default();
        for raw in rows {
            if let Ok(tags) = serde_json::from_str::<Vec<String>>(&raw) {
                all.extend(tags);
            }
        }
        Ok(all.into_iter().collect())
    }

    pub fn list_attachments(&self, date_str: Option<&str>) -> Result<Vec<AttachmentRef>> {
        let (sql, memory_path) = match date_str {
            Some(d) => (
                "SELECT memory_path, description, file_path, file_type FROM attachment_meta \
                 WHERE memory_path = ?1 ORDER BY id",
                Some(format!("memory/daily/{}/{}.md", &d[..7.min(d.len())], d)),
            ),
            None => (
                "SELECT memory_path, description, file_path, file_type FROM attachment_meta ORDER BY memory_path, id",
                None,
            ),
        };
        let mut stmt = self.conn.prepare(sql)?;
        let rows = match memory_path {
            Some(mp) => stmt.query_map(params![mp], row_to_attachment)?.filter_map(|r| r.ok()).collect(),
            None => stmt.query_map([], row_to_attachment)?.filter_map(|r| r.ok()).collect(),
        };
        Ok(rows)
    }

    pub fn stats(&self) -> Result<MemoryStats> {
        let total_lines: i64 = self.conn.query_row("SELECT COUNT(*) FROM memories", [], |r| r.get(0))?;
        let daily_count: i64 =
            self.conn.query_row("SELECT COUNT(DISTINCT date) FROM memories WHERE source = 'daily'", [], |r| r.get(0))?;
        let experience_count: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT date) FROM memories WHERE source = 'experience'",
            [],
            |r| r.get(0),
        )?;
        let attachment_count: i64 = self.conn.query_row("SELECT COUNT(*) FROM attachment_meta", [], |r| r.get(0))?;
        Ok(MemoryStats {
            total_lines: total_lines as u64,
            daily_count: daily_count as u64,
            experience_count: experience_count as u64,
            attachment_count: attachment_count as u64,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryStats {
    pub total_lines: u64,
    pub daily_count: u64,
    pub experience_count: u64,
    pub attachment_count: u64,
}

fn row_to_memory(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryRow> {
    let source: String = row.get(0)?;
    Ok(MemoryRow {
        source: source.parse().unwrap_or(MemorySource::Daily),
        date: row.get(1)?,
        line_num: row.get::<_, i64>(2)? as u32,
        content: row.get(3)?,
        path: row.get(4)?,
    })
}

fn row_to_attachment(row: &rusqlite::Row<'_>) -> rusqlite::Result<AttachmentRef> {
    let kind: String = row.get(3)?;
    Ok(AttachmentRef {
        memory_path: row.get(0)?,
        description: row.get(1)?,
        file_path: row.get(2)?,
        kind: if kind == "image" { AttachmentKind::Image } else { AttachmentKind::File },
    })
}

fn walk_md_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else { return Vec::new() };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map(|e| e == "md").unwrap_or(false))
        .collect();
    files.sort();
    files
}

fn sorted_subdirs(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else { return Vec::new() };
    let mut dirs: Vec<PathBuf> = entries.filter_map(|e| e.ok()).map(|e| e.path()).filter(|p| p.is_dir()).collect();
    dirs.sort();
    dirs
}
