//! High-level memory lifecycle operations: the file-writing half
//! (`daily`/experience/attachments) plus the SQLite-mirror half (`db`),
//! with search results deduped via `dedup::dedup_results`.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing::instrument;

use crate::daily;
use crate::db::{MemoryDb, MemoryStats};
use crate::dedup::dedup_results;
use crate::error::Result;
use crate::types::{AttachmentRef, DailySummary, SearchResult};

/// Owns both the on-disk memory tree and its SQLite mirror for one workspace.
pub struct MemoryManager {
    workspace_dir: PathBuf,
    db: MemoryDb,
}

impl MemoryManager {
    pub fn open(workspace_dir: impl Into<PathBuf>) -> Result<Self> {
        let workspace_dir = workspace_dir.into();
        let db = MemoryDb::open(&workspace_dir)?;
        Ok(Self { workspace_dir, db })
    }

    /// Force a re-sync of the SQLite mirror. Read operations below call
    /// this themselves; exposed for callers (e.g. a periodic scheduler job)
    /// that want to sync eagerly without also running a query.
    pub fn sync(&mut self) -> Result<usize> {
        self.db.sync()
    }

    pub fn append_daily_line(&mut self, today: NaiveDate, line: &str) -> Result<()> {
        daily::append_to_daily(&self.workspace_dir, today, line)
    }

    pub fn append_experience_line(&mut self, topic: &str, today: NaiveDate, line: &str) -> Result<()> {
        daily::append_to_experience(&self.workspace_dir, topic, today, line)
    }

    pub fn get_daily(&self, date_str: &str) -> Result<Option<String>> {
        daily::get_daily(&self.workspace_dir, date_str)
    }

    pub fn delete_daily(&mut self, date_str: &str) -> Result<bool> {
        self.cleanup_attachments_for_date(date_str)?;
        self.cleanup_summaries_for_date(date_str)?;
        daily::delete_daily(&self.workspace_dir, date_str)
    }

    /// Delete all daily logs and their attachments; preserves experience/
    /// topic files (long-term memory survives a history wipe).
    #[instrument(skip(self))]
    pub fn delete_all_daily(&mut self) -> Result<usize> {
        let daily_dir = self.workspace_dir.join("memory").join("daily");
        let mut count = 0;
        if daily_dir.is_dir() {
            for entry in std::fs::read_dir(&daily_dir)? {
                let month_dir = entry?.path();
                if !month_dir.is_dir() {
                    continue;
                }
                for f in std::fs::read_dir(&month_dir)? {
                    let f = f?.path();
                    if f.extension().map(|e| e == "md").unwrap_or(false) && std::fs::remove_file(&f).is_ok() {
                        count += 1;
                    }
                }
                let _ = std::fs::remove_dir(&month_dir);
            }
        }

        let attachments_dir = self.workspace_dir.join("memory").join("attachments");
        if attachments_dir.is_dir() {
            for entry in std::fs::read_dir(&attachments_dir)? {
                let d = entry?.path();
                if d.is_dir() {
                    let _ = std::fs::remove_dir_all(&d);
                }
            }
        }

        let summaries_dir = self.workspace_dir.join("memory").join("summaries");
        if summaries_dir.is_dir() {
            for entry in std::fs::read_dir(&summaries_dir)? {
                let f = entry?.path();
                if f.extension().map(|e| e == "md").unwrap_or(false) {
                    let _ = std::fs::remove_file(&f);
                }
            }
        }

        Ok(count)
    }

    pub fn save_attachment(
        &mut self,
        source_path: &Path,
        description: &str,
        user_name: Option<&str>,
        today: NaiveDate,
    ) -> Result<Option<String>> {
        daily::save_attachment(&self.workspace_dir, source_path, description, user_name, today)
    }

    /// List recent daily logs (newest first), within the last `days` days.
    pub fn list_daily(&self, days: i64, today: NaiveDate) -> Result<Vec<DailySummary>> {
        let daily_dir = self.workspace_dir.join("memory").join("daily");
        if !daily_dir.is_dir() {
            return Ok(Vec::new());
        }
        let cutoff = today - chrono::Duration::days(days);
        let mut results = Vec::new();

        for month_entry in std::fs::read_dir(&daily_dir)? {
            let month_dir = month_entry?.path();
            if !month_dir.is_dir() {
                continue;
            }
            for f in std::fs::read_dir(&month_dir)? {
                let f = f?.path();
                if f.extension().map(|e| e != "md").unwrap_or(true) {
                    continue;
                }
                let Some(date_str) = f.file_stem().map(|s| s.to_string_lossy().to_string()) else { continue };
                let Ok(file_date) = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d") else { continue };
                if file_date < cutoff {
                    continue;
                }
                let Ok(raw) = std::fs::read_to_string(&f) else { continue };
                let body = crate::frontmatter::strip_frontmatter(raw.trim());
                let mut first_line = body.lines().next().unwrap_or("").to_string();
                if first_line.len() > 60 {
                    first_line.truncate(57);
                    first_line.push_str("...");
                }
                let size_bytes = f.metadata().map(|m| m.len()).unwrap_or(0);
                results.push(DailySummary { date: date_str, size_bytes, preview: first_line });
            }
        }

        results.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(results)
    }

    pub fn list_experience_files(&self) -> Result<Vec<String>> {
        let dir = self.workspace_dir.join("memory").join("experience");
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut topics: Vec<String> = std::fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|e| e == "md").unwrap_or(false))
            .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().to_string()))
            .collect();
        topics.sort();
        Ok(topics)
    }

    /// Full-text search with optional `tag`/`days` filters, syncing the
    /// mirror first and deduping near-identical results across sources.
    #[instrument(skip(self, query))]
    pub fn search(&mut self, query: &str, days: Option<i64>, tag: Option<&str>) -> Result<Vec<SearchResult>> {
        self.db.sync()?;
        let results = self.db.search(query, days, tag)?;
        Ok(dedup_results(results))
    }

    pub fn list_dates(&mut self, _days: i64) -> Result<Vec<(String, u32)>> {
        self.db.sync()?;
        self.db.list_dates()
    }

    pub fn list_tags(&mut self) -> Result<Vec<String>> {
        self.db.sync()?;
        self.db.list_tags()
    }

    pub fn list_attachments(&mut self, date_str: Option<&str>) -> Result<Vec<AttachmentRef>> {
        self.db.sync()?;
        self.db.list_attachments(date_str)
    }

    pub fn stats(&mut self) -> Result<MemoryStats> {
        self.db.sync()?;
        self.db.stats()
    }

    fn cleanup_attachments_for_date(&self, date_str: &str) -> Result<usize> {
        let dir = self.workspace_dir.join("memory").join("attachments").join(date_str);
        if !dir.is_dir() {
            return Ok(0);
        }
        let count = std::fs::read_dir(&dir)?.filter_map(|e| e.ok()).filter(|e| e.path().is_file()).count();
        std::fs::remove_dir_all(&dir)?;
        Ok(count)
    }

    fn cleanup_summaries_for_date(&self, date_str: &str) -> Result<usize> {
        let dir = self.workspace_dir.join("memory").join("summaries");
        if !dir.is_dir() {
            return Ok(0);
        }
        let prefix = format!("{date_str}_");
        let mut count = 0;
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
            if name.starts_with(&prefix) && std::fs::remove_file(&path).is_ok() {
                count += 1;
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn append_then_search_finds_daily_line() {
        let dir = tempdir().unwrap();
        let mut mgr = MemoryManager::open(dir.path()).unwrap();
        mgr.append_daily_line(date("2026-02-15"), "- discussed the roadmap with the team").unwrap();

        let results = mgr.search("roadmap", None, None).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].file, "memory/daily/2026-02/2026-02-15.md");
    }

    #[test]
    fn list_daily_respects_days_cutoff() {
        let dir = tempdir().unwrap();
        let mut mgr = MemoryManager::open(dir.path()).unwrap();
        mgr.append_daily_line(date("2026-01-01"), "- old entry").unwrap();
        mgr.append_daily_line(date("2026-02-14"), "- recent entry").unwrap();

        let recent = mgr.list_daily(7, date("2026-02-15")).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].date, "2026-02-14");
    }

    #[test]
    fn delete_daily_also_clears_its_attachments_and_summaries() {
        let dir = tempdir().unwrap();
        let mut mgr = MemoryManager::open(dir.path()).unwrap();
        mgr.append_daily_line(date("2026-02-15"), "- x").unwrap();
        std::fs::create_dir_all(dir.path().join("memory/attachments/2026-02-15")).unwrap();
        std::fs::write(dir.path().join("memory/attachments/2026-02-15/a.png"), b"x").unwrap();
        std::fs::create_dir_all(dir.path().join("memory/summaries")).unwrap();
        std::fs::write(dir.path().join("memory/summaries/2026-02-15_1400.md"), "summary").unwrap();

        assert!(mgr.delete_daily("2026-02-15").unwrap());
        assert!(!dir.path().join("memory/attachments/2026-02-15").exists());
        assert!(!dir.path().join("memory/summaries/2026-02-15_1400.md").exists());
    }

    #[test]
    fn delete_all_daily_preserves_experience_files() {
        let dir = tempdir().unwrap();
        let mut mgr = MemoryManager::open(dir.path()).unwrap();
        mgr.append_daily_line(date("2026-02-15"), "- x").unwrap();
        mgr.append_experience_line("user-preferences", date("2026-02-15"), "- likes dark mode").unwrap();

        let deleted = mgr.delete_all_daily().unwrap();
        assert_eq!(deleted, 1);
        assert!(mgr.list_experience_files().unwrap().contains(&"user-preferences".to_string()));
    }
}
