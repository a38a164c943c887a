//! Workspace Assembler (spec.md §4.L) — deterministic composition of one
//! `CLAUDE.md` from fixed sections: shared persona, per-user profile,
//! per-workspace personality override, recent daily memory lines, and an
//! important-instructions file. Modeled on
//! `bridge_agent::prompt::WorkspaceLoader`'s template-assembly pattern,
//! reused here for ordering and idempotency rather than prompt-cache tiers.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing::{info, instrument};

use bridge_memory::MemoryManager;

use crate::error::Result;

const PERSONA_FILE: &str = "SOUL.md";
const IDENTITY_FILE: &str = "IDENTITY.md";
const AGENTS_FILE: &str = "AGENTS.md";
const PERSONALITY_OVERRIDE_FILE: &str = "PERSONALITY.md";
const IMPORTANT_FILE: &str = "important.md";

/// Assembles `<workspace>/CLAUDE.md` from a shared persona directory and a
/// per-topic workspace directory. Holds no mutable state: `assemble()` is a
/// pure function of what's on disk right now, so re-running it without
/// upstream changes produces byte-identical output.
pub struct WorkspaceAssembler {
    shared_dir: PathBuf,
    workspace_dir: PathBuf,
    recent_days: i64,
}

impl WorkspaceAssembler {
    pub fn new(
        shared_dir: impl Into<PathBuf>,
        workspace_dir: impl Into<PathBuf>,
        recent_days: i64,
    ) -> Self {
        Self {
            shared_dir: shared_dir.into(),
            workspace_dir: workspace_dir.into(),
            recent_days,
        }
    }

    pub fn output_path(&self) -> PathBuf {
        self.workspace_dir.join("CLAUDE.md")
    }

    fn persona_dir_path(&self) -> PathBuf {
        self.workspace_dir.join(".persona")
    }

    fn user_profile_path(&self, user_id: &str) -> PathBuf {
        let override_path = self.persona_dir_path().join(format!("{user_id}.md"));
        if override_path.exists() {
            return override_path;
        }
        self.shared_dir.join("users").join(format!("{user_id}.md"))
    }

    fn personality_override_path(&self) -> PathBuf {
        self.persona_dir_path().join(PERSONALITY_OVERRIDE_FILE)
    }

    fn important_path(&self) -> PathBuf {
        self.persona_dir_path().join(IMPORTANT_FILE)
    }

    /// Build the recent-daily-lines section from `bridge-memory`, read-only:
    /// the last `recent_days` days (inclusive of `today`), oldest first.
    fn recent_daily_section(&self, memory: &MemoryManager, today: NaiveDate) -> Result<String> {
        let mut lines = Vec::new();
        for offset in (0..self.recent_days).rev() {
            let date = today - chrono::Duration::days(offset);
            let date_str = date.format("%Y-%m-%d").to_string();
            if let Some(content) = memory.get_daily(&date_str)? {
                let body = bridge_memory::frontmatter::strip_frontmatter(&content);
                let body = body.trim();
                if !body.is_empty() {
                    lines.push(format!("### {date_str}\n\n{body}"));
                }
            }
        }
        Ok(lines.join("\n\n"))
    }

    /// Build the full `CLAUDE.md` content. `user_id` selects which per-user
    /// profile to include (workspace override takes precedence over the
    /// shared one); pass `None` for workspaces with no single bound user.
    #[instrument(skip(self, memory))]
    pub fn assemble(
        &self,
        memory: &MemoryManager,
        user_id: Option<&str>,
        today: NaiveDate,
    ) -> Result<String> {
        let mut sections: Vec<(&str, String)> = Vec::new();

        if let Some(content) = read_trimmed(&self.shared_dir.join(PERSONA_FILE))? {
            sections.push(("SOUL", content));
        }
        if let Some(content) = read_trimmed(&self.shared_dir.join(IDENTITY_FILE))? {
            sections.push(("IDENTITY", content));
        }
        if let Some(content) = read_trimmed(&self.shared_dir.join(AGENTS_FILE))? {
            sections.push(("AGENTS", content));
        }
        if let Some(uid) = user_id {
            if let Some(content) = read_trimmed(&self.user_profile_path(uid))? {
                sections.push(("USER", content));
            }
        }
        if let Some(content) = read_trimmed(&self.personality_override_path())? {
            sections.push(("PERSONALITY", content));
        }

        let recent = self.recent_daily_section(memory, today)?;
        if !recent.is_empty() {
            sections.push(("RECENT MEMORY", recent));
        }

        if let Some(raw) = read_trimmed(&self.important_path())? {
            let stripped = bridge_memory::frontmatter::strip_frontmatter(&raw).trim().to_string();
            if !stripped.is_empty() {
                sections.push(("IMPORTANT INSTRUCTIONS", stripped));
            }
        }

        let mut out = String::from(
            "# Project Context\n\n\
             This file is assembled automatically. Do not edit directly.\n",
        );
        for (title, content) in &sections {
            out.push_str("\n---\n\n## ");
            out.push_str(title);
            out.push_str("\n\n");
            out.push_str(content);
        }
        out.push('\n');
        Ok(out)
    }

    /// Assemble and atomically write `CLAUDE.md` into the workspace root.
    #[instrument(skip(self, memory))]
    pub fn write(&self, memory: &MemoryManager, user_id: Option<&str>, today: NaiveDate) -> Result<()> {
        let content = self.assemble(memory, user_id, today)?;
        bridge_core::atomic::write_text(&self.output_path(), &content)?;
        info!(path = %self.output_path().display(), "assembled CLAUDE.md");
        Ok(())
    }
}

fn read_trimmed(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let trimmed = content.trim();
            if trimmed.is_empty() {
                Ok(None)
            } else {
                Ok(Some(trimmed.to_string()))
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
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
    fn assembles_sections_in_fixed_order() {
        let shared = tempdir().unwrap();
        let ws = tempdir().unwrap();
        std::fs::write(shared.path().join("SOUL.md"), "soul text").unwrap();
        std::fs::write(shared.path().join("AGENTS.md"), "agents text").unwrap();
        let memory = MemoryManager::open(ws.path()).unwrap();

        let assembler = WorkspaceAssembler::new(shared.path(), ws.path(), 7);
        let result = assembler.assemble(&memory, None, date("2026-02-15")).unwrap();

        let soul_pos = result.find("## SOUL").unwrap();
        let agents_pos = result.find("## AGENTS").unwrap();
        assert!(soul_pos < agents_pos);
    }

    #[test]
    fn includes_recent_daily_lines_within_window() {
        let shared = tempdir().unwrap();
        let ws = tempdir().unwrap();
        let mut memory = MemoryManager::open(ws.path()).unwrap();
        memory.append_daily_line(date("2026-02-14"), "- discussed the roadmap").unwrap();
        memory.append_daily_line(date("2026-01-01"), "- too old to include").unwrap();

        let assembler = WorkspaceAssembler::new(shared.path(), ws.path(), 7);
        let result = assembler.assemble(&memory, None, date("2026-02-15")).unwrap();

        assert!(result.contains("discussed the roadmap"));
        assert!(!result.contains("too old to include"));
    }

    #[test]
    fn prefers_workspace_profile_override_over_shared() {
        let shared = tempdir().unwrap();
        let ws = tempdir().unwrap();
        std::fs::create_dir_all(shared.path().join("users")).unwrap();
        std::fs::write(shared.path().join("users/42.md"), "shared profile").unwrap();
        std::fs::create_dir_all(ws.path().join(".persona")).unwrap();
        std::fs::write(ws.path().join(".persona/42.md"), "workspace override profile").unwrap();
        let memory = MemoryManager::open(ws.path()).unwrap();

        let assembler = WorkspaceAssembler::new(shared.path(), ws.path(), 7);
        let result = assembler.assemble(&memory, Some("42"), date("2026-02-15")).unwrap();

        assert!(result.contains("workspace override profile"));
        assert!(!result.contains("shared profile"));
    }

    #[test]
    fn important_instructions_have_frontmatter_stripped() {
        let shared = tempdir().unwrap();
        let ws = tempdir().unwrap();
        std::fs::create_dir_all(ws.path().join(".persona")).unwrap();
        std::fs::write(
            ws.path().join(".persona/important.md"),
            "---\ndate: 2026-02-15\ntags: []\n---\nAlways answer in English.",
        )
        .unwrap();
        let memory = MemoryManager::open(ws.path()).unwrap();

        let assembler = WorkspaceAssembler::new(shared.path(), ws.path(), 7);
        let result = assembler.assemble(&memory, None, date("2026-02-15")).unwrap();

        assert!(result.contains("Always answer in English."));
        assert!(!result.contains("tags: []"));
    }

    #[test]
    fn rerun_without_changes_is_byte_identical() {
        let shared = tempdir().unwrap();
        let ws = tempdir().unwrap();
        std::fs::write(shared.path().join("SOUL.md"), "soul text").unwrap();
        let mut memory = MemoryManager::open(ws.path()).unwrap();
        memory.append_daily_line(date("2026-02-14"), "- a note").unwrap();

        let assembler = WorkspaceAssembler::new(shared.path(), ws.path(), 7);
        let first = assembler.assemble(&memory, None, date("2026-02-15")).unwrap();
        let second = assembler.assemble(&memory, None, date("2026-02-15")).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn missing_optional_files_are_skipped_without_error() {
        let shared = tempdir().unwrap();
        let ws = tempdir().unwrap();
        let memory = MemoryManager::open(ws.path()).unwrap();

        let assembler = WorkspaceAssembler::new(shared.path(), ws.path(), 7);
        let result = assembler.assemble(&memory, Some("1"), date("2026-02-15"));

        assert!(result.is_ok());
    }
}
