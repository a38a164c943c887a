//! Read/write helpers for `memory/daily/YYYY-MM/YYYY-MM-DD.md`,
//! `memory/experience/<topic>.md`, and `memory/attachments/YYYY-MM-DD/`.
//!
//! Daily files are append-only (one line per event); experience files are
//! atomically replaced on update, matching how the assistant CLI itself
//! writes them mid-session.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tempfile::NamedTempFile;

use crate::error::{MemoryError, Result};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];

fn parse_date(date_str: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d").map_err(|_| MemoryError::InvalidDate(date_str.to_string()))
}

fn daily_path(workspace_dir: &Path, date_str: &str) -> Result<PathBuf> {
    let date = parse_date(date_str)?;
    Ok(workspace_dir.join("memory").join("daily").join(date.format("%Y-%m").to_string()).join(format!("{date_str}.md")))
}

fn daily_frontmatter(date_str: &str) -> String {
    format!("---\ndate: {date_str}\ntags: []\n---\n")
}

pub fn get_daily(workspace_dir: &Path, date_str: &str) -> Result<Option<String>> {
    let path = daily_path(workspace_dir, date_str)?;
    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(Some(content.trim().to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn delete_daily(workspace_dir: &Path, date_str: &str) -> Result<bool> {
    let path = daily_path(workspace_dir, date_str)?;
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Append a line to today's daily log, creating the file with frontmatter
/// on first write.
pub fn append_to_daily(workspace_dir: &Path, today: NaiveDate, line: &str) -> Result<()> {
    let date_str = today.format("%Y-%m-%d").to_string();
    let path = daily_path(workspace_dir, &date_str)?;
    std::fs::create_dir_all(path.parent().unwrap())?;
    if !path.exists() {
        std::fs::write(&path, daily_frontmatter(&date_str))?;
    }
    use std::io::Write;
    let mut f = std::fs::OpenOptions::new().append(true).open(&path)?;
    writeln!(f, "{}", line.trim_end_matches('\n'))?;
    Ok(())
}

fn experience_path(workspace_dir: &Path, topic: &str) -> PathBuf {
    workspace_dir.join("memory").join("experience").join(format!("{topic}.md"))
}

fn experience_heading(topic: &str) -> String {
    let kebab_ascii = !topic.is_empty() && topic.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    if kebab_ascii {
        topic.split('-').map(title_case_word).collect::<Vec<_>>().join(" ")
    } else {
        topic.to_string()
    }
}

fn title_case_word(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => first.to_uppercase().chain(chars).collect(),
    }
}

/// Append a line to an experience topic file, creating it with frontmatter
/// and a heading if it doesn't exist yet; bumps `updated` on existing files.
/// The write is atomic (temp file + rename) since experience files are
/// replaced wholesale rather than opened in append mode.
pub fn append_to_experience(workspace_dir: &Path, topic: &str, today: NaiveDate, line: &str) -> Result<()> {
    let path = experience_path(workspace_dir, topic);
    std::fs::create_dir_all(path.parent().unwrap())?;
    let date_str = today.format("%Y-%m-%d").to_string();

    let existing = std::fs::read_to_string(&path).ok();
    let mut body = match existing {
        Some(content) => bump_updated_field(&content, &date_str),
        None => format!(
            "---\ntopic: \"{topic}\"\ntags: []\ncreated: {date_str}\nupdated: {date_str}\n---\n\n## {}\n\n",
            experience_heading(topic)
        ),
    };
    if !body.ends_with('\n') {
        body.push('\n');
    }
    body.push_str(line.trim_end_matches('\n'));
    body.push('\n');

    atomic_write(&path, &body)
}

fn bump_updated_field(content: &str, today: &str) -> String {
    let mut out = String::with_capacity(content.len());
    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("updated:") {
            let _ = rest;
            out.push_str(&format!("updated: {today}"));
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }
    out
}

fn atomic_write(path: &Path, content: &str) -> Result<()> {
    let dir = path.parent().unwrap();
    let mut tmp = NamedTempFile::new_in(dir)?;
    use std::io::Write;
    tmp.write_all(content.as_bytes())?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn attachments_dir(workspace_dir: &Path, date_str: &str) -> PathBuf {
    workspace_dir.join("memory").join("attachments").join(date_str)
}

/// Copy `source_path` into `memory/attachments/YYYY-MM-DD/`, deduping the
/// destination name by appending `_2`, `_3`, … on collision.
fn copy_to_attachments(workspace_dir: &Path, source_path: &Path, today: NaiveDate) -> Result<Option<(PathBuf, String)>> {
    if !source_path.is_file() {
        return Ok(None);
    }
    let date_str = today.format("%Y-%m-%d").to_string();
    let date_dir = attachments_dir(workspace_dir, &date_str);
    std::fs::create_dir_all(&date_dir)?;

    let clean_name = source_path.file_name().unwrap().to_string_lossy().to_string();
    let stem = Path::new(&clean_name).file_stem().unwrap_or_default().to_string_lossy().to_string();
    let ext = Path::new(&clean_name).extension().map(|e| e.to_string_lossy().to_string());

    let mut dest_name = clean_name.clone();
    let mut dest = date_dir.join(&dest_name);
    let mut n = 2;
    while dest.exists() {
        dest_name = match &ext {
            Some(ext) => format!("{stem}_{n}.{ext}"),
            None => format!("{stem}_{n}"),
        };
        dest = date_dir.join(&dest_name);
        n += 1;
    }
    std::fs::copy(source_path, &dest)?;
    Ok(Some((dest, dest_name)))
}

fn attachment_markdown_ref(source_path: &Path, description: &str, rel_path: &str) -> String {
    let is_image = source_path
        .extension()
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_string_lossy().to_lowercase().as_str()))
        .unwrap_or(false);
    if is_image {
        format!("![{description}]({rel_path})")
    } else {
        format!("[{description}]({rel_path})")
    }
}

/// Copy a file into `memory/attachments/` and append a reference to today's
/// daily log. Returns the workspace-relative path of the saved attachment.
pub fn save_attachment(
    workspace_dir: &Path,
    source_path: &Path,
    description: &str,
    user_name: Option<&str>,
    today: NaiveDate,
) -> Result<Option<String>> {
    let Some((_, dest_name)) = copy_to_attachments(workspace_dir, source_path, today)? else {
        return Ok(None);
    };
    let date_str = today.format("%Y-%m-%d").to_string();
    let rel_path = format!("memory/attachments/{date_str}/{dest_name}");

    let reference = attachment_markdown_ref(source_path, description, &rel_path);
    let tag = user_name.map(|n| format!("[{n}] ")).unwrap_or_default();
    append_to_daily(workspace_dir, today, &format!("- {tag}{reference}"))?;
    Ok(Some(rel_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn append_to_daily_creates_file_with_frontmatter() {
        let dir = tempdir().unwrap();
        append_to_daily(dir.path(), date("2026-02-15"), "- did a thing").unwrap();
        let content = get_daily(dir.path(), "2026-02-15").unwrap().unwrap();
        assert!(content.starts_with("---\ndate: 2026-02-15"));
        assert!(content.contains("- did a thing"));
    }

    #[test]
    fn append_to_daily_twice_appends_both_lines() {
        let dir = tempdir().unwrap();
        append_to_daily(dir.path(), date("2026-02-15"), "- first").unwrap();
        append_to_daily(dir.path(), date("2026-02-15"), "- second").unwrap();
        let content = get_daily(dir.path(), "2026-02-15").unwrap().unwrap();
        assert!(content.contains("- first"));
        assert!(content.contains("- second"));
    }

    #[test]
    fn delete_daily_removes_file_and_reports_absence() {
        let dir = tempdir().unwrap();
        append_to_daily(dir.path(), date("2026-02-15"), "- x").unwrap();
        assert!(delete_daily(dir.path(), "2026-02-15").unwrap());
        assert!(!delete_daily(dir.path(), "2026-02-15").unwrap());
        assert!(get_daily(dir.path(), "2026-02-15").unwrap().is_none());
    }

    #[test]
    fn append_to_experience_creates_then_bumps_updated() {
        let dir = tempdir().unwrap();
        append_to_experience(dir.path(), "user-preferences", date("2026-02-15"), "- likes dark mode").unwrap();
        let path = experience_path(dir.path(), "user-preferences");
        let first = std::fs::read_to_string(&path).unwrap();
        assert!(first.contains("created: 2026-02-15"));
        assert!(first.contains("## User Preferences"));

        append_to_experience(dir.path(), "user-preferences", date("2026-03-01"), "- also likes vim").unwrap();
        let second = std::fs::read_to_string(&path).unwrap();
        assert!(second.contains("updated: 2026-03-01"));
        assert!(second.contains("likes dark mode"));
        assert!(second.contains("also likes vim"));
    }

    #[test]
    fn save_attachment_dedupes_name_and_appends_daily_reference() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("photo.png");
        std::fs::write(&src, b"fake png bytes").unwrap();

        let rel1 = save_attachment(dir.path(), &src, "a photo", Some("alice"), date("2026-02-15")).unwrap().unwrap();
        assert_eq!(rel1, "memory/attachments/2026-02-15/photo.png");

        let rel2 = save_attachment(dir.path(), &src, "another photo", None, date("2026-02-15")).unwrap().unwrap();
        assert_eq!(rel2, "memory/attachments/2026-02-15/photo_2.png");

        let daily = get_daily(dir.path(), "2026-02-15").unwrap().unwrap();
        assert!(daily.contains("[alice] ![a photo](memory/attachments/2026-02-15/photo.png)"));
        assert!(daily.contains("![another photo](memory/attachments/2026-02-15/photo_2.png)"));
    }
}
