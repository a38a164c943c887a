//! Tool-summary and tool-result rendering tables.
//!
//! Grounded on `original_source`'s transcript renderer: each tool gets a
//! fixed one-line summary when its `tool_use` block arrives, and a fixed
//! one-line (plus optional body) rendering once its `tool_result` lands.

use serde_json::Value;

const BASH_TRUNCATE_CHARS: usize = 200;

fn str_field<'a>(input: &'a Value, key: &str) -> &'a str {
    input.get(key).and_then(Value::as_str).unwrap_or("")
}

fn truncate_ellipsis(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let head: String = s.chars().take(max_chars).collect();
    format!("{head}…")
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// One-line summary rendered the moment a `tool_use` block is parsed.
pub fn format_tool_use_summary(name: &str, input: &Value) -> String {
    match name {
        "Read" | "Write" | "Edit" => {
            format!("**{name}**({})", str_field(input, "file_path"))
        }
        "Bash" => format!(
            "**Bash**({})",
            truncate_ellipsis(str_field(input, "command"), BASH_TRUNCATE_CHARS)
        ),
        "Grep" => format!("**Grep**({})", str_field(input, "pattern")),
        "Glob" => format!("**Glob**({})", str_field(input, "pattern")),
        "Task" => format!("**Task**({})", str_field(input, "description")),
        "WebFetch" => format!("**WebFetch**({})", str_field(input, "url")),
        "WebSearch" => format!("**WebSearch**({})", str_field(input, "query")),
        "TodoWrite" => {
            let n = input
                .get("todos")
                .and_then(Value::as_array)
                .map(|a| a.len())
                .unwrap_or(0);
            format!("**TodoWrite**({n} item{})", if n == 1 { "" } else { "s" })
        }
        "AskUserQuestion" => {
            let question = input
                .get("questions")
                .and_then(Value::as_array)
                .and_then(|qs| qs.first())
                .and_then(|q| q.get("question"))
                .and_then(Value::as_str)
                .unwrap_or("");
            format!("**AskUserQuestion**: {question}")
        }
        "ExitPlanMode" => {
            let first_line = str_field(input, "plan").lines().next().unwrap_or("");
            format!("**ExitPlanMode**: {first_line}")
        }
        other => {
            let first_value = input
                .as_object()
                .and_then(|m| m.values().next())
                .map(stringify)
                .unwrap_or_default();
            format!("**{other}**({first_value})")
        }
    }
}

/// One-line (plus optional overflow body) rendering of a resolved
/// `tool_result`. `stored_name` is `None` when no matching `tool_use` was
/// found in the pending map.
pub fn format_tool_result(
    stored_name: Option<&str>,
    stored_input: Option<&Value>,
    content: &str,
    is_error: bool,
) -> (String, Option<String>) {
    if content.trim() == crate::types::INTERRUPTED_SENTINEL {
        return ("Interrupted".to_string(), None);
    }
    if is_error {
        return (format!("Error: {content}"), None);
    }
    match stored_name {
        Some("Edit") | Some("MultiEdit") => {
            let diff = stored_input
                .map(|input| render_edit_diff(stored_name.unwrap(), input))
                .unwrap_or_else(|| content.to_string());
            ("⎿  Edited".to_string(), Some(diff))
        }
        Some("Read") => (format!("⎿  Read {} lines", content.lines().count()), None),
        Some("Write") => (format!("⎿  Wrote {} lines", content.lines().count()), None),
        Some("Bash") => (
            format!("⎿  Output {} lines", content.lines().count()),
            Some(content.to_string()),
        ),
        Some("Grep") => (
            format!("⎿  Found {} matches", content.lines().filter(|l| !l.trim().is_empty()).count()),
            Some(content.to_string()),
        ),
        Some("Glob") => (
            format!("⎿  Found {} files", content.lines().filter(|l| !l.trim().is_empty()).count()),
            Some(content.to_string()),
        ),
        Some("Task") => (
            format!("⎿  Agent output {} lines", content.lines().count()),
            Some(content.to_string()),
        ),
        Some("WebFetch") => (
            format!("⎿  Fetched {} characters", content.chars().count()),
            Some(content.to_string()),
        ),
        _ => ("⎿  **UnknownTool** result".to_string(), Some(content.to_string())),
    }
}

/// Unified-diff-style rendering for Edit/MultiEdit results, computed from
/// the stored `tool_use` input rather than the raw `tool_result` body.
fn render_edit_diff(name: &str, input: &Value) -> String {
    if name == "MultiEdit" {
        let edits = input.get("edits").and_then(Value::as_array);
        let Some(edits) = edits else { return String::new() };
        return edits
            .iter()
            .map(|e| single_edit_diff(str_field(e, "old_string"), str_field(e, "new_string")))
            .collect::<Vec<_>>()
            .join("\n");
    }
    single_edit_diff(str_field(input, "old_string"), str_field(input, "new_string"))
}

fn single_edit_diff(old: &str, new: &str) -> String {
    let mut out = String::new();
    for line in old.lines() {
        out.push_str("- ");
        out.push_str(line);
        out.push('\n');
    }
    for line in new.lines() {
        out.push_str("+ ");
        out.push_str(line);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bash_command_truncated_with_ellipsis() {
        let input = json!({ "command": "a".repeat(250) });
        let summary = format_tool_use_summary("Bash", &input);
        assert!(summary.ends_with('…'));
        assert_eq!(summary.chars().filter(|c| *c == 'a').count(), BASH_TRUNCATE_CHARS);
    }

    #[test]
    fn read_summary_uses_file_path() {
        let input = json!({ "file_path": "app.py" });
        assert_eq!(format_tool_use_summary("Read", &input), "**Read**(app.py)");
    }

    #[test]
    fn unknown_tool_use_falls_back_to_first_field() {
        let input = json!({ "target": "thing" });
        assert_eq!(format_tool_use_summary("Frobnicate", &input), "**Frobnicate**(thing)");
    }

    #[test]
    fn interrupted_sentinel_wins_over_error_flag() {
        let (summary, body) = format_tool_result(Some("Bash"), None, crate::types::INTERRUPTED_SENTINEL, true);
        assert_eq!(summary, "Interrupted");
        assert!(body.is_none());
    }

    #[test]
    fn unresolved_tool_result_renders_unknown_tool() {
        let (summary, body) = format_tool_result(None, None, "raw output", false);
        assert!(summary.contains("UnknownTool"));
        assert_eq!(body.as_deref(), Some("raw output"));
    }
}
