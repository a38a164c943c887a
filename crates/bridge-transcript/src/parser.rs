//! Pure transcript-to-chat-entries parser.
//!
//! `parse_entries` takes a batch of raw transcript entries plus the carrier
//! state left over from the previous call and returns the rendered entries
//! plus the updated carrier. Calling it once over N entries must produce the
//! same output as calling it N times over one entry each — there is no
//! internal state beyond what's threaded through the return value.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::tool_format::{format_tool_result, format_tool_use_summary};
use crate::types::{
    ContentType, ParsedMessageEntry, PendingTools, RawBlock, RawContent, RawEntry, Role,
    ToolUseRecord, EXPANDABLE_CLOSE, EXPANDABLE_OPEN,
};

static SYSTEM_REMINDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<system-reminder>.*?</system-reminder>").unwrap());
static COMMAND_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<command-name>(.*?)</command-name>").unwrap());
static COMMAND_STDOUT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<local-command-stdout>(.*?)</local-command-stdout>").unwrap());

/// Parse a batch of raw entries, threading `pending_tools` / `no_notify`
/// across the call the way a long-running monitor would across polls.
pub fn parse_entries(
    entries: &[RawEntry],
    mut pending: PendingTools,
    mut no_notify: bool,
) -> (Vec<ParsedMessageEntry>, PendingTools, bool) {
    let mut out = Vec::new();
    for entry in entries {
        match entry.entry_type.as_str() {
            "user" => handle_user_entry(entry, &mut pending, &mut no_notify, &mut out),
            "assistant" => handle_assistant_entry(entry, &mut pending, &mut no_notify, &mut out),
            _ => {}
        }
    }
    (out, pending, no_notify)
}

fn blocks_of(content: &RawContent) -> Vec<RawBlock> {
    match content {
        RawContent::Text(s) => vec![RawBlock::Text { text: s.clone() }],
        RawContent::Blocks(blocks) => blocks.clone(),
    }
}

fn handle_user_entry(
    entry: &RawEntry,
    pending: &mut PendingTools,
    no_notify: &mut bool,
    out: &mut Vec<ParsedMessageEntry>,
) {
    for block in blocks_of(&entry.message.content) {
        match block {
            RawBlock::Text { text } => handle_user_text_block(&text, no_notify, out),
            RawBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                let stored = pending.remove(&tool_use_id);
                let content_text = content.as_text();
                let (summary, body) = format_tool_result(
                    stored.as_ref().map(|r| r.tool_name.as_str()),
                    stored.as_ref().map(|r| &r.input),
                    &content_text,
                    is_error.unwrap_or(false),
                );
                let text = match body {
                    Some(body) => format!("{summary}\n{body}"),
                    None => summary,
                };
                let mut parsed =
                    ParsedMessageEntry::new(Role::User, ContentType::ToolResult, text, *no_notify);
                parsed.tool_use_id = Some(tool_use_id);
                parsed.tool_name = stored.map(|r| r.tool_name).or_else(|| Some("UnknownTool".to_string()));
                out.push(parsed);
            }
            // Assistant-only block types never appear on the user side of
            // a real transcript; skip defensively rather than panic.
            RawBlock::Thinking { .. } | RawBlock::ToolUse { .. } => {}
        }
    }
}

/// Applies, in order: system-reminder stripping (drop, no flag side
/// effects), local-command recognition (no flag side effects), then the
/// `[NO_NOTIFY]` / `[System]` tag rules (rule 1 — the only case that
/// mutates `no_notify_active`).
fn handle_user_text_block(text: &str, no_notify: &mut bool, out: &mut Vec<ParsedMessageEntry>) {
    if SYSTEM_REMINDER_RE.is_match(text) {
        let stripped = SYSTEM_REMINDER_RE.replace_all(text, "").trim().to_string();
        if stripped.is_empty() {
            return;
        }
        out.push(ParsedMessageEntry::new(Role::User, ContentType::Text, stripped, *no_notify));
        return;
    }

    if let Some(caps) = COMMAND_NAME_RE.captures(text) {
        let command_name = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
        let stdout = COMMAND_STDOUT_RE
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string());
        let rendered = match stdout {
            Some(stdout) if !stdout.is_empty() => format!("/{command_name}\n{stdout}"),
            _ => format!("/{command_name}"),
        };
        let mut parsed = ParsedMessageEntry::new(Role::User, ContentType::LocalCommand, rendered, *no_notify);
        parsed.tool_name = Some(command_name.to_string());
        out.push(parsed);
        return;
    }

    if let Some(rest) = text.strip_prefix("[NO_NOTIFY]") {
        *no_notify = true;
        let rest = rest.trim_start();
        if !rest.is_empty() {
            out.push(ParsedMessageEntry::new(Role::User, ContentType::Text, rest, *no_notify));
        }
        return;
    }

    if text.starts_with("[System]") {
        *no_notify = true;
        out.push(ParsedMessageEntry::new(Role::User, ContentType::Text, text, *no_notify));
        return;
    }

    *no_notify = false;
    if !text.trim().is_empty() {
        out.push(ParsedMessageEntry::new(Role::User, ContentType::Text, text, *no_notify));
    }
}

fn handle_assistant_entry(
    entry: &RawEntry,
    pending: &mut PendingTools,
    no_notify: &mut bool,
    out: &mut Vec<ParsedMessageEntry>,
) {
    for block in blocks_of(&entry.message.content) {
        match block {
            RawBlock::Text { text } => {
                if text.trim().is_empty() {
                    continue;
                }
                out.push(ParsedMessageEntry::new(Role::Assistant, ContentType::Text, text, *no_notify));
            }
            RawBlock::Thinking { thinking } => {
                if thinking.trim().is_empty() {
                    continue;
                }
                let wrapped = format!("{EXPANDABLE_OPEN}{thinking}{EXPANDABLE_CLOSE}");
                out.push(ParsedMessageEntry::new(Role::Assistant, ContentType::Thinking, wrapped, *no_notify));
            }
            RawBlock::ToolUse { id, name, input } => {
                let summary = format_tool_use_summary(&name, &input);
                let parsed = ParsedMessageEntry::new(Role::Assistant, ContentType::ToolUse, summary, *no_notify)
                    .with_tool(id.clone(), name.clone());
                out.push(parsed);

                if name == "ExitPlanMode" {
                    if let Some(plan) = input.get("plan").and_then(|v| v.as_str()) {
                        if !plan.trim().is_empty() {
                            out.push(ParsedMessageEntry::new(Role::Assistant, ContentType::Text, plan, *no_notify));
                        }
                    }
                }

                pending.insert(id, ToolUseRecord { tool_name: name, input });
            }
            RawBlock::ToolResult { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ParserState, RawMessage};
    use serde_json::json;

    fn user_entry(content: RawContent) -> RawEntry {
        RawEntry { entry_type: "user".into(), message: RawMessage { content }, session_id: None }
    }
    fn assistant_entry(content: RawContent) -> RawEntry {
        RawEntry { entry_type: "assistant".into(), message: RawMessage { content }, session_id: None }
    }

    #[test]
    fn no_notify_tag_stripped_and_sticky() {
        let entries = vec![user_entry(RawContent::Text("[NO_NOTIFY] hello".into()))];
        let (out, _pending, no_notify) = parse_entries(&entries, PendingTools::new(), false);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "hello");
        assert!(out[0].no_notify);
        assert!(no_notify);
    }

    #[test]
    fn no_notify_tag_with_empty_remainder_emits_nothing() {
        let entries = vec![user_entry(RawContent::Text("[NO_NOTIFY]   ".into()))];
        let (out, _pending, no_notify) = parse_entries(&entries, PendingTools::new(), false);
        assert!(out.is_empty());
        assert!(no_notify);
    }

    #[test]
    fn system_tag_sets_flag_without_stripping() {
        let entries = vec![user_entry(RawContent::Text("[System] context injected".into()))];
        let (out, _pending, no_notify) = parse_entries(&entries, PendingTools::new(), false);
        assert_eq!(out[0].text, "[System] context injected");
        assert!(no_notify);
    }

    #[test]
    fn plain_text_clears_no_notify() {
        let entries = vec![user_entry(RawContent::Text("just a question".into()))];
        let (out, _pending, no_notify) = parse_entries(&entries, PendingTools::new(), true);
        assert!(!out[0].no_notify);
        assert!(!no_notify);
    }

    #[test]
    fn system_reminder_block_dropped_without_flag_side_effects() {
        let entries = vec![user_entry(RawContent::Text(
            "<system-reminder>keep this out</system-reminder>".into(),
        ))];
        let (out, _pending, no_notify) = parse_entries(&entries, PendingTools::new(), true);
        assert!(out.is_empty());
        assert!(no_notify, "system-reminder blocks must not reset no_notify_active");
    }

    #[test]
    fn local_command_renders_slash_form_with_stdout() {
        let text = "<command-name>clear</command-name><local-command-stdout>ok</local-command-stdout>";
        let entries = vec![user_entry(RawContent::Text(text.into()))];
        let (out, _pending, _no_notify) = parse_entries(&entries, PendingTools::new(), false);
        assert_eq!(out[0].content_type, ContentType::LocalCommand);
        assert_eq!(out[0].text, "/clear\nok");
    }

    #[test]
    fn tool_use_then_result_pairs_across_two_calls() {
        let state = ParserState::default();
        let use_entries = vec![assistant_entry(RawContent::Blocks(vec![RawBlock::ToolUse {
            id: "tu_1".into(),
            name: "Read".into(),
            input: json!({ "file_path": "app.py" }),
        }]))];
        let (first_out, pending, no_notify) = parse_entries(&use_entries, state.pending_tools, state.no_notify_active);
        assert_eq!(first_out[0].text, "**Read**(app.py)");

        let result_entries = vec![user_entry(RawContent::Blocks(vec![RawBlock::ToolResult {
            tool_use_id: "tu_1".into(),
            content: crate::types::ToolResultContent::Text("line one\nline two\n".into()),
            is_error: Some(false),
        }]))];
        let (second_out, pending_after, _) = parse_entries(&result_entries, pending, no_notify);
        assert!(pending_after.is_empty());
        assert!(second_out[0].text.contains("Read 2 lines"));
    }

    #[test]
    fn incremental_parse_matches_batch_parse() {
        let entries = vec![
            user_entry(RawContent::Text("hi".into())),
            assistant_entry(RawContent::Blocks(vec![RawBlock::ToolUse {
                id: "tu_x".into(),
                name: "Bash".into(),
                input: json!({ "command": "ls" }),
            }])),
            user_entry(RawContent::Blocks(vec![RawBlock::ToolResult {
                tool_use_id: "tu_x".into(),
                content: crate::types::ToolResultContent::Text("a.txt\n".into()),
                is_error: Some(false),
            }])),
        ];

        let (batch_out, _, _) = parse_entries(&entries, PendingTools::new(), false);

        let mut incremental_out = Vec::new();
        let mut pending = PendingTools::new();
        let mut no_notify = false;
        for entry in &entries {
            let (mut out, new_pending, new_no_notify) = parse_entries(std::slice::from_ref(entry), pending, no_notify);
            incremental_out.append(&mut out);
            pending = new_pending;
            no_notify = new_no_notify;
        }

        assert_eq!(batch_out.len(), incremental_out.len());
        for (a, b) in batch_out.iter().zip(incremental_out.iter()) {
            assert_eq!(a.text, b.text);
            assert_eq!(a.content_type, b.content_type);
        }
    }

    #[test]
    fn orphan_tool_result_still_emitted_as_unknown_tool() {
        let entries = vec![user_entry(RawContent::Blocks(vec![RawBlock::ToolResult {
            tool_use_id: "missing".into(),
            content: crate::types::ToolResultContent::Text("raw".into()),
            is_error: Some(false),
        }]))];
        let (out, _pending, _no_notify) = parse_entries(&entries, PendingTools::new(), false);
        assert_eq!(out[0].tool_name.as_deref(), Some("UnknownTool"));
    }

    #[test]
    fn exit_plan_mode_emits_plan_as_second_text_entry() {
        let entries = vec![assistant_entry(RawContent::Blocks(vec![RawBlock::ToolUse {
            id: "tu_plan".into(),
            name: "ExitPlanMode".into(),
            input: json!({ "plan": "Step 1\nStep 2" }),
        }]))];
        let (out, _pending, _no_notify) = parse_entries(&entries, PendingTools::new(), false);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].content_type, ContentType::ToolUse);
        assert_eq!(out[1].content_type, ContentType::Text);
        assert_eq!(out[1].text, "Step 1\nStep 2");
    }
}
