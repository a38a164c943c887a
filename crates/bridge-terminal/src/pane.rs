//! Pure functions over a captured screen buffer: status-line extraction and
//! interactive-frame detection.
//!
//! Grounded on `original_source`'s pane-parsing heuristics; the glyphs they
//! match against live in [`crate::glyphs`] so they can be updated in one
//! place if the upstream TUI changes its rendering.

use crate::glyphs::{BOTTOM_SCAN_ROWS, FRAME_BORDER_CHARS, IDLE_PROMPT_MARKER, KEYWORD_TAGS, SPINNER_GLYPHS};

/// Tag identifying which kind of interactive frame was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractiveTag {
    AskUserQuestion,
    ExitPlanMode,
    Permission,
    RestoreCheckpoint,
    Unknown,
}

impl InteractiveTag {
    fn from_keyword(keyword: &str) -> Self {
        match keyword {
            "AskUserQuestion" => InteractiveTag::AskUserQuestion,
            "ExitPlanMode" => InteractiveTag::ExitPlanMode,
            "Permission" => InteractiveTag::Permission,
            "RestoreCheckpoint" => InteractiveTag::RestoreCheckpoint,
            _ => InteractiveTag::Unknown,
        }
    }
}

/// The content between an interactive frame's delimiters, plus its tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractiveFrame {
    pub tag: InteractiveTag,
    pub content: String,
}

/// Scan the bottom [`BOTTOM_SCAN_ROWS`] rows bottom-up for a spinner-prefixed
/// status line, stopping at the first idle-prompt row encountered.
pub fn parse_status_line(text: &str) -> Option<String> {
    let lines: Vec<&str> = text.lines().collect();
    let scan_start = lines.len().saturating_sub(BOTTOM_SCAN_ROWS);
    for line in lines[scan_start..].iter().rev() {
        let trimmed = line.trim_end();
        if trimmed.trim().is_empty() {
            continue;
        }
        if trimmed.trim_start().starts_with(IDLE_PROMPT_MARKER) {
            return None;
        }
        if let Some(rest) = strip_spinner_prefix(trimmed) {
            let rest = rest.trim();
            if !rest.is_empty() {
                return Some(rest.to_string());
            }
        }
    }
    None
}

fn strip_spinner_prefix(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    SPINNER_GLYPHS.iter().find_map(|glyph| trimmed.strip_prefix(glyph))
}

/// True if the pane currently shows an assistant-drawn interactive frame
/// (question, plan-exit confirmation, permission prompt, checkpoint restore).
pub fn is_interactive_ui(text: &str) -> bool {
    extract_interactive_frame(text).is_some()
}

/// Finds the closing frame border nearest the bottom, walks back to the
/// preceding opening border, and returns everything in between.
pub fn extract_interactive_frame(text: &str) -> Option<InteractiveFrame> {
    let lines: Vec<&str> = text.lines().collect();
    let scan_start = lines.len().saturating_sub(BOTTOM_SCAN_ROWS);
    let window = &lines[scan_start..];

    let close_idx = window.iter().rposition(|l| is_frame_border(l))?;
    let open_idx = window[..close_idx].iter().rposition(|l| is_frame_border(l))?;
    if open_idx == close_idx {
        return None;
    }

    let content = window[open_idx + 1..close_idx].join("\n");
    if content.trim().is_empty() {
        return None;
    }
    let tag = detect_tag(&content);
    Some(InteractiveFrame { tag, content })
}

fn is_frame_border(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.len() > 3
        && trimmed.contains('─')
        && trimmed.chars().all(|c| FRAME_BORDER_CHARS.contains(&c) || c.is_whitespace())
}

fn detect_tag(content: &str) -> InteractiveTag {
    for (keyword, _) in KEYWORD_TAGS {
        if content.contains(keyword) {
            return InteractiveTag::from_keyword(keyword);
        }
    }
    InteractiveTag::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_spinner_line_near_bottom() {
        let text = "some output\n✻ Thinking about the problem\n";
        assert_eq!(parse_status_line(text).as_deref(), Some("Thinking about the problem"));
    }

    #[test]
    fn idle_prompt_marker_stops_scan_before_stale_spinner() {
        let text = "✻ stale spinner from a previous turn\n❯ \n";
        assert_eq!(parse_status_line(text), None);
    }

    #[test]
    fn no_spinner_no_idle_marker_returns_none() {
        let text = "just some plain output\nanother line\n";
        assert_eq!(parse_status_line(text), None);
    }

    #[test]
    fn detects_ask_user_question_frame() {
        let text = "╭──────────╮\nAskUserQuestion: pick one\n1) yes\n2) no\n╰──────────╯\n";
        let frame = extract_interactive_frame(text).expect("frame detected");
        assert_eq!(frame.tag, InteractiveTag::AskUserQuestion);
        assert!(frame.content.contains("pick one"));
        assert!(is_interactive_ui(text));
    }

    #[test]
    fn plain_text_is_not_interactive() {
        assert!(!is_interactive_ui("no frame here\njust text\n"));
    }
}
