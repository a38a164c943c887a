//! Unicode glyph constants the pane parser matches against.
//!
//! Kept in one module, per the design note that status-line heuristics are
//! tied to a specific upstream TUI's rendering and may need to be
//! regenerated wholesale if that rendering changes.

/// Spinner glyphs that prefix an in-progress status line. Non-exhaustive —
/// extend as the upstream TUI adds frames.
pub const SPINNER_GLYPHS: &[&str] = &["✻", "✶", "·", "✢", "✳"];

/// A row beginning with this marks the idle input prompt; scanning for a
/// status line stops here (anything above is a stale spinner).
pub const IDLE_PROMPT_MARKER: &str = "❯ ";

/// How many rows from the bottom of the pane the status-line scan covers.
pub const BOTTOM_SCAN_ROWS: usize = 15;

/// Box-drawing characters that make up an interactive-UI frame border.
pub const FRAME_BORDER_CHARS: &[char] = &['─', '│', '╭', '╮', '╰', '╯'];

/// Recognised interactive-frame keyword tags, in match priority order.
pub const KEYWORD_TAGS: &[(&str, &str)] = &[
    ("AskUserQuestion", "AskUserQuestion"),
    ("ExitPlanMode", "ExitPlanMode"),
    ("Permission", "Permission"),
    ("RestoreCheckpoint", "RestoreCheckpoint"),
];
