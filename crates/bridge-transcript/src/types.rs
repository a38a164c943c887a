use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Sentinel pair the parser wraps `thinking` blocks in. The delivery layer
/// recognises these and renders the content collapsed by default.
pub const EXPANDABLE_OPEN: &str = "\u{2056}EXPAND\u{2056}";
pub const EXPANDABLE_CLOSE: &str = "\u{2056}/EXPAND\u{2056}";

/// Literal sentinel the assistant CLI writes for a user-interrupted turn.
pub const INTERRUPTED_SENTINEL: &str = "[Request interrupted by user]";

/// One raw JSON-lines entry as the assistant CLI appends it to the
/// transcript file.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEntry {
    #[serde(rename = "type")]
    pub entry_type: String,
    pub message: RawMessage,
    /// Present on some entries; used by the monitor to detect session
    /// rotation mid-stream.
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    pub content: RawContent,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawContent {
    Text(String),
    Blocks(Vec<RawBlock>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: ToolResultContent,
        #[serde(default)]
        is_error: Option<bool>,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
    Blocks(Vec<ToolResultBlock>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolResultBlock {
    #[serde(default)]
    pub text: Option<String>,
}

impl ToolResultContent {
    /// Concatenate every text fragment into one plain-text body.
    pub fn as_text(&self) -> String {
        match self {
            ToolResultContent::Text(s) => s.clone(),
            ToolResultContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| b.text.as_deref())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Which side of the conversation an entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// What kind of rendered content a `ParsedMessageEntry` carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Text,
    Thinking,
    ToolUse,
    ToolResult,
    LocalCommand,
}

/// One unit of output from the transcript parser: the chat-facing rendering
/// of a single transcript event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedMessageEntry {
    pub role: Role,
    pub content_type: ContentType,
    pub text: String,
    pub tool_use_id: Option<String>,
    pub tool_name: Option<String>,
    pub no_notify: bool,
}

impl ParsedMessageEntry {
    pub fn new(role: Role, content_type: ContentType, text: impl Into<String>, no_notify: bool) -> Self {
        Self {
            role,
            content_type,
            text: text.into(),
            tool_use_id: None,
            tool_name: None,
            no_notify,
        }
    }

    pub fn with_tool(mut self, tool_use_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        self.tool_use_id = Some(tool_use_id.into());
        self.tool_name = Some(tool_name.into());
        self
    }
}

/// A tool_use emitted eagerly and awaiting its matching tool_result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUseRecord {
    pub tool_name: String,
    pub input: serde_json::Value,
}

/// Carried state across calls to `parse_entries` on the same transcript
/// file: `tool_use_id -> pending record`.
pub type PendingTools = HashMap<String, ToolUseRecord>;

/// The full carrier state threaded between incremental parse calls.
#[derive(Debug, Clone, Default)]
pub struct ParserState {
    pub pending_tools: PendingTools,
    pub no_notify_active: bool,
}
