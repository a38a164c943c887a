use serde::{Deserialize, Serialize};

/// Which on-disk source a memory row was indexed from. Search dedup prefers
/// `Experience` over `Daily` over `Summary` when two rows look alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemorySource {
    Experience,
    Daily,
    Summary,
}

impl MemorySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Experience => "experience",
            Self::Daily => "daily",
            Self::Summary => "summary",
        }
    }

    /// Lower sorts first; used to break near-duplicate ties in search results.
    pub fn priority(&self) -> u8 {
        match self {
            Self::Experience => 0,
            Self::Daily => 1,
            Self::Summary => 2,
        }
    }
}

impl std::fmt::Display for MemorySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemorySource {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "experience" => Ok(Self::Experience),
            "daily" => Ok(Self::Daily),
            "summary" => Ok(Self::Summary),
            other => Err(format!("unknown memory source: {other}")),
        }
    }
}

/// One indexed line from a memory file, as stored in the `memories` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRow {
    pub path: String,
    pub source: MemorySource,
    /// `YYYY-MM-DD` for daily, topic name for experience, `YYYY-MM-DD_HH00` for summary.
    pub date: String,
    pub line_num: u32,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub memory_path: String,
    pub description: String,
    pub file_path: String,
    pub kind: AttachmentKind,
}

/// One search hit, with the source file path reconstructed from `source`/`date`.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub file: String,
    pub source: MemorySource,
    pub date: String,
    pub line_num: u32,
    pub content: String,
}

/// Summary info for a daily memory file, for listing without reading full content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailySummary {
    pub date: String,
    pub size_bytes: u64,
    pub preview: String,
}
