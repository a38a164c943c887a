//! YAML frontmatter stripping and tag extraction, shared by the daily-log
//! writer and the SQLite sync pass.

use std::sync::OnceLock;

use regex::Regex;

fn frontmatter_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\A---\n.*?\n---\n?").unwrap())
}

fn tags_bracket_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^tags:\s*\[([^\]]*)\]").unwrap())
}

fn inline_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:^|\s)#([a-zA-Z][a-zA-Z0-9/-]*)").unwrap())
}

fn attachment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"!?\[([^\]]+)\]\(([^)]+)\)").unwrap())
}

/// Remove a leading `---\n ... \n---\n` YAML block, if present.
pub fn strip_frontmatter(text: &str) -> String {
    frontmatter_re().replace(text, "").into_owned()
}

/// Extract tags from frontmatter's `tags: [a, b]` and inline `#tag` mentions
/// in the body. Returns a sorted, deduped, lowercased list.
pub fn parse_tags(text: &str) -> Vec<String> {
    let mut tags = std::collections::BTreeSet::new();

    if let Some(fm) = frontmatter_re().find(text) {
        if let Some(caps) = tags_bracket_re().captures(fm.as_str()) {
            for raw in caps[1].split(',') {
                let t = raw.trim().trim_matches('"').trim_matches('\'').trim_start_matches('#').to_lowercase();
                if !t.is_empty() {
                    tags.insert(t);
                }
            }
        }
    }

    let body = strip_frontmatter(text);
    for caps in inline_tag_re().captures_iter(&body) {
        tags.insert(caps[1].to_lowercase());
    }

    tags.into_iter().collect()
}

/// One attachment reference parsed out of a memory file's body:
/// `(description, relative_path, is_image)`.
pub fn parse_attachment_refs(content: &str) -> Vec<(String, String, bool)> {
    let mut out = Vec::new();
    for line in content.lines() {
        for caps in attachment_re().captures_iter(line) {
            let full = caps.get(0).unwrap().as_str();
            let desc = caps[1].to_string();
            let path = caps[2].to_string();
            if !path.contains("memory/attachments/") {
                continue;
            }
            out.push((desc, path, full.starts_with('!')));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_frontmatter_block() {
        let text = "---\ndate: 2026-02-15\ntags: []\n---\nbody line\n";
        assert_eq!(strip_frontmatter(text), "body line\n");
    }

    #[test]
    fn parses_bracket_and_inline_tags() {
        let text = "---\ndate: 2026-02-15\ntags: [Work, \"#Travel\"]\n---\nSaw a #Bug today.\n";
        assert_eq!(parse_tags(text), vec!["bug".to_string(), "travel".to_string(), "work".to_string()]);
    }

    #[test]
    fn parses_image_vs_file_attachment_refs() {
        let content = "- ![a photo](memory/attachments/2026-02-15/x.png)\n- [a doc](memory/attachments/2026-02-15/x.pdf)\n- [other](not/memory/path.pdf)\n";
        let refs = parse_attachment_refs(content);
        assert_eq!(refs.len(), 2);
        assert!(refs[0].2);
        assert!(!refs[1].2);
    }
}
