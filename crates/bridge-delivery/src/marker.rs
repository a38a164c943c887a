//! Share/upload/send-file marker rewriting (spec.md §6 External Interfaces).
//!
//! Assistant output can carry `[SHARE_LINK:<abs>]`, `[UPLOAD_LINK]`,
//! `[UPLOAD_LINK:<ttl>]`, and `[SEND_FILE:<abs>]` markers; this module
//! resolves each at delivery time into a signed share-server URL (or, for
//! `SEND_FILE`, triggers an out-of-band upload and strips the marker),
//! decoupling `bridge-delivery` from `bridge-share`'s concrete token API the
//! same way `PaneStatusSource` decouples it from `bridge-terminal`.

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

/// `[SHARE_LINK:<abs>]`, `[UPLOAD_LINK]`, `[UPLOAD_LINK:<ttl>]`, or
/// `[SEND_FILE:<abs>]`.
static MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(SHARE_LINK|UPLOAD_LINK|SEND_FILE)(?::([^\]]*))?\]").unwrap());

const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// Resolves markers into signed URLs (or triggers an upload), scoped to
/// whichever workspace a window belongs to. Implemented by a small adapter
/// over `bridge-share::ShareState` in the owning binary.
#[async_trait]
pub trait LinkResolver: Send + Sync {
    /// Build a signed `/f/...` or `/p/...` link for `abs_path`, scoped to
    /// `window_id`'s workspace. `None` if the path isn't servable (outside
    /// any registered workspace, or missing).
    async fn share_link(&self, window_id: &str, abs_path: &str, ttl: Duration) -> Option<String>;

    /// Build a signed `/u/...` upload-page link scoped to `window_id`'s
    /// workspace.
    async fn upload_link(&self, window_id: &str, ttl: Duration) -> Option<String>;

    /// Push `abs_path` out to the destination out-of-band (e.g. as a
    /// platform file attachment). Returns whether the push succeeded.
    async fn send_file(&self, window_id: &str, abs_path: &str) -> bool;
}

/// Replace every marker in `text` with its resolved link, or drop it
/// silently if resolution fails — matching the original's behavior of
/// degrading gracefully rather than leaking a broken marker into chat.
pub async fn rewrite_markers(text: &str, window_id: &str, resolver: &dyn LinkResolver) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_end = 0;

    for caps in MARKER_RE.captures_iter(text) {
        let whole = caps.get(0).unwrap();
        out.push_str(&text[last_end..whole.start()]);
        last_end = whole.end();

        let kind = &caps[1];
        let arg = caps.get(2).map(|m| m.as_str());

        let replacement = match kind {
            "SHARE_LINK" => match arg {
                Some(path) if !path.is_empty() => resolver.share_link(window_id, path, DEFAULT_TTL).await,
                _ => None,
            },
            "UPLOAD_LINK" => {
                let ttl = arg.map(parse_ttl).unwrap_or(DEFAULT_TTL);
                resolver.upload_link(window_id, ttl).await
            }
            "SEND_FILE" => {
                if let Some(path) = arg.filter(|p| !p.is_empty()) {
                    resolver.send_file(window_id, path).await;
                }
                None
            }
            _ => None,
        };

        if let Some(url) = replacement {
            out.push_str(&url);
        }
    }
    out.push_str(&text[last_end..]);
    out
}

fn parse_ttl(s: &str) -> Duration {
    let s = s.trim().to_lowercase();
    let (digits, unit_secs) = if let Some(n) = s.strip_suffix('s') {
        (n, 1u64)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3600)
    } else if let Some(n) = s.strip_suffix('d') {
        (n, 86400)
    } else {
        (s.as_str(), 1)
    };
    match digits.parse::<u64>() {
        Ok(n) => Duration::from_secs(n * unit_secs),
        Err(_) => DEFAULT_TTL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeResolver {
        sent_files: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LinkResolver for FakeResolver {
        async fn share_link(&self, _window_id: &str, abs_path: &str, ttl: Duration) -> Option<String> {
            Some(format!("https://share.example/f/tok-{}/{}", ttl.as_secs(), abs_path))
        }
        async fn upload_link(&self, _window_id: &str, ttl: Duration) -> Option<String> {
            Some(format!("https://share.example/u/tok-{}", ttl.as_secs()))
        }
        async fn send_file(&self, _window_id: &str, abs_path: &str) -> bool {
            self.sent_files.lock().unwrap().push(abs_path.to_string());
            true
        }
    }

    #[tokio::test]
    async fn rewrites_share_link() {
        let resolver = FakeResolver { sent_files: Mutex::new(vec![]) };
        let out = rewrite_markers("here: [SHARE_LINK:/tmp/report.pdf]", "w1", &resolver).await;
        assert_eq!(out, "here: https://share.example/f/tok-1800//tmp/report.pdf");
    }

    #[tokio::test]
    async fn rewrites_upload_link_with_default_and_custom_ttl() {
        let resolver = FakeResolver { sent_files: Mutex::new(vec![]) };
        let out = rewrite_markers("go: [UPLOAD_LINK]", "w1", &resolver).await;
        assert_eq!(out, "go: https://share.example/u/tok-1800");

        let out = rewrite_markers("go: [UPLOAD_LINK:2h]", "w1", &resolver).await;
        assert_eq!(out, "go: https://share.example/u/tok-7200");
    }

    #[tokio::test]
    async fn send_file_triggers_push_and_strips_marker() {
        let resolver = FakeResolver { sent_files: Mutex::new(vec![]) };
        let out = rewrite_markers("sending [SEND_FILE:/tmp/a.png] now", "w1", &resolver).await;
        assert_eq!(out, "sending  now");
        assert_eq!(resolver.sent_files.lock().unwrap().as_slice(), &["/tmp/a.png".to_string()]);
    }

    #[tokio::test]
    async fn text_without_markers_is_unchanged() {
        let resolver = FakeResolver { sent_files: Mutex::new(vec![]) };
        let out = rewrite_markers("nothing to see here", "w1", &resolver).await;
        assert_eq!(out, "nothing to see here");
    }

    #[test]
    fn parses_ttl_suffixes() {
        assert_eq!(parse_ttl("30m"), Duration::from_secs(1800));
        assert_eq!(parse_ttl("2h"), Duration::from_secs(7200));
        assert_eq!(parse_ttl("1d"), Duration::from_secs(86400));
        assert_eq!(parse_ttl("garbage"), DEFAULT_TTL);
    }
}
