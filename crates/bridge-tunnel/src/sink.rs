use async_trait::async_trait;

/// Notified whenever the tunnel's public URL changes (spec.md §4.D) —
/// keeps `bridge-tunnel` decoupled from whatever rewrites message markers
/// with the current URL.
#[async_trait]
pub trait UrlChangeSink: Send + Sync {
    async fn on_url_change(&self, url: &str);
}

/// No-op sink for callers that don't need to react to URL changes.
pub struct NoopSink;

#[async_trait]
impl UrlChangeSink for NoopSink {
    async fn on_url_change(&self, _url: &str) {}
}
