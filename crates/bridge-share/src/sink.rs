use std::path::Path;

use async_trait::async_trait;

/// Notified once an upload finishes (spec.md §4.C), decoupling `bridge-share`
/// from `bridge-channels`/`bridge-delivery` concrete types.
#[async_trait]
pub trait UploadSink: Send + Sync {
    async fn on_upload(&self, upload_dir: &Path, filenames: &[String], description: &str);
}
