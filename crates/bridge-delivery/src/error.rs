use std::time::Duration;

use thiserror::Error;

/// Platform-error buckets a delivery sink maps its transport errors onto,
/// per spec.md §7: the worker loop only needs to tell these four apart.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// Worth a bounded number of retries (network blip, timeout).
    #[error("transient delivery error: {0}")]
    Transient(String),

    /// The platform asked us to slow down for a specific duration.
    #[error("flood control, retry after {0:?}")]
    Flood(Duration),

    /// Retrying will not help (message deleted, chat blocked, bad token).
    #[error("permanent delivery error: {0}")]
    Permanent(String),
}

pub type Result<T> = std::result::Result<T, PlatformError>;
