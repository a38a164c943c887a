//! Freeze detection: hashes pane text over time and latches a one-shot
//! notification once it has been unchanged (with a spinner still active)
//! for the freeze timeout.

use md5::{Digest, Md5};
use std::time::{Duration, Instant};

/// Per-window freeze-detection state. Owned by the status poller; not
/// persisted (a restart simply starts the latch fresh).
pub struct FreezeDetector {
    last_hash: Option<[u8; 16]>,
    changed_at: Instant,
    notified: bool,
}

impl FreezeDetector {
    pub fn new() -> Self {
        Self {
            last_hash: None,
            changed_at: Instant::now(),
            notified: false,
        }
    }

    /// Feed the latest captured pane text and whether a spinner is active.
    /// Returns `true` exactly once per freeze episode, the instant the
    /// timeout is crossed; resets on any content change.
    pub fn observe(&mut self, pane_text: &str, has_spinner: bool, timeout: Duration) -> bool {
        let digest: [u8; 16] = Md5::digest(pane_text.as_bytes()).into();
        if self.last_hash != Some(digest) {
            self.last_hash = Some(digest);
            self.changed_at = Instant::now();
            self.notified = false;
            return false;
        }
        if !has_spinner || self.notified {
            return false;
        }
        if self.changed_at.elapsed() >= timeout {
            self.notified = true;
            return true;
        }
        false
    }
}

impl Default for FreezeDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once_after_timeout_then_resets_on_change() {
        let mut detector = FreezeDetector::new();
        let timeout = Duration::from_millis(20);

        assert!(!detector.observe("✻ working", true, timeout));
        std::thread::sleep(Duration::from_millis(30));
        assert!(detector.observe("✻ working", true, timeout));
        // Still frozen, same content: must not notify twice.
        assert!(!detector.observe("✻ working", true, timeout));

        // Content changes: latch resets.
        assert!(!detector.observe("✻ working more", true, timeout));
        std::thread::sleep(Duration::from_millis(30));
        assert!(detector.observe("✻ working more", true, timeout));
    }

    #[test]
    fn no_spinner_never_notifies() {
        let mut detector = FreezeDetector::new();
        let timeout = Duration::from_millis(10);
        detector.observe("static output", false, timeout);
        std::thread::sleep(Duration::from_millis(20));
        assert!(!detector.observe("static output", false, timeout));
    }
}
