//! Exponential backoff and stuck-job detection for J1 (spec.md §4.J.1),
//! grounded on `cron/service.py`'s `_BACKOFF_SECONDS`/`_STUCK_TIMEOUT_S`.

use chrono::Duration;

const BACKOFF_SECONDS: [i64; 5] = [30, 60, 300, 900, 3600];

/// A job whose `running_at` is older than this is considered stuck.
pub const STUCK_TIMEOUT: Duration = Duration::seconds(7200);

/// Minimum delay since `last_run_at` before retrying a job with
/// `consecutive_errors` prior failures. Zero errors means no backoff.
pub fn backoff_delay(consecutive_errors: u32) -> Duration {
    if consecutive_errors == 0 {
        return Duration::zero();
    }
    let idx = (consecutive_errors as usize - 1).min(BACKOFF_SECONDS.len() - 1);
    Duration::seconds(BACKOFF_SECONDS[idx])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_errors_means_no_backoff() {
        assert_eq!(backoff_delay(0), Duration::zero());
    }

    #[test]
    fn backoff_escalates_then_caps() {
        assert_eq!(backoff_delay(1), Duration::seconds(30));
        assert_eq!(backoff_delay(2), Duration::seconds(60));
        assert_eq!(backoff_delay(5), Duration::seconds(3600));
        assert_eq!(backoff_delay(100), Duration::seconds(3600));
    }
}
