use std::str::FromStr;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::types::Schedule;

/// Compute the next UTC execution time for `schedule` starting *after*
/// `from`. `default_tz` is used for `Cron` schedules that don't name their
/// own timezone (the workspace's configured `cron_default_tz`).
///
/// Returns `None` when the schedule is exhausted (an `At` job whose time has
/// already passed) or malformed (bad cron expression / timezone name).
pub fn compute_next_run(
    schedule: &Schedule,
    from: DateTime<Utc>,
    default_tz: Option<&str>,
) -> Option<DateTime<Utc>> {
    match schedule {
        Schedule::At { at } => {
            if *at > from {
                Some(*at)
            } else {
                None
            }
        }

        Schedule::Every { every_seconds } => {
            if *every_seconds == 0 {
                return None;
            }
            Some(from + chrono::Duration::seconds(*every_seconds as i64))
        }

        Schedule::Cron { expr, tz } => {
            let tz_name = tz.as_deref().or(default_tz);
            compute_cron_next(expr, from, tz_name)
        }
    }
}

fn compute_cron_next(expr: &str, from: DateTime<Utc>, tz_name: Option<&str>) -> Option<DateTime<Utc>> {
    let parsed = match cron::Schedule::from_str(expr) {
        Ok(s) => s,
        Err(e) => {
            warn!(%expr, error = %e, "invalid cron expression");
            return None;
        }
    };

    match tz_name {
        Some(name) if !name.is_empty() => match name.parse::<chrono_tz::Tz>() {
            Ok(tz) => {
                let from_tz = from.with_timezone(&tz);
                parsed.after(&from_tz).next().map(|dt| dt.with_timezone(&Utc))
            }
            Err(_) => {
                warn!(tz = %name, "invalid timezone, falling back to UTC");
                parsed.after(&from).next()
            }
        },
        _ => parsed.after(&from).next(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn at_fires_only_while_in_future() {
        let now = Utc.with_ymd_and_hms(2026, 2, 15, 12, 0, 0).unwrap();
        let future = Schedule::At { at: now + chrono::Duration::hours(1) };
        let past = Schedule::At { at: now - chrono::Duration::hours(1) };
        assert!(compute_next_run(&future, now, None).is_some());
        assert!(compute_next_run(&past, now, None).is_none());
    }

    #[test]
    fn every_advances_by_interval() {
        let now = Utc.with_ymd_and_hms(2026, 2, 15, 12, 0, 0).unwrap();
        let sched = Schedule::Every { every_seconds: 3600 };
        let next = compute_next_run(&sched, now, None).unwrap();
        assert_eq!(next, now + chrono::Duration::hours(1));
    }

    #[test]
    fn every_zero_is_exhausted() {
        let now = Utc.with_ymd_and_hms(2026, 2, 15, 12, 0, 0).unwrap();
        let sched = Schedule::Every { every_seconds: 0 };
        assert!(compute_next_run(&sched, now, None).is_none());
    }

    #[test]
    fn cron_computes_next_match_in_utc() {
        let now = Utc.with_ymd_and_hms(2026, 2, 15, 8, 0, 0).unwrap();
        let sched = Schedule::Cron { expr: "0 0 9 * * *".to_string(), tz: None };
        let next = compute_next_run(&sched, now, None).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 2, 15, 9, 0, 0).unwrap());
    }

    #[test]
    fn cron_respects_explicit_timezone() {
        let now = Utc.with_ymd_and_hms(2026, 2, 15, 0, 0, 0).unwrap();
        let sched = Schedule::Cron {
            expr: "0 0 9 * * *".to_string(),
            tz: Some("Asia/Taipei".to_string()),
        };
        let next = compute_next_run(&sched, now, None).unwrap();
        // 09:00 Asia/Taipei (UTC+8) == 01:00 UTC
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 2, 15, 1, 0, 0).unwrap());
    }

    #[test]
    fn bad_cron_expression_returns_none() {
        let now = Utc.with_ymd_and_hms(2026, 2, 15, 8, 0, 0).unwrap();
        let sched = Schedule::Cron { expr: "not a cron".to_string(), tz: None };
        assert!(compute_next_run(&sched, now, None).is_none());
    }
}
