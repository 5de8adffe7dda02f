//! Stale running-job detection
//!
//! A runner that dies (process killed, tab closed) leaves its job `running`
//! with a heartbeat that stops moving. These functions decide when such a
//! job should be treated as dead. They never modify anything.

use chrono::{DateTime, Duration, Utc};

use crate::types::SyncJob;

/// Heartbeat age, in milliseconds, after which a running job is considered dead
pub const DEFAULT_STALE_THRESHOLD_MS: i64 = 60_000;

pub fn default_stale_threshold() -> Duration {
    Duration::milliseconds(DEFAULT_STALE_THRESHOLD_MS)
}

/// Stale check against the wall clock
///
/// `None` uses [`DEFAULT_STALE_THRESHOLD_MS`].
pub fn is_stale(job: &SyncJob, threshold: Option<Duration>) -> bool {
    is_stale_at(
        job,
        threshold.unwrap_or_else(default_stale_threshold),
        Utc::now(),
    )
}

/// Stale check against an explicit `now`
///
/// A job without any heartbeat is stale. The status is not consulted; a
/// finished job is only meaningful to callers that already filtered for
/// running ones.
pub fn is_stale_at(job: &SyncJob, threshold: Duration, now: DateTime<Utc>) -> bool {
    match job.heartbeat_at {
        None => true,
        Some(at) => now - at > threshold,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn job_with_heartbeat(heartbeat_at: Option<DateTime<Utc>>) -> SyncJob {
        let started = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut job = SyncJob::start("orders", None, started);
        job.heartbeat_at = heartbeat_at;
        job
    }

    #[test]
    fn test_default_threshold_boundaries() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();

        let old = job_with_heartbeat(Some(now - Duration::milliseconds(61_000)));
        assert!(is_stale_at(&old, default_stale_threshold(), now));

        let fresh = job_with_heartbeat(Some(now - Duration::milliseconds(10_000)));
        assert!(!is_stale_at(&fresh, default_stale_threshold(), now));

        let exact = job_with_heartbeat(Some(now - default_stale_threshold()));
        assert!(!is_stale_at(&exact, default_stale_threshold(), now));

        assert!(is_stale_at(&job_with_heartbeat(None), default_stale_threshold(), now));
    }

    #[test]
    fn test_custom_threshold() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();
        let job = job_with_heartbeat(Some(now - Duration::seconds(5)));

        assert!(is_stale_at(&job, Duration::seconds(2), now));
        assert!(!is_stale_at(&job, Duration::seconds(30), now));
    }

    #[test]
    fn test_wall_clock_variant() {
        let job = job_with_heartbeat(Some(Utc::now()));
        assert!(!is_stale(&job, Some(default_stale_threshold())));
        assert!(!is_stale(&job, None));
    }

    #[test]
    fn test_wall_clock_default_threshold() {
        let past_default = job_with_heartbeat(Some(Utc::now() - Duration::seconds(61)));
        assert!(is_stale(&past_default, None));
        assert!(!is_stale(&past_default, Some(Duration::minutes(10))));

        let within_default = job_with_heartbeat(Some(Utc::now() - Duration::seconds(20)));
        assert!(!is_stale(&within_default, None));
    }
}
