//! Property-based tests for resync
//!
//! These tests verify invariants that must hold for all inputs:
//! - Parsers never panic
//! - Staleness is exactly "heartbeat older than threshold"
//! - Committed watermarks only move on success
//!
//! Run with: cargo test --test property_tests

use proptest::prelude::*;

// ============================================================================
// PARSER TESTS
// ============================================================================

mod parser_tests {
    use super::*;
    use resync::storage::SyncEventKind;
    use resync::types::{JobStatus, StorageMode};

    proptest! {
        /// Invariant: status parsing never panics on any string input
        #[test]
        fn job_status_never_panics(s in ".*") {
            let _ = s.parse::<JobStatus>();
        }

        /// Invariant: storage mode parsing never panics on any string input
        #[test]
        fn storage_mode_never_panics(s in ".*") {
            let _ = s.parse::<StorageMode>();
        }

        /// Invariant: event kind parsing never panics on any string input
        #[test]
        fn event_kind_never_panics(s in ".*") {
            let _ = s.parse::<SyncEventKind>();
        }

        /// Invariant: status parsing is case-insensitive for known values
        #[test]
        fn job_status_case_insensitive(idx in 0usize..3, upper in any::<bool>()) {
            let status = [JobStatus::Running, JobStatus::Success, JobStatus::Error][idx];
            let text = if upper {
                status.as_str().to_uppercase()
            } else {
                status.as_str().to_string()
            };
            prop_assert_eq!(text.parse::<JobStatus>(), Ok(status));
        }
    }
}

// ============================================================================
// WATERMARK TESTS
// ============================================================================

mod watermark_tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use resync::types::Watermark;

    proptest! {
        /// Invariant: from_parts is None exactly when both parts are missing
        #[test]
        fn from_parts_none_iff_empty(
            secs in proptest::option::of(0i64..1_000_000),
            cursor in proptest::option::of("[a-z0-9]{0,12}"),
        ) {
            let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
            let timestamp = secs.map(|s| base + Duration::seconds(s));
            let both_missing = timestamp.is_none() && cursor.is_none();

            let wm = Watermark::from_parts(timestamp, cursor);
            prop_assert_eq!(wm.is_none(), both_missing);
        }

        /// Invariant: regression only compares timestamps and is strict
        #[test]
        fn regression_is_strict(a in 0i64..10_000, b in 0i64..10_000) {
            let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
            let older = Watermark::at(base + Duration::seconds(a));
            let newer = Watermark::at(base + Duration::seconds(b));

            prop_assert_eq!(newer.regresses_from(&older), b < a);
            prop_assert!(!Watermark::cursor("x").regresses_from(&older));
        }
    }
}

// ============================================================================
// STALENESS TESTS
// ============================================================================

mod staleness_tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use resync::sync::is_stale_at;
    use resync::types::SyncJob;

    proptest! {
        /// Invariant: stale iff the heartbeat is strictly older than the threshold
        #[test]
        fn stale_iff_older_than_threshold(age_ms in 0i64..600_000, threshold_ms in 0i64..600_000) {
            let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
            let mut job = SyncJob::start("orders", None, now - Duration::hours(1));
            job.heartbeat_at = Some(now - Duration::milliseconds(age_ms));

            prop_assert_eq!(
                is_stale_at(&job, Duration::milliseconds(threshold_ms), now),
                age_ms > threshold_ms
            );
        }
    }
}

// ============================================================================
// LIFECYCLE TESTS
// ============================================================================

mod lifecycle_tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use resync::clock::ManualClock;
    use resync::error::Result;
    use resync::storage::Storage;
    use resync::sync::{SyncRunContext, SyncTracker};
    use resync::types::Watermark;
    use std::sync::Arc;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Invariant: the committed watermark is the progress of the last
        /// successful run, whatever failures came in between
        #[test]
        fn committed_tracks_last_success(outcomes in proptest::collection::vec(any::<bool>(), 1..12)) {
            let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
            let tracker = SyncTracker::new(Storage::open_in_memory().unwrap())
                .with_clock(Arc::new(clock.clone()));
            let mut expected: Option<Watermark> = None;

            for (i, succeed) in outcomes.into_iter().enumerate() {
                let cursor = format!("c-{}", i);
                let result = tracker.run_sync("orders", &mut |ctx: &SyncRunContext| -> Result<()> {
                    ctx.heartbeat(Watermark::cursor(cursor.clone()))?;
                    if succeed {
                        Ok(())
                    } else {
                        Err(anyhow::anyhow!("run {} failed", i).into())
                    }
                });
                prop_assert_eq!(result.is_ok(), succeed);
                if succeed {
                    expected = Some(Watermark::cursor(cursor));
                }

                let state = tracker.get_overview("orders").unwrap().state.unwrap();
                prop_assert_eq!(state.last_committed_watermark, expected.clone());
                clock.advance(Duration::seconds(1));
            }
        }
    }
}
