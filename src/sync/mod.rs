//! Job lifecycle for resumable syncs
//!
//! A scope has at most one running job. [`SyncTracker::run_sync`] resumes
//! that job if one exists, otherwise starts a new one from the last
//! committed watermark, hands control to a [`SyncRunner`], and commits the
//! job's progress on success. The committed watermark only ever changes on a
//! successful commit.
//!
//! A job whose heartbeat is older than the stale threshold is reported as
//! stale but is still resumed; reclaiming it is an explicit operation.

mod context;
mod overview;
mod staleness;
mod tracker;
mod worker;

pub use context::{SyncRunContext, SyncRunner};
pub use overview::{load_overview, SyncActivity, SyncOverview};
pub use staleness::{default_stale_threshold, is_stale, is_stale_at, DEFAULT_STALE_THRESHOLD_MS};
pub use tracker::SyncTracker;
pub use worker::{SyncWorker, WorkerOutcome};
