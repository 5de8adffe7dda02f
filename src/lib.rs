//! Resync - resumable sync job tracking
//!
//! Tracks incremental sync runs per scope in SQLite: the last committed
//! watermark, the in-flight job with its heartbeat and progress, and the
//! history of finished runs. Crashed runs are resumed from where they
//! started rather than skipped.

pub mod clock;
pub mod error;
pub mod storage;
pub mod sync;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ResyncError, Result};
pub use storage::{Storage, SyncEvent, SyncEventKind};
pub use sync::{
    SyncActivity, SyncOverview, SyncRunContext, SyncRunner, SyncTracker, SyncWorker,
    WorkerOutcome,
};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
