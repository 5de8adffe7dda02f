//! Runner contract
//!
//! A [`SyncRunner`] does the actual transfer for one scope in bounded pages
//! and reports each finished page through [`SyncRunContext::heartbeat`]. The
//! context is the only write path a runner gets; it never sees the store.
//!
//! Resuming a job restarts the runner from the job's `from_watermark`, so
//! runners must upsert idempotently by natural key.

use std::cell::RefCell;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::error::Result;
use crate::storage::queries::update_heartbeat;
use crate::storage::Storage;
use crate::types::{RunId, SyncJob, Watermark};

/// Unit of sync work for one scope
pub trait SyncRunner {
    fn run(&mut self, ctx: &SyncRunContext) -> Result<()>;
}

impl<F> SyncRunner for F
where
    F: FnMut(&SyncRunContext) -> Result<()>,
{
    fn run(&mut self, ctx: &SyncRunContext) -> Result<()> {
        self(ctx)
    }
}

/// Handle given to a runner for the duration of one run
pub struct SyncRunContext {
    scope: String,
    run_id: RunId,
    from_watermark: Option<Watermark>,
    started_at: DateTime<Utc>,
    last_progress: RefCell<Option<Watermark>>,
    storage: Storage,
    clock: Arc<dyn Clock>,
}

impl SyncRunContext {
    pub(crate) fn new(job: &SyncJob, storage: Storage, clock: Arc<dyn Clock>) -> Self {
        Self {
            scope: job.scope.clone(),
            run_id: job.run_id,
            from_watermark: job.from_watermark.clone(),
            started_at: job.started_at,
            last_progress: RefCell::new(job.progress_watermark.clone()),
            storage,
            clock,
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Committed watermark this run started from
    pub fn from_watermark(&self) -> Option<&Watermark> {
        self.from_watermark.as_ref()
    }

    /// Timestamp part of the starting watermark
    pub fn from_timestamp(&self) -> Option<DateTime<Utc>> {
        self.from_watermark.as_ref().and_then(|wm| wm.timestamp)
    }

    /// Cursor part of the starting watermark
    pub fn from_cursor(&self) -> Option<&str> {
        self.from_watermark
            .as_ref()
            .and_then(|wm| wm.cursor.as_deref())
    }

    /// Persist liveness and the position reached so far
    ///
    /// Returns `false` if this run has been superseded (finished or
    /// reclaimed elsewhere); nothing is written in that case and the runner
    /// may stop early.
    pub fn heartbeat(&self, progress: Watermark) -> Result<bool> {
        if let Some(previous) = self.last_progress.borrow().as_ref() {
            if progress.regresses_from(previous) {
                tracing::warn!(
                    scope = %self.scope,
                    run_id = %self.run_id,
                    "Progress moved backwards: {:?} -> {:?}",
                    previous.timestamp,
                    progress.timestamp
                );
            }
        }

        let now = self.clock.now();
        let applied = self
            .storage
            .with_connection(|conn| update_heartbeat(conn, &self.run_id, &progress, now))?;

        if applied {
            *self.last_progress.borrow_mut() = Some(progress.clone());
            tracing::debug!(
                scope = %self.scope,
                run_id = %self.run_id,
                "Heartbeat at {:?}",
                progress
            );
        } else {
            tracing::warn!(
                scope = %self.scope,
                run_id = %self.run_id,
                "Heartbeat ignored, run is no longer running"
            );
        }

        Ok(applied)
    }
}
