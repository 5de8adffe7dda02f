//! Job lifecycle manager
//!
//! [`SyncTracker`] is the single entry point that moves jobs between states:
//!
//! - `start_or_resume` attaches to the scope's running job or creates one
//!   seeded from the committed watermark, atomically.
//! - `run_sync` drives a runner and commits the outcome. Success advances the
//!   scope's watermark in the same transaction that finishes the job; failure
//!   records the message and leaves the watermark alone.
//! - `reclaim_if_stale` fails a running job whose heartbeat stopped so a
//!   fresh run can start. It only happens automatically when
//!   [`TrackerConfig::reclaim_stale_on_start`] is set.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde_json::json;

use super::context::{SyncRunContext, SyncRunner};
use super::overview::{load_overview, SyncActivity, SyncOverview};
use super::staleness::is_stale_at;
use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::storage::events::{list_events, log_event, SyncEvent, SyncEventKind};
use crate::storage::queries::{
    commit_failure, commit_success, find_running_job, get_job, insert_job, list_jobs,
    list_scopes, upsert_state,
};
use crate::storage::Storage;
use crate::types::{RunId, SyncJob, SyncState, TrackerConfig};

/// Resumable sync job tracker bound to one store
#[derive(Clone)]
pub struct SyncTracker {
    storage: Storage,
    clock: Arc<dyn Clock>,
    config: TrackerConfig,
}

impl SyncTracker {
    /// Tracker with the wall clock and default policy
    pub fn new(storage: Storage) -> Self {
        Self::with_config(storage, TrackerConfig::default())
    }

    pub fn with_config(storage: Storage, config: TrackerConfig) -> Self {
        Self {
            storage,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Create the scope's state row if it does not exist yet
    pub fn ensure_scope(&self, scope: &str) -> Result<SyncState> {
        let now = self.clock.now();
        self.storage
            .with_transaction(|conn| upsert_state(conn, scope, now))
    }

    /// Return the scope's running job, or start a new one
    ///
    /// The lookup and the insert share one write transaction, so two callers
    /// racing on the same scope end up attached to the same job.
    pub fn start_or_resume(&self, scope: &str) -> Result<SyncJob> {
        let now = self.clock.now();
        let threshold = self.config.stale_threshold();
        let reclaim_stale = self.config.reclaim_stale_on_start;

        let (job, resumed) = self.storage.with_transaction(|conn| {
            let state = upsert_state(conn, scope, now)?;

            if let Some(running) = find_running_job(conn, scope)? {
                if !(reclaim_stale && is_stale_at(&running, threshold, now)) {
                    log_event(conn, SyncEventKind::Resumed, scope, &running.run_id, now, None)?;
                    return Ok((running, true));
                }
                reclaim_job(conn, &running, now)?;
            }

            let job = SyncJob::start(scope, state.last_committed_watermark, now);
            insert_job(conn, &job)?;
            log_event(
                conn,
                SyncEventKind::Started,
                scope,
                &job.run_id,
                now,
                Some(&json!({ "from": job.from_watermark })),
            )?;
            Ok((job, false))
        })?;

        if resumed {
            tracing::info!(scope, run_id = %job.run_id, "Resumed running sync job");
        } else {
            tracing::info!(scope, run_id = %job.run_id, "Started sync job");
        }

        Ok(job)
    }

    /// Run `runner` for `scope` and commit its outcome
    ///
    /// A runner error is recorded on the job and then returned unchanged.
    pub fn run_sync<R>(&self, scope: &str, runner: &mut R) -> Result<RunId>
    where
        R: SyncRunner + ?Sized,
    {
        let job = self.start_or_resume(scope)?;
        let ctx = SyncRunContext::new(&job, self.storage.clone(), self.clock.clone());

        match runner.run(&ctx) {
            Ok(()) => {
                let now = self.clock.now();
                let committed = self.storage.with_transaction(|conn| {
                    if !commit_success(conn, &job.run_id, now)? {
                        return Ok(None);
                    }
                    let finished = get_job(conn, &job.run_id)?;
                    let watermark = finished.and_then(|j| j.progress_watermark);
                    log_event(
                        conn,
                        SyncEventKind::Succeeded,
                        scope,
                        &job.run_id,
                        now,
                        Some(&json!({ "watermark": watermark })),
                    )?;
                    Ok(Some(watermark))
                })?;

                match committed {
                    Some(watermark) => tracing::info!(
                        scope,
                        run_id = %job.run_id,
                        "Sync committed at {:?}",
                        watermark
                    ),
                    None => tracing::warn!(
                        scope,
                        run_id = %job.run_id,
                        "Sync finished but the job was superseded; watermark not committed"
                    ),
                }
                Ok(job.run_id)
            }
            Err(err) => {
                let message = err.recorded_message();
                let now = self.clock.now();
                let recorded = self.storage.with_transaction(|conn| {
                    let failed = commit_failure(conn, &job.run_id, &message, now)?;
                    if failed {
                        log_event(
                            conn,
                            SyncEventKind::Failed,
                            scope,
                            &job.run_id,
                            now,
                            Some(&json!({ "error": message })),
                        )?;
                    }
                    Ok(failed)
                });

                match recorded {
                    Ok(true) => {
                        tracing::warn!(scope, run_id = %job.run_id, "Sync failed: {}", message)
                    }
                    Ok(false) => tracing::warn!(
                        scope,
                        run_id = %job.run_id,
                        "Sync failed after the job was superseded: {}",
                        message
                    ),
                    Err(e) => tracing::error!(
                        scope,
                        run_id = %job.run_id,
                        "Sync failed ({}) and the failure could not be recorded: {}",
                        message,
                        e
                    ),
                }
                Err(err)
            }
        }
    }

    /// Committed state plus running and last finished job
    pub fn get_overview(&self, scope: &str) -> Result<SyncOverview> {
        self.storage
            .with_connection(|conn| load_overview(conn, scope))
    }

    /// Badge for an overview under this tracker's threshold and clock
    pub fn activity(&self, overview: &SyncOverview) -> SyncActivity {
        overview.activity_at(self.config.stale_threshold(), self.clock.now())
    }

    /// Stale check under this tracker's threshold and clock
    pub fn is_stale(&self, job: &SyncJob) -> bool {
        is_stale_at(job, self.config.stale_threshold(), self.clock.now())
    }

    /// Fail the scope's running job if its heartbeat is stale
    ///
    /// Returns the reclaimed job, or `None` when nothing is running or the
    /// running job is still alive.
    pub fn reclaim_if_stale(&self, scope: &str) -> Result<Option<SyncJob>> {
        let now = self.clock.now();
        let threshold = self.config.stale_threshold();

        let reclaimed = self.storage.with_transaction(|conn| {
            let Some(running) = find_running_job(conn, scope)? else {
                return Ok(None);
            };
            if !is_stale_at(&running, threshold, now) {
                return Ok(None);
            }
            if !reclaim_job(conn, &running, now)? {
                return Ok(None);
            }
            get_job(conn, &running.run_id)
        })?;

        Ok(reclaimed)
    }

    /// Job history, newest first
    pub fn job_history(&self, scope: &str, limit: usize) -> Result<Vec<SyncJob>> {
        self.storage
            .with_connection(|conn| list_jobs(conn, scope, limit))
    }

    /// Lifecycle events, newest first
    pub fn events(&self, scope: &str, limit: usize) -> Result<Vec<SyncEvent>> {
        self.storage
            .with_connection(|conn| list_events(conn, scope, limit))
    }

    /// Every scope the store knows about
    pub fn scopes(&self) -> Result<Vec<SyncState>> {
        self.storage.with_connection(list_scopes)
    }
}

fn reclaim_job(conn: &Connection, job: &SyncJob, now: DateTime<Utc>) -> Result<bool> {
    let last_seen = job
        .heartbeat_at
        .map(|at| at.to_rfc3339())
        .unwrap_or_else(|| "never".to_string());
    let message = format!("reclaimed: no heartbeat since {}", last_seen);

    if !commit_failure(conn, &job.run_id, &message, now)? {
        return Ok(false);
    }
    log_event(
        conn,
        SyncEventKind::Reclaimed,
        &job.scope,
        &job.run_id,
        now,
        Some(&json!({ "heartbeat_at": job.heartbeat_at })),
    )?;

    tracing::warn!(
        scope = %job.scope,
        run_id = %job.run_id,
        "Reclaimed stale sync job (last heartbeat {})",
        last_seen
    );
    Ok(true)
}
