//! Background sync worker
//!
//! Drives [`SyncTracker::run_sync`] for one scope from a tokio task, on
//! demand and optionally on a fixed interval. Runs never overlap within a
//! worker; each one executes on the blocking pool because the store and the
//! runner are synchronous.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Interval, MissedTickBehavior};

use super::context::SyncRunner;
use super::tracker::SyncTracker;
use crate::error::{ResyncError, Result};
use crate::types::RunId;

/// Commands for the sync worker
#[derive(Debug)]
enum WorkerCommand {
    /// Run now
    Trigger,
    /// Stop the worker
    Stop,
}

/// Result of one run driven by the worker
#[derive(Debug, Clone)]
pub struct WorkerOutcome {
    /// Run id on success
    pub run_id: Option<RunId>,
    /// Recorded message on failure
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl WorkerOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Background sync worker for one scope
pub struct SyncWorker {
    sender: mpsc::Sender<WorkerCommand>,
    outcomes: watch::Receiver<Option<WorkerOutcome>>,
    handle: JoinHandle<()>,
}

impl SyncWorker {
    /// Spawn the worker on the current tokio runtime
    ///
    /// With `every` set, a run also starts on each tick (the first tick fires
    /// immediately).
    pub fn start<R>(
        tracker: SyncTracker,
        scope: impl Into<String>,
        runner: R,
        every: Option<Duration>,
    ) -> Self
    where
        R: SyncRunner + Send + 'static,
    {
        let (sender, mut receiver) = mpsc::channel::<WorkerCommand>(16);
        let (outcome_tx, outcomes) = watch::channel(None);
        let scope = scope.into();
        let runner = Arc::new(Mutex::new(runner));

        let handle = tokio::spawn(async move {
            let mut ticker = every.map(|period| {
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker
            });

            loop {
                tokio::select! {
                    cmd = receiver.recv() => match cmd {
                        Some(WorkerCommand::Trigger) => {
                            Self::run_once(&tracker, &scope, &runner, &outcome_tx).await;
                        }
                        Some(WorkerCommand::Stop) | None => break,
                    },
                    _ = next_tick(&mut ticker) => {
                        Self::run_once(&tracker, &scope, &runner, &outcome_tx).await;
                    }
                }
            }

            tracing::info!(scope = %scope, "Sync worker stopped");
        });

        Self {
            sender,
            outcomes,
            handle,
        }
    }

    async fn run_once<R>(
        tracker: &SyncTracker,
        scope: &str,
        runner: &Arc<Mutex<R>>,
        outcomes: &watch::Sender<Option<WorkerOutcome>>,
    ) where
        R: SyncRunner + Send + 'static,
    {
        let task_tracker = tracker.clone();
        let task_scope = scope.to_string();
        let runner = Arc::clone(runner);

        let result = tokio::task::spawn_blocking(move || {
            let mut runner = runner.lock();
            task_tracker.run_sync(&task_scope, &mut *runner)
        })
        .await;

        let (run_id, error) = match result {
            Ok(Ok(run_id)) => (Some(run_id), None),
            Ok(Err(e)) => {
                tracing::warn!(scope, "Worker run failed: {}", e);
                (None, Some(e.recorded_message()))
            }
            Err(e) => {
                tracing::error!(scope, "Worker run panicked: {}", e);
                (None, Some(format!("sync task panicked: {}", e)))
            }
        };

        outcomes.send_replace(Some(WorkerOutcome {
            run_id,
            error,
            finished_at: tracker.now(),
        }));
    }

    /// Request a run
    pub async fn trigger(&self) -> Result<()> {
        self.sender
            .send(WorkerCommand::Trigger)
            .await
            .map_err(|_| ResyncError::Worker("Worker channel closed".to_string()))
    }

    /// Latest outcome, updated after every run
    pub fn outcomes(&self) -> watch::Receiver<Option<WorkerOutcome>> {
        self.outcomes.clone()
    }

    /// Stop the worker and wait for an in-flight run to finish
    pub async fn stop(self) -> Result<()> {
        // A closed channel means the loop already exited
        let _ = self.sender.send(WorkerCommand::Stop).await;
        self.handle
            .await
            .map_err(|e| ResyncError::Worker(format!("Worker task failed: {}", e)))
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use crate::sync::SyncRunContext;
    use crate::types::{JobStatus, Watermark};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_trigger_runs_and_commits() {
        let tracker = SyncTracker::new(Storage::open_in_memory().unwrap());
        let worker = SyncWorker::start(
            tracker.clone(),
            "orders",
            |ctx: &SyncRunContext| -> Result<()> {
                ctx.heartbeat(Watermark::cursor("done"))?;
                Ok(())
            },
            None,
        );
        let mut outcomes = worker.outcomes();

        worker.trigger().await.unwrap();
        outcomes.changed().await.unwrap();
        let outcome = outcomes.borrow().clone().unwrap();
        assert!(outcome.is_success());

        let overview = tracker.get_overview("orders").unwrap();
        assert_eq!(
            overview.state.unwrap().last_committed_watermark,
            Some(Watermark::cursor("done"))
        );
        assert_eq!(overview.last_terminal_job.unwrap().run_id, outcome.run_id.unwrap());

        worker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_run_is_reported() {
        let tracker = SyncTracker::new(Storage::open_in_memory().unwrap());
        let worker = SyncWorker::start(
            tracker.clone(),
            "orders",
            |_ctx: &SyncRunContext| -> Result<()> { Err(anyhow::anyhow!("api down").into()) },
            None,
        );
        let mut outcomes = worker.outcomes();

        worker.trigger().await.unwrap();
        outcomes.changed().await.unwrap();
        let outcome = outcomes.borrow().clone().unwrap();
        assert_eq!(outcome.error.as_deref(), Some("api down"));

        let last = tracker.get_overview("orders").unwrap().last_terminal_job.unwrap();
        assert_eq!(last.status, JobStatus::Error);

        worker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_interval_runs_repeatedly() {
        let tracker = SyncTracker::new(Storage::open_in_memory().unwrap());
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);

        let worker = SyncWorker::start(
            tracker.clone(),
            "orders",
            move |_ctx: &SyncRunContext| -> Result<()> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            Some(Duration::from_millis(10)),
        );
        let mut outcomes = worker.outcomes();

        tokio::time::timeout(Duration::from_secs(5), async {
            while runs.load(Ordering::SeqCst) < 3 {
                outcomes.changed().await.unwrap();
            }
        })
        .await
        .unwrap();

        worker.stop().await.unwrap();
        assert!(tracker.job_history("orders", 10).unwrap().len() >= 3);
    }
}
