//! Read-only status view of a scope for dashboards and polling

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use super::staleness::is_stale_at;
use crate::error::Result;
use crate::storage::queries::{find_last_terminal_job, find_running_job, get_state};
use crate::types::{SyncJob, SyncState};

/// Current state, in-flight job and last finished job of a scope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOverview {
    pub scope: String,
    /// `None` until the scope is first ensured or run
    pub state: Option<SyncState>,
    pub running_job: Option<SyncJob>,
    pub last_terminal_job: Option<SyncJob>,
}

/// Badge for a scope's running job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncActivity {
    /// Nothing running
    Idle,
    /// Running with a recent heartbeat
    Active,
    /// Running but the heartbeat is older than the threshold
    Stale,
}

impl std::fmt::Display for SyncActivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncActivity::Idle => write!(f, "idle"),
            SyncActivity::Active => write!(f, "active"),
            SyncActivity::Stale => write!(f, "stale"),
        }
    }
}

impl SyncOverview {
    pub fn activity_at(&self, threshold: Duration, now: DateTime<Utc>) -> SyncActivity {
        match &self.running_job {
            None => SyncActivity::Idle,
            Some(job) if is_stale_at(job, threshold, now) => SyncActivity::Stale,
            Some(_) => SyncActivity::Active,
        }
    }
}

/// Compose the overview from plain reads; writes nothing
pub fn load_overview(conn: &Connection, scope: &str) -> Result<SyncOverview> {
    Ok(SyncOverview {
        scope: scope.to_string(),
        state: get_state(conn, scope)?,
        running_job: find_running_job(conn, scope)?,
        last_terminal_job: find_last_terminal_job(conn, scope)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::queries::{insert_job, upsert_state};
    use crate::storage::Storage;
    use chrono::TimeZone;

    #[test]
    fn test_unknown_scope_is_empty_and_idle() {
        let storage = Storage::open_in_memory().unwrap();
        let overview = storage
            .with_connection(|conn| load_overview(conn, "nothing"))
            .unwrap();

        assert!(overview.state.is_none());
        assert!(overview.running_job.is_none());
        assert!(overview.last_terminal_job.is_none());
        assert_eq!(
            overview.activity_at(Duration::seconds(60), Utc::now()),
            SyncActivity::Idle
        );
    }

    #[test]
    fn test_running_job_badges() {
        let storage = Storage::open_in_memory().unwrap();
        let t0 = Utc.with_ymd_and_hms(2024, 4, 4, 4, 0, 0).unwrap();

        let overview = storage
            .with_connection(|conn| {
                upsert_state(conn, "orders", t0)?;
                insert_job(conn, &SyncJob::start("orders", None, t0))?;
                load_overview(conn, "orders")
            })
            .unwrap();

        let threshold = Duration::seconds(60);
        assert_eq!(
            overview.activity_at(threshold, t0 + Duration::seconds(30)),
            SyncActivity::Active
        );
        assert_eq!(
            overview.activity_at(threshold, t0 + Duration::seconds(61)),
            SyncActivity::Stale
        );
        assert_eq!(SyncActivity::Stale.to_string(), "stale");
    }
}
