//! Core types for resync

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a sync run
pub type RunId = Uuid;

/// Position marker for how far a scope has been synchronized
///
/// Opaque to the tracker: a source timestamp, a cursor token, or both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Watermark {
    /// Source-side timestamp of the last item covered
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Source-side cursor/page token
    #[serde(default)]
    pub cursor: Option<String>,
}

impl Watermark {
    /// Watermark at a source timestamp
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp: Some(timestamp),
            cursor: None,
        }
    }

    /// Watermark at a cursor token
    pub fn cursor(cursor: impl Into<String>) -> Self {
        Self {
            timestamp: None,
            cursor: Some(cursor.into()),
        }
    }

    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.timestamp.is_none() && self.cursor.is_none()
    }

    /// `None` when neither part is set
    pub fn from_parts(timestamp: Option<DateTime<Utc>>, cursor: Option<String>) -> Option<Self> {
        let wm = Self { timestamp, cursor };
        if wm.is_empty() {
            None
        } else {
            Some(wm)
        }
    }

    /// True if `self` is strictly behind `other` on the timestamp axis
    pub fn regresses_from(&self, other: &Watermark) -> bool {
        match (self.timestamp, other.timestamp) {
            (Some(new), Some(old)) => new < old,
            _ => false,
        }
    }
}

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Success,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "running" => Ok(JobStatus::Running),
            "success" => Ok(JobStatus::Success),
            "error" => Ok(JobStatus::Error),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

/// Committed sync position for one scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    /// Scope name (unique)
    pub scope: String,
    /// Last successfully committed position, `None` before the first success
    pub last_committed_watermark: Option<Watermark>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One run of a sync for a scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncJob {
    pub run_id: RunId,
    pub scope: String,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    /// Last liveness signal; `None` is treated as stale
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Committed watermark of the scope when this run started
    pub from_watermark: Option<Watermark>,
    /// Position reached so far (uncommitted until success)
    pub progress_watermark: Option<Watermark>,
    /// Failure message, only set when `status == Error`
    pub error: Option<String>,
}

impl SyncJob {
    /// Fresh running job seeded from the scope's committed watermark
    pub fn start(scope: &str, from: Option<Watermark>, now: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            scope: scope.to_string(),
            status: JobStatus::Running,
            started_at: now,
            heartbeat_at: Some(now),
            finished_at: None,
            progress_watermark: from.clone(),
            from_watermark: from,
            error: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == JobStatus::Running
    }
}

/// SQLite journal mode selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StorageMode {
    /// WAL journal, best for a local disk
    #[default]
    Local,
    /// DELETE journal, single file, safe inside Dropbox/iCloud style folders
    CloudSafe,
}

impl std::str::FromStr for StorageMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" | "wal" => Ok(StorageMode::Local),
            "cloud-safe" | "cloud_safe" | "delete" => Ok(StorageMode::CloudSafe),
            _ => Err(format!("Unknown storage mode: {}", s)),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to SQLite database (`:memory:` for an in-process store)
    pub db_path: String,
    /// Storage mode (local or cloud-safe)
    #[serde(default)]
    pub storage_mode: StorageMode,
}

impl StorageConfig {
    pub fn in_memory() -> Self {
        Self {
            db_path: ":memory:".to_string(),
            storage_mode: StorageMode::Local,
        }
    }
}

/// Lifecycle policy for the tracker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Heartbeat age after which a running job counts as stale
    #[serde(default = "default_stale_threshold_ms")]
    pub stale_threshold_ms: u64,
    /// Fail a stale running job and start fresh instead of resuming it
    #[serde(default)]
    pub reclaim_stale_on_start: bool,
}

fn default_stale_threshold_ms() -> u64 {
    60_000
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            stale_threshold_ms: default_stale_threshold_ms(),
            reclaim_stale_on_start: false,
        }
    }
}

impl TrackerConfig {
    /// Values beyond what a duration can hold saturate to the maximum
    pub fn stale_threshold(&self) -> chrono::Duration {
        i64::try_from(self.stale_threshold_ms)
            .ok()
            .and_then(chrono::Duration::try_milliseconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}
