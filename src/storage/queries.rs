//! Database queries for sync state and job rows
//!
//! Plain functions over a borrowed connection. Callers that need several of
//! them to apply together (commit, start-or-resume) run them inside
//! [`Storage::with_transaction`](super::Storage::with_transaction).
//!
//! Status-changing updates are conditional on `status = 'running'`, so a
//! runner that was superseded gets `Ok(false)` instead of clobbering a
//! finished row.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{ffi, params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::error::{ResyncError, Result};
use crate::types::{JobStatus, RunId, SyncJob, SyncState, Watermark};

const JOB_COLUMNS: &str = "run_id, scope, status, started_at, heartbeat_at, finished_at,
    from_watermark_ts, from_watermark_cursor, progress_watermark_ts, progress_watermark_cursor, error";

const STATE_COLUMNS: &str =
    "scope, last_watermark_ts, last_watermark_cursor, created_at, updated_at";

/// Fixed-width RFC 3339 so text ordering matches time ordering
pub fn format_ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_opt_ts(idx: usize, s: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.map(|s| parse_ts(idx, &s)).transpose()
}

fn watermark_parts(wm: Option<&Watermark>) -> (Option<String>, Option<&str>) {
    match wm {
        Some(wm) => (wm.timestamp.as_ref().map(format_ts), wm.cursor.as_deref()),
        None => (None, None),
    }
}

/// Parse a sync state from a database row
pub fn state_from_row(row: &Row) -> rusqlite::Result<SyncState> {
    let scope: String = row.get(0)?;
    let ts: Option<String> = row.get(1)?;
    let cursor: Option<String> = row.get(2)?;
    let created_at: String = row.get(3)?;
    let updated_at: String = row.get(4)?;

    Ok(SyncState {
        scope,
        last_committed_watermark: Watermark::from_parts(parse_opt_ts(1, ts)?, cursor),
        created_at: parse_ts(3, &created_at)?,
        updated_at: parse_ts(4, &updated_at)?,
    })
}

/// Parse a sync job from a database row
pub fn job_from_row(row: &Row) -> rusqlite::Result<SyncJob> {
    let run_id: String = row.get(0)?;
    let scope: String = row.get(1)?;
    let status: String = row.get(2)?;
    let started_at: String = row.get(3)?;
    let heartbeat_at: Option<String> = row.get(4)?;
    let finished_at: Option<String> = row.get(5)?;
    let from_ts: Option<String> = row.get(6)?;
    let from_cursor: Option<String> = row.get(7)?;
    let progress_ts: Option<String> = row.get(8)?;
    let progress_cursor: Option<String> = row.get(9)?;
    let error: Option<String> = row.get(10)?;

    let run_id = Uuid::parse_str(&run_id)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?;
    let status = status.parse::<JobStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(ResyncError::Storage(e)))
    })?;

    Ok(SyncJob {
        run_id,
        scope,
        status,
        started_at: parse_ts(3, &started_at)?,
        heartbeat_at: parse_opt_ts(4, heartbeat_at)?,
        finished_at: parse_opt_ts(5, finished_at)?,
        from_watermark: Watermark::from_parts(parse_opt_ts(6, from_ts)?, from_cursor),
        progress_watermark: Watermark::from_parts(parse_opt_ts(8, progress_ts)?, progress_cursor),
        error,
    })
}

fn validate_scope(scope: &str) -> Result<()> {
    if scope.trim().is_empty() {
        return Err(ResyncError::InvalidInput("scope must not be empty".to_string()));
    }
    Ok(())
}

/// Get the committed state of a scope
pub fn get_state(conn: &Connection, scope: &str) -> Result<Option<SyncState>> {
    let state = conn
        .query_row(
            &format!("SELECT {} FROM sync_state WHERE scope = ?", STATE_COLUMNS),
            params![scope],
            state_from_row,
        )
        .optional()?;
    Ok(state)
}

/// Create the state row for a scope if missing; existing rows are untouched
pub fn upsert_state(conn: &Connection, scope: &str, now: DateTime<Utc>) -> Result<SyncState> {
    validate_scope(scope)?;
    let now = format_ts(&now);

    conn.execute(
        "INSERT OR IGNORE INTO sync_state (scope, created_at, updated_at) VALUES (?, ?, ?)",
        params![scope, now, now],
    )?;

    get_state(conn, scope)?
        .ok_or_else(|| ResyncError::NotFound(format!("sync state for scope {}", scope)))
}

/// All known scopes, alphabetically
pub fn list_scopes(conn: &Connection) -> Result<Vec<SyncState>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM sync_state ORDER BY scope",
        STATE_COLUMNS
    ))?;
    let states = stmt
        .query_map([], state_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(states)
}

/// Insert a new job row
///
/// A clashing `run_id` is [`ResyncError::DuplicateRun`]; a second running job
/// for the scope is [`ResyncError::ScopeBusy`].
pub fn insert_job(conn: &Connection, job: &SyncJob) -> Result<()> {
    let (from_ts, from_cursor) = watermark_parts(job.from_watermark.as_ref());
    let (progress_ts, progress_cursor) = watermark_parts(job.progress_watermark.as_ref());

    let result = conn.execute(
        &format!(
            "INSERT INTO sync_jobs ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            JOB_COLUMNS
        ),
        params![
            job.run_id.to_string(),
            job.scope,
            job.status.as_str(),
            format_ts(&job.started_at),
            job.heartbeat_at.as_ref().map(format_ts),
            job.finished_at.as_ref().map(format_ts),
            from_ts,
            from_cursor,
            progress_ts,
            progress_cursor,
            job.error,
        ],
    );

    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
        {
            Err(ResyncError::DuplicateRun(job.run_id.to_string()))
        }
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            Err(ResyncError::ScopeBusy(job.scope.clone()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Get a job by run id
pub fn get_job(conn: &Connection, run_id: &RunId) -> Result<Option<SyncJob>> {
    let job = conn
        .query_row(
            &format!("SELECT {} FROM sync_jobs WHERE run_id = ?", JOB_COLUMNS),
            params![run_id.to_string()],
            job_from_row,
        )
        .optional()?;
    Ok(job)
}

/// The running job of a scope, if any
pub fn find_running_job(conn: &Connection, scope: &str) -> Result<Option<SyncJob>> {
    let job = conn
        .query_row(
            &format!(
                "SELECT {} FROM sync_jobs WHERE scope = ? AND status = 'running'
                 ORDER BY started_at DESC LIMIT 1",
                JOB_COLUMNS
            ),
            params![scope],
            job_from_row,
        )
        .optional()?;
    Ok(job)
}

/// Most recently started finished job (success or error) of a scope
pub fn find_last_terminal_job(conn: &Connection, scope: &str) -> Result<Option<SyncJob>> {
    let job = conn
        .query_row(
            &format!(
                "SELECT {} FROM sync_jobs WHERE scope = ? AND status != 'running'
                 ORDER BY started_at DESC, rowid DESC LIMIT 1",
                JOB_COLUMNS
            ),
            params![scope],
            job_from_row,
        )
        .optional()?;
    Ok(job)
}

/// Job history of a scope, newest first
pub fn list_jobs(conn: &Connection, scope: &str, limit: usize) -> Result<Vec<SyncJob>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM sync_jobs WHERE scope = ?
         ORDER BY started_at DESC, rowid DESC LIMIT ?",
        JOB_COLUMNS
    ))?;
    let jobs = stmt
        .query_map(params![scope, limit as i64], job_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(jobs)
}

/// Record liveness and progress of a running job
///
/// Returns `false` without touching the row if the job is no longer running.
pub fn update_heartbeat(
    conn: &Connection,
    run_id: &RunId,
    progress: &Watermark,
    now: DateTime<Utc>,
) -> Result<bool> {
    let (ts, cursor) = watermark_parts(Some(progress));
    let updated = conn.execute(
        "UPDATE sync_jobs SET
            heartbeat_at = ?,
            progress_watermark_ts = ?,
            progress_watermark_cursor = ?
         WHERE run_id = ? AND status = 'running'",
        params![format_ts(&now), ts, cursor, run_id.to_string()],
    )?;
    Ok(updated > 0)
}

/// Mark a job successful and commit its progress as the scope's watermark
///
/// Must run inside a transaction: the job update and the state update land
/// together or not at all. Returns `false` if the job is no longer running.
pub fn commit_success(conn: &Connection, run_id: &RunId, now: DateTime<Utc>) -> Result<bool> {
    let run_id = run_id.to_string();
    let now = format_ts(&now);

    let updated = conn.execute(
        "UPDATE sync_jobs SET status = 'success', finished_at = ?1, heartbeat_at = ?1
         WHERE run_id = ?2 AND status = 'running'",
        params![now, run_id],
    )?;
    if updated == 0 {
        return Ok(false);
    }

    let committed = conn.execute(
        "UPDATE sync_state SET
            last_watermark_ts = (SELECT progress_watermark_ts FROM sync_jobs WHERE run_id = ?1),
            last_watermark_cursor = (SELECT progress_watermark_cursor FROM sync_jobs WHERE run_id = ?1),
            updated_at = ?2
         WHERE scope = (SELECT scope FROM sync_jobs WHERE run_id = ?1)",
        params![run_id, now],
    )?;
    if committed == 0 {
        return Err(ResyncError::NotFound(format!(
            "sync state for run {}",
            run_id
        )));
    }

    Ok(true)
}

/// Mark a job failed; the scope's committed watermark is left alone
///
/// Returns `false` if the job is no longer running.
pub fn commit_failure(
    conn: &Connection,
    run_id: &RunId,
    error: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE sync_jobs SET status = 'error', finished_at = ?, error = ?
         WHERE run_id = ? AND status = 'running'",
        params![format_ts(&now), error, run_id.to_string()],
    )?;
    Ok(updated > 0)
}
