//! Lifecycle event log
//!
//! Append-only record of job transitions per scope. Heartbeats are not
//! logged; the job row already carries the latest one.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use super::queries::format_ts;
use crate::error::Result;
use crate::types::RunId;

/// Event log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEvent {
    pub id: i64,
    pub scope: String,
    pub run_id: RunId,
    pub kind: SyncEventKind,
    pub at: DateTime<Utc>,
    pub detail: Option<serde_json::Value>,
}

/// Kinds of lifecycle transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncEventKind {
    Started,
    Resumed,
    Succeeded,
    Failed,
    Reclaimed,
}

impl SyncEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncEventKind::Started => "started",
            SyncEventKind::Resumed => "resumed",
            SyncEventKind::Succeeded => "succeeded",
            SyncEventKind::Failed => "failed",
            SyncEventKind::Reclaimed => "reclaimed",
        }
    }
}

impl std::str::FromStr for SyncEventKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "started" => Ok(SyncEventKind::Started),
            "resumed" => Ok(SyncEventKind::Resumed),
            "succeeded" => Ok(SyncEventKind::Succeeded),
            "failed" => Ok(SyncEventKind::Failed),
            "reclaimed" => Ok(SyncEventKind::Reclaimed),
            _ => Err(format!("Unknown sync event kind: {}", s)),
        }
    }
}

/// Append an event
pub fn log_event(
    conn: &Connection,
    kind: SyncEventKind,
    scope: &str,
    run_id: &RunId,
    at: DateTime<Utc>,
    detail: Option<&serde_json::Value>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO sync_events (scope, run_id, kind, at, detail) VALUES (?, ?, ?, ?, ?)",
        params![
            scope,
            run_id.to_string(),
            kind.as_str(),
            format_ts(&at),
            detail.map(|d| d.to_string()),
        ],
    )?;

    Ok(conn.last_insert_rowid())
}

/// Events of a scope, newest first
pub fn list_events(conn: &Connection, scope: &str, limit: usize) -> Result<Vec<SyncEvent>> {
    let mut stmt = conn.prepare(
        "SELECT id, scope, run_id, kind, at, detail FROM sync_events
         WHERE scope = ? ORDER BY id DESC LIMIT ?",
    )?;

    let rows = stmt.query_map(params![scope, limit as i64], |row| {
        let id: i64 = row.get(0)?;
        let scope: String = row.get(1)?;
        let run_id: String = row.get(2)?;
        let kind: String = row.get(3)?;
        let at: String = row.get(4)?;
        let detail: Option<String> = row.get(5)?;
        Ok((id, scope, run_id, kind, at, detail))
    })?;

    let mut events = Vec::new();
    for row in rows {
        let (id, scope, run_id, kind, at, detail) = row?;
        let Ok(kind) = kind.parse::<SyncEventKind>() else {
            tracing::warn!("Skipping event {} with unknown kind {:?}", id, kind);
            continue;
        };
        let Ok(run_id) = run_id.parse::<RunId>() else {
            tracing::warn!("Skipping event {} with malformed run id", id);
            continue;
        };

        let Ok(at) = DateTime::parse_from_rfc3339(&at) else {
            tracing::warn!("Skipping event {} with malformed timestamp {:?}", id, at);
            continue;
        };
        let detail = match detail
            .map(|d| serde_json::from_str::<serde_json::Value>(&d))
            .transpose()
        {
            Ok(detail) => detail,
            Err(e) => {
                tracing::warn!("Skipping event {} with malformed detail: {}", id, e);
                continue;
            }
        };

        events.push(SyncEvent {
            id,
            scope,
            run_id,
            kind,
            at: at.with_timezone(&Utc),
            detail,
        });
    }

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use chrono::TimeZone;
    use uuid::Uuid;

    #[test]
    fn test_log_and_list_events() {
        let storage = Storage::open_in_memory().unwrap();
        let at = Utc.with_ymd_and_hms(2024, 2, 2, 2, 2, 2).unwrap();
        let run = Uuid::new_v4();

        storage
            .with_connection(|conn| {
                log_event(conn, SyncEventKind::Started, "orders", &run, at, None)?;
                log_event(
                    conn,
                    SyncEventKind::Failed,
                    "orders",
                    &run,
                    at,
                    Some(&serde_json::json!({ "error": "timeout" })),
                )?;
                log_event(conn, SyncEventKind::Started, "customers", &run, at, None)?;

                let events = list_events(conn, "orders", 10)?;
                assert_eq!(events.len(), 2);
                assert_eq!(events[0].kind, SyncEventKind::Failed);
                assert_eq!(events[0].detail.as_ref().unwrap()["error"], "timeout");
                assert_eq!(events[1].kind, SyncEventKind::Started);
                assert_eq!(events[1].at, at);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_malformed_rows_are_skipped() {
        let storage = Storage::open_in_memory().unwrap();
        let at = Utc.with_ymd_and_hms(2024, 2, 2, 2, 2, 2).unwrap();
        let run = Uuid::new_v4();

        storage
            .with_connection(|conn| {
                log_event(conn, SyncEventKind::Started, "orders", &run, at, None)?;
                conn.execute(
                    "INSERT INTO sync_events (scope, run_id, kind, at, detail)
                     VALUES ('orders', ?1, 'failed', 'yesterday', NULL),
                            ('orders', ?1, 'failed', ?2, '{not json'),
                            ('orders', ?1, 'exploded', ?2, NULL)",
                    params![run.to_string(), format_ts(&at)],
                )?;

                let events = list_events(conn, "orders", 10)?;
                assert_eq!(events.len(), 1);
                assert_eq!(events[0].kind, SyncEventKind::Started);
                assert_eq!(events[0].at, at);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_event_kind_strings() {
        for kind in [
            SyncEventKind::Started,
            SyncEventKind::Resumed,
            SyncEventKind::Succeeded,
            SyncEventKind::Failed,
            SyncEventKind::Reclaimed,
        ] {
            assert_eq!(kind.as_str().parse::<SyncEventKind>(), Ok(kind));
        }
    }
}
