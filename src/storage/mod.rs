//! Storage engine for resync
//!
//! Handles SQLite database operations, WAL mode, and schema management for
//! sync state, job history and the lifecycle event log.

mod connection;
pub mod events;
mod migrations;
pub mod queries;

pub use connection::Storage;
pub use events::{SyncEvent, SyncEventKind};
pub use migrations::SCHEMA_VERSION;
