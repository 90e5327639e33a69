// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Durable session and run state.
//!
//! Both stores live in one SQLite database (`.flotilla/sessions.db`) opened
//! in WAL mode. Every orchestrator process opens its own connection, so the
//! only cross-process guarantees are the ones SQLite gives for a single
//! statement or transaction:
//!
//! - session rows are written with a single atomic upsert
//! - `agent_count` is incremented in place (`agent_count = agent_count + 1`)
//! - readers never observe a partially written row
//!
//! Admission reads a snapshot and decides without holding a lock, so two
//! concurrent spawns can both pass a check before either writes. That narrow
//! double-admission window is accepted.
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐
//! │ SessionStore │   │   RunStore   │
//! └──────┬───────┘   └──────┬───────┘
//!        └────────┬─────────┘
//!                 ▼
//!        .flotilla/sessions.db
//!   sessions | runs | current_run
//! ```

pub mod runs;
pub mod sessions;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, Row};

use crate::error::StoreError;

pub use runs::RunStore;
pub use sessions::SessionStore;

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Directory under the project root holding flotilla state.
pub const STATE_DIR: &str = ".flotilla";

/// Database file name inside [`STATE_DIR`].
pub const SESSIONS_DB: &str = "sessions.db";

/// How long a writer waits for a competing process before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Path of the session database for a project.
pub fn sessions_db_path(project_root: &Path) -> PathBuf {
    project_root.join(STATE_DIR).join(SESSIONS_DB)
}

/// Open a connection with the pragmas every store relies on.
pub(crate) fn open_connection(db_path: &Path) -> Result<Connection, StoreError> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(db_path).map_err(|e| StoreError::Open {
        path: db_path.display().to_string(),
        message: e.to_string(),
    })?;

    conn.busy_timeout(BUSY_TIMEOUT)?;
    // Enable WAL mode for better concurrency
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

    Ok(conn)
}

/// Create every table both stores need. Idempotent.
pub(crate) fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );

        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            agent_name TEXT NOT NULL,
            capability TEXT NOT NULL,
            worktree_path TEXT NOT NULL,
            branch_name TEXT NOT NULL,
            task_id TEXT NOT NULL,
            session_handle TEXT NOT NULL,
            state TEXT NOT NULL DEFAULT 'booting',
            process_id INTEGER,
            parent_agent TEXT,
            depth INTEGER NOT NULL DEFAULT 0,
            run_id TEXT,
            started_at INTEGER NOT NULL,
            last_activity INTEGER NOT NULL,
            escalation_level INTEGER NOT NULL DEFAULT 0,
            stalled_since INTEGER,
            transcript_path TEXT
        );

        CREATE TABLE IF NOT EXISTS runs (
            id TEXT PRIMARY KEY,
            started_at INTEGER NOT NULL,
            completed_at INTEGER,
            coordinator_session_id TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            agent_count INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS current_run (
            slot INTEGER PRIMARY KEY CHECK (slot = 1),
            run_id TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_agent_name ON sessions(agent_name);
        CREATE INDEX IF NOT EXISTS idx_sessions_state ON sessions(state);
        CREATE INDEX IF NOT EXISTS idx_sessions_run_id ON sessions(run_id);
        CREATE INDEX IF NOT EXISTS idx_sessions_task_id ON sessions(task_id);
        "#,
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?)",
        [SCHEMA_VERSION],
    )?;

    Ok(())
}

pub(crate) fn to_millis(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, message.into())
}

/// Read an epoch-milliseconds column as a UTC timestamp.
pub(crate) fn millis_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| conversion_error(idx, format!("invalid timestamp: {}", ms)))
}

pub(crate) fn optional_millis_column(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let ms: Option<i64> = row.get(idx)?;
    match ms {
        Some(_) => millis_column(row, idx).map(Some),
        None => Ok(None),
    }
}
