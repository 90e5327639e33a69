// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! SQLite-backed run store with an atomic per-run agent counter.

use std::path::{Path, PathBuf};
#[cfg(feature = "telemetry")]
use std::time::Instant;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use crate::error::StoreError;
use crate::types::{Run, RunStatus};

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

use super::{
    conversion_error, init_schema, millis_column, open_connection, optional_millis_column,
    sessions_db_path, to_millis,
};

const RUN_COLUMNS: &str =
    "id, started_at, completed_at, coordinator_session_id, status, agent_count";

/// Durable table of orchestration runs plus the current-run pointer.
pub struct RunStore {
    conn: Connection,
    path: PathBuf,
}

impl RunStore {
    /// Open or create the run store for a project.
    pub fn open(project_root: &Path) -> Result<Self, StoreError> {
        Self::open_at(&sessions_db_path(project_root))
    }

    /// Open or create a run store at a specific database path.
    pub fn open_at(db_path: &Path) -> Result<Self, StoreError> {
        let conn = open_connection(db_path)?;
        init_schema(&conn)?;
        Ok(Self {
            conn,
            path: db_path.to_path_buf(),
        })
    }

    /// Persist a new run row.
    pub fn create_run(&self, run: &Run) -> Result<(), StoreError> {
        insert_run(&self.conn, run)
    }

    /// Get a run by id.
    pub fn get_run(&self, id: &str) -> Result<Option<Run>, StoreError> {
        let sql = format!("SELECT {} FROM runs WHERE id = ?", RUN_COLUMNS);
        let run = self.conn.query_row(&sql, params![id], map_run).optional()?;
        Ok(run)
    }

    /// All runs, newest first.
    pub fn list_runs(&self) -> Result<Vec<Run>, StoreError> {
        let sql = format!(
            "SELECT {} FROM runs ORDER BY started_at DESC, rowid DESC",
            RUN_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let runs = stmt
            .query_map([], map_run)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }

    /// The id recorded as the current run, if any.
    pub fn current_run_id(&self) -> Result<Option<String>, StoreError> {
        let id = self
            .conn
            .query_row("SELECT run_id FROM current_run WHERE slot = 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(id)
    }

    /// Return the current run, creating and recording one if none exists.
    ///
    /// Runs inside an IMMEDIATE transaction so concurrent first spawns
    /// converge on a single run instead of each creating their own.
    pub fn current_or_create(&mut self) -> Result<Run, StoreError> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing: Option<String> = tx
            .query_row("SELECT run_id FROM current_run WHERE slot = 1", [], |row| {
                row.get(0)
            })
            .optional()?;

        let sql = format!("SELECT {} FROM runs WHERE id = ?", RUN_COLUMNS);
        let recorded = match existing {
            Some(id) => tx.query_row(&sql, params![id], map_run).optional()?,
            None => None,
        };

        let run = match recorded {
            Some(run) => run,
            None => {
                let run = Run::new(None);
                insert_run(&tx, &run)?;
                set_current(&tx, &run.id)?;
                tracing::info!(run_id = %run.id, "Started new run");
                run
            }
        };

        tx.commit()?;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("store.runs.current_or_create", start.elapsed());

        Ok(run)
    }

    /// Start a fresh run and make it current, regardless of the previous one.
    pub fn start_new_run(&mut self, coordinator_session_id: Option<String>) -> Result<Run, StoreError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let run = Run::new(coordinator_session_id);
        insert_run(&tx, &run)?;
        set_current(&tx, &run.id)?;
        tx.commit()?;
        Ok(run)
    }

    /// Atomically bump the run's agent counter and return the new value.
    pub fn increment_agent_count(&self, run_id: &str) -> Result<u32, StoreError> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let rows = self.conn.execute(
            "UPDATE runs SET agent_count = agent_count + 1 WHERE id = ?",
            params![run_id],
        )?;
        if rows == 0 {
            return Err(StoreError::RunNotFound(run_id.to_string()));
        }

        let count: u32 = self.conn.query_row(
            "SELECT agent_count FROM runs WHERE id = ?",
            params![run_id],
            |row| row.get(0),
        )?;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("store.runs.increment", start.elapsed());

        Ok(count)
    }

    /// Mark a run finished and clear it as current if it was.
    pub fn complete_run(&self, run_id: &str, status: RunStatus) -> Result<(), StoreError> {
        let rows = self.conn.execute(
            "UPDATE runs SET status = ?, completed_at = ? WHERE id = ?",
            params![status.as_str(), to_millis(&Utc::now()), run_id],
        )?;
        if rows == 0 {
            return Err(StoreError::RunNotFound(run_id.to_string()));
        }
        self.conn.execute(
            "DELETE FROM current_run WHERE slot = 1 AND run_id = ?",
            params![run_id],
        )?;
        Ok(())
    }

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn insert_run(conn: &Connection, run: &Run) -> Result<(), StoreError> {
    conn.execute(
        r#"
        INSERT INTO runs (id, started_at, completed_at, coordinator_session_id, status, agent_count)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
        params![
            run.id,
            to_millis(&run.started_at),
            run.completed_at.as_ref().map(to_millis),
            run.coordinator_session_id,
            run.status.as_str(),
            run.agent_count,
        ],
    )?;
    Ok(())
}

fn set_current(conn: &Connection, run_id: &str) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO current_run (slot, run_id) VALUES (1, ?)
         ON CONFLICT(slot) DO UPDATE SET run_id = excluded.run_id",
        params![run_id],
    )?;
    Ok(())
}

fn map_run(row: &Row<'_>) -> rusqlite::Result<Run> {
    let status: String = row.get(4)?;
    Ok(Run {
        id: row.get(0)?,
        started_at: millis_column(row, 1)?,
        completed_at: optional_millis_column(row, 2)?,
        coordinator_session_id: row.get(3)?,
        status: status
            .parse::<RunStatus>()
            .map_err(|e| conversion_error(4, e))?,
        agent_count: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn create_test_store() -> (RunStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = RunStore::open_at(&temp_dir.path().join("sessions.db")).unwrap();
        (store, temp_dir)
    }

    #[test]
    fn test_current_or_create_is_lazy_and_stable() {
        let (mut store, _temp) = create_test_store();
        assert!(store.current_run_id().unwrap().is_none());

        let first = store.current_or_create().unwrap();
        let second = store.current_or_create().unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.current_run_id().unwrap(), Some(first.id.clone()));
        assert_eq!(store.list_runs().unwrap().len(), 1);
    }

    #[test]
    fn test_increment_agent_count() {
        let (mut store, _temp) = create_test_store();
        let run = store.current_or_create().unwrap();

        assert_eq!(store.increment_agent_count(&run.id).unwrap(), 1);
        assert_eq!(store.increment_agent_count(&run.id).unwrap(), 2);
        assert_eq!(store.get_run(&run.id).unwrap().unwrap().agent_count, 2);

        assert!(matches!(
            store.increment_agent_count("run-missing"),
            Err(StoreError::RunNotFound(_))
        ));
    }

    #[test]
    fn test_increment_is_atomic_across_connections() {
        let temp = TempDir::new().unwrap();
        let db = Arc::new(temp.path().join("sessions.db"));
        let run_id = {
            let mut store = RunStore::open_at(&db).unwrap();
            store.current_or_create().unwrap().id
        };

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let db = Arc::clone(&db);
                let run_id = run_id.clone();
                std::thread::spawn(move || {
                    let store = RunStore::open_at(&db).unwrap();
                    for _ in 0..10 {
                        store.increment_agent_count(&run_id).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let store = RunStore::open_at(&db).unwrap();
        assert_eq!(store.get_run(&run_id).unwrap().unwrap().agent_count, 40);
    }

    #[test]
    fn test_start_new_run_replaces_current() {
        let (mut store, _temp) = create_test_store();
        let first = store.current_or_create().unwrap();
        let second = store.start_new_run(Some("coord-session".to_string())).unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(store.current_run_id().unwrap(), Some(second.id.clone()));
        assert_eq!(
            store.get_run(&second.id).unwrap().unwrap().coordinator_session_id.as_deref(),
            Some("coord-session")
        );
    }

    #[test]
    fn test_complete_run_clears_current() {
        let (mut store, _temp) = create_test_store();
        let run = store.current_or_create().unwrap();
        store.complete_run(&run.id, RunStatus::Completed).unwrap();

        let stored = store.get_run(&run.id).unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Completed);
        assert!(stored.completed_at.is_some());
        assert!(store.current_run_id().unwrap().is_none());

        let next = store.current_or_create().unwrap();
        assert_ne!(next.id, run.id);
    }
}
