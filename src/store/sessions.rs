// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! SQLite-backed session store.

use std::path::{Path, PathBuf};
#[cfg(feature = "telemetry")]
use std::time::Instant;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::StoreError;
use crate::types::{ActivityEvent, AgentSession, AgentState, Capability};

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

use super::{
    conversion_error, init_schema, millis_column, open_connection, optional_millis_column,
    sessions_db_path, to_millis,
};

const SESSION_COLUMNS: &str = "id, agent_name, capability, worktree_path, branch_name, task_id, \
     session_handle, state, process_id, parent_agent, depth, run_id, started_at, last_activity, \
     escalation_level, stalled_since, transcript_path";

/// Picks the newest row for a name; older rows are terminal history.
const LATEST_BY_NAME: &str =
    "SELECT id FROM sessions WHERE agent_name = ? ORDER BY started_at DESC, rowid DESC LIMIT 1";

/// Durable table of worker sessions.
///
/// Rows are never deleted, only moved to a terminal state.
pub struct SessionStore {
    conn: Connection,
    path: PathBuf,
}

impl SessionStore {
    /// Open or create the session store for a project.
    pub fn open(project_root: &Path) -> Result<Self, StoreError> {
        Self::open_at(&sessions_db_path(project_root))
    }

    /// Open or create a session store at a specific database path.
    pub fn open_at(db_path: &Path) -> Result<Self, StoreError> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let conn = open_connection(db_path)?;
        init_schema(&conn)?;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("store.sessions.open", start.elapsed());

        Ok(Self {
            conn,
            path: db_path.to_path_buf(),
        })
    }

    /// Insert a session, or replace every mutable column if the id exists.
    pub fn upsert(&self, session: &AgentSession) -> Result<(), StoreError> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        self.conn.execute(
            r#"
            INSERT INTO sessions (
                id, agent_name, capability, worktree_path, branch_name, task_id,
                session_handle, state, process_id, parent_agent, depth, run_id,
                started_at, last_activity, escalation_level, stalled_since, transcript_path
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                agent_name = excluded.agent_name,
                capability = excluded.capability,
                worktree_path = excluded.worktree_path,
                branch_name = excluded.branch_name,
                task_id = excluded.task_id,
                session_handle = excluded.session_handle,
                state = excluded.state,
                process_id = excluded.process_id,
                parent_agent = excluded.parent_agent,
                depth = excluded.depth,
                run_id = excluded.run_id,
                last_activity = excluded.last_activity,
                escalation_level = excluded.escalation_level,
                stalled_since = excluded.stalled_since,
                transcript_path = excluded.transcript_path
            "#,
            params![
                session.id,
                session.agent_name,
                session.capability.as_str(),
                session.worktree_path,
                session.branch_name,
                session.task_id,
                session.session_handle,
                session.state.as_str(),
                session.process_id,
                session.parent_agent,
                session.depth,
                session.run_id,
                to_millis(&session.started_at),
                to_millis(&session.last_activity),
                session.escalation_level,
                session.stalled_since.as_ref().map(to_millis),
                session.transcript_path,
            ],
        )?;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("store.sessions.upsert", start.elapsed());

        Ok(())
    }

    /// Get the most recent session with the given agent name.
    pub fn get_by_name(&self, agent_name: &str) -> Result<Option<AgentSession>, StoreError> {
        let sql = format!(
            "SELECT {} FROM sessions WHERE agent_name = ? ORDER BY started_at DESC, rowid DESC LIMIT 1",
            SESSION_COLUMNS
        );
        let session = self
            .conn
            .query_row(&sql, params![agent_name], map_session)
            .optional()?;
        Ok(session)
    }

    /// Sessions that count toward admission: state not zombie or completed.
    pub fn get_active(&self) -> Result<Vec<AgentSession>, StoreError> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let result = self.query(
            "WHERE state NOT IN ('zombie', 'completed') ORDER BY started_at ASC, rowid ASC",
            params![],
        );

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("store.sessions.get_active", start.elapsed());

        result
    }

    /// Every session ever recorded, oldest first.
    pub fn get_all(&self) -> Result<Vec<AgentSession>, StoreError> {
        self.query("ORDER BY started_at ASC, rowid ASC", params![])
    }

    /// Sessions created under a run.
    pub fn get_by_run(&self, run_id: &str) -> Result<Vec<AgentSession>, StoreError> {
        self.query("WHERE run_id = ? ORDER BY started_at ASC, rowid ASC", params![run_id])
    }

    /// Set the lifecycle state of the newest session with this name.
    ///
    /// Returns false when no such session exists.
    pub fn update_state(&self, agent_name: &str, state: AgentState) -> Result<bool, StoreError> {
        let sql = format!("UPDATE sessions SET state = ? WHERE id = ({})", LATEST_BY_NAME);
        let rows = self.conn.execute(&sql, params![state.as_str(), agent_name])?;
        Ok(rows > 0)
    }

    /// Record activity for the newest session with this name.
    pub fn update_last_activity(
        &self,
        agent_name: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let sql = format!(
            "UPDATE sessions SET last_activity = ? WHERE id = ({})",
            LATEST_BY_NAME
        );
        let rows = self.conn.execute(&sql, params![to_millis(&at), agent_name])?;
        Ok(rows > 0)
    }

    /// Record an escalation step taken by the watchdog.
    pub fn update_escalation(
        &self,
        agent_name: &str,
        level: u32,
        stalled_since: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        let sql = format!(
            "UPDATE sessions SET escalation_level = ?, stalled_since = ? WHERE id = ({})",
            LATEST_BY_NAME
        );
        let rows = self.conn.execute(
            &sql,
            params![level, stalled_since.as_ref().map(to_millis), agent_name],
        )?;
        Ok(rows > 0)
    }

    /// Attach the worker's transcript location once it is known.
    pub fn update_transcript_path(
        &self,
        agent_name: &str,
        transcript_path: &str,
    ) -> Result<bool, StoreError> {
        let sql = format!(
            "UPDATE sessions SET transcript_path = ? WHERE id = ({})",
            LATEST_BY_NAME
        );
        let rows = self.conn.execute(&sql, params![transcript_path, agent_name])?;
        Ok(rows > 0)
    }

    /// Apply a hook-reported event to the newest session with this name:
    /// refresh `last_activity` and move the state along. Sessions already
    /// zombie or completed only get the timestamp.
    ///
    /// Returns the resulting state, or `None` if no session has the name.
    pub fn record_activity(
        &self,
        agent_name: &str,
        event: ActivityEvent,
        at: DateTime<Utc>,
    ) -> Result<Option<AgentState>, StoreError> {
        let Some(session) = self.get_by_name(agent_name)? else {
            return Ok(None);
        };

        self.conn.execute(
            "UPDATE sessions SET last_activity = ? WHERE id = ?",
            params![to_millis(&at), session.id],
        )?;
        if session.state.is_terminal() {
            return Ok(Some(session.state));
        }

        let next = event.next_state(session.state);
        if next != session.state {
            self.conn.execute(
                "UPDATE sessions SET state = ?, stalled_since = NULL WHERE id = ?",
                params![next.as_str(), session.id],
            )?;
            tracing::debug!(agent = agent_name, from = %session.state, to = %next, "Session state changed");
        }
        Ok(Some(next))
    }

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn query<P: rusqlite::Params>(
        &self,
        clause: &str,
        params: P,
    ) -> Result<Vec<AgentSession>, StoreError> {
        let sql = format!("SELECT {} FROM sessions {}", SESSION_COLUMNS, clause);
        let mut stmt = self.conn.prepare(&sql)?;
        let sessions = stmt
            .query_map(params, map_session)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sessions)
    }
}

fn map_session(row: &Row<'_>) -> rusqlite::Result<AgentSession> {
    let capability: String = row.get(2)?;
    let state: String = row.get(7)?;

    Ok(AgentSession {
        id: row.get(0)?,
        agent_name: row.get(1)?,
        capability: capability
            .parse::<Capability>()
            .map_err(|e| conversion_error(2, e.to_string()))?,
        worktree_path: row.get(3)?,
        branch_name: row.get(4)?,
        task_id: row.get(5)?,
        session_handle: row.get(6)?,
        state: state.parse::<AgentState>().map_err(|e| conversion_error(7, e))?,
        process_id: row.get(8)?,
        parent_agent: row.get(9)?,
        depth: row.get(10)?,
        run_id: row.get(11)?,
        started_at: millis_column(row, 12)?,
        last_activity: millis_column(row, 13)?,
        escalation_level: row.get(14)?,
        stalled_since: optional_millis_column(row, 15)?,
        transcript_path: row.get(16)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn create_test_store() -> (SessionStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = SessionStore::open_at(&temp_dir.path().join("sessions.db")).unwrap();
        (store, temp_dir)
    }

    fn session(name: &str, task: &str, state: AgentState) -> AgentSession {
        let now = Utc::now();
        AgentSession {
            id: AgentSession::generate_id(name),
            agent_name: name.to_string(),
            capability: Capability::Builder,
            worktree_path: format!("/tmp/worktrees/{}", name),
            branch_name: format!("flotilla/{}/{}", name, task),
            task_id: task.to_string(),
            session_handle: format!("flotilla-test-{}", name),
            state,
            process_id: Some(1234),
            parent_agent: Some("lead-1".to_string()),
            depth: 1,
            run_id: Some("run-1".to_string()),
            started_at: now,
            last_activity: now,
            escalation_level: 0,
            stalled_since: None,
            transcript_path: None,
        }
    }

    #[test]
    fn test_upsert_and_get_by_name() {
        let (store, _temp) = create_test_store();
        let s = session("builder-1", "T1", AgentState::Booting);
        store.upsert(&s).unwrap();

        let retrieved = store.get_by_name("builder-1").unwrap().unwrap();
        assert_eq!(retrieved.id, s.id);
        assert_eq!(retrieved.capability, Capability::Builder);
        assert_eq!(retrieved.state, AgentState::Booting);
        assert_eq!(retrieved.parent_agent.as_deref(), Some("lead-1"));
        assert_eq!(retrieved.process_id, Some(1234));
        assert_eq!(
            retrieved.started_at.timestamp_millis(),
            s.started_at.timestamp_millis()
        );

        assert!(store.get_by_name("nobody").unwrap().is_none());
    }

    #[test]
    fn test_upsert_replaces_existing_row() {
        let (store, _temp) = create_test_store();
        let mut s = session("builder-1", "T1", AgentState::Booting);
        store.upsert(&s).unwrap();

        s.state = AgentState::Working;
        s.escalation_level = 2;
        store.upsert(&s).unwrap();

        let all = store.get_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].state, AgentState::Working);
        assert_eq!(all[0].escalation_level, 2);
    }

    #[test]
    fn test_get_active_excludes_terminal_states() {
        let (store, _temp) = create_test_store();
        store.upsert(&session("a", "T1", AgentState::Booting)).unwrap();
        store.upsert(&session("b", "T2", AgentState::Stalled)).unwrap();
        store.upsert(&session("c", "T3", AgentState::Zombie)).unwrap();
        store.upsert(&session("d", "T4", AgentState::Completed)).unwrap();

        let active: Vec<String> = store
            .get_active()
            .unwrap()
            .into_iter()
            .map(|s| s.agent_name)
            .collect();
        assert_eq!(active, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(store.get_all().unwrap().len(), 4);
    }

    #[test]
    fn test_get_by_run() {
        let (store, _temp) = create_test_store();
        store.upsert(&session("a", "T1", AgentState::Working)).unwrap();
        let mut other = session("b", "T2", AgentState::Working);
        other.run_id = Some("run-2".to_string());
        store.upsert(&other).unwrap();

        let in_run = store.get_by_run("run-2").unwrap();
        assert_eq!(in_run.len(), 1);
        assert_eq!(in_run[0].agent_name, "b");
    }

    #[test]
    fn test_updates_target_newest_row_for_name() {
        let (store, _temp) = create_test_store();
        let mut old = session("builder-1", "T1", AgentState::Completed);
        old.started_at = Utc::now() - Duration::hours(2);
        store.upsert(&old).unwrap();
        let current = session("builder-1", "T2", AgentState::Booting);
        store.upsert(&current).unwrap();

        assert!(store.update_state("builder-1", AgentState::Working).unwrap());
        let later = Utc::now() + Duration::seconds(5);
        assert!(store.update_last_activity("builder-1", later).unwrap());
        assert!(store.update_escalation("builder-1", 1, Some(later)).unwrap());
        assert!(store
            .update_transcript_path("builder-1", "/tmp/t.jsonl")
            .unwrap());

        let latest = store.get_by_name("builder-1").unwrap().unwrap();
        assert_eq!(latest.id, current.id);
        assert_eq!(latest.state, AgentState::Working);
        assert_eq!(latest.escalation_level, 1);
        assert!(latest.stalled_since.is_some());
        assert_eq!(latest.transcript_path.as_deref(), Some("/tmp/t.jsonl"));

        let history: Vec<AgentState> = store.get_all().unwrap().into_iter().map(|s| s.state).collect();
        assert_eq!(history, vec![AgentState::Completed, AgentState::Working]);

        assert!(!store.update_state("ghost", AgentState::Zombie).unwrap());
    }

    #[test]
    fn test_two_connections_see_each_others_writes() {
        let temp = TempDir::new().unwrap();
        let db = temp.path().join("sessions.db");
        let writer = SessionStore::open_at(&db).unwrap();
        let reader = SessionStore::open_at(&db).unwrap();

        writer.upsert(&session("a", "T1", AgentState::Booting)).unwrap();
        assert_eq!(reader.get_active().unwrap().len(), 1);
        assert_eq!(reader.path(), db.as_path());
    }

    #[test]
    fn test_record_activity() {
        let (store, _temp) = create_test_store();
        store.upsert(&session("b1", "T1", AgentState::Booting)).unwrap();

        let later = Utc::now() + Duration::seconds(5);
        let state = store
            .record_activity("b1", ActivityEvent::ToolUse, later)
            .unwrap();
        assert_eq!(state, Some(AgentState::Working));
        let row = store.get_by_name("b1").unwrap().unwrap();
        assert_eq!(row.last_activity.timestamp_millis(), later.timestamp_millis());

        let state = store
            .record_activity("b1", ActivityEvent::SessionEnd, later)
            .unwrap();
        assert_eq!(state, Some(AgentState::Completed));
        assert!(store.get_active().unwrap().is_empty());

        // Terminal sessions stay terminal
        let state = store
            .record_activity("b1", ActivityEvent::PromptSubmit, later)
            .unwrap();
        assert_eq!(state, Some(AgentState::Completed));

        assert_eq!(
            store.record_activity("ghost", ActivityEvent::ToolUse, later).unwrap(),
            None
        );
    }
}
