// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Core types for the flotilla orchestrator.
//!
//! This module defines the persisted data model shared by the stores, the
//! admission controller and the spawn orchestrator: worker capabilities,
//! session lifecycle states, agent sessions, and orchestration runs.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

// ============================================================================
// Capability
// ============================================================================

/// A worker's role, controlling what it is permitted to do and spawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Scout,
    Builder,
    Reviewer,
    Lead,
    Merger,
    Coordinator,
    Monitor,
}

impl Capability {
    /// All capabilities, in declaration order.
    pub const ALL: [Capability; 7] = [
        Capability::Scout,
        Capability::Builder,
        Capability::Reviewer,
        Capability::Lead,
        Capability::Merger,
        Capability::Coordinator,
        Capability::Monitor,
    ];

    /// Lowercase identifier as stored and accepted on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scout => "scout",
            Self::Builder => "builder",
            Self::Reviewer => "reviewer",
            Self::Lead => "lead",
            Self::Merger => "merger",
            Self::Coordinator => "coordinator",
            Self::Monitor => "monitor",
        }
    }

    /// Capabilities that must not modify files in their workspace.
    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::Scout | Self::Reviewer | Self::Monitor)
    }
}

impl Default for Capability {
    fn default() -> Self {
        Self::Builder
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| {
                let names: Vec<&str> = Self::ALL.iter().map(|c| c.as_str()).collect();
                ValidationError::invalid(
                    "capability",
                    s,
                    format!("must be one of: {}", names.join(", ")),
                )
            })
    }
}

// ============================================================================
// Agent State
// ============================================================================

/// Lifecycle state of a worker session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    /// Launched, handshake not yet confirmed by activity.
    Booting,
    /// Reporting activity.
    Working,
    /// No recent activity.
    Stalled,
    /// No longer considered alive, not yet completed.
    Zombie,
    /// Finished.
    Completed,
}

impl AgentState {
    /// Identifier as stored in the session table.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Booting => "booting",
            Self::Working => "working",
            Self::Stalled => "stalled",
            Self::Zombie => "zombie",
            Self::Completed => "completed",
        }
    }

    /// Active sessions count toward admission limits and hold task locks.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Zombie and completed sessions are excluded from admission.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Zombie | Self::Completed)
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "booting" => Ok(Self::Booting),
            "working" => Ok(Self::Working),
            "stalled" => Ok(Self::Stalled),
            "zombie" => Ok(Self::Zombie),
            "completed" => Ok(Self::Completed),
            other => Err(format!("unknown agent state: {}", other)),
        }
    }
}

/// Activity reported by an agent's deployed hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityEvent {
    PromptSubmit,
    ToolUse,
    TurnEnd,
    SessionEnd,
}

impl ActivityEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PromptSubmit => "prompt-submit",
            Self::ToolUse => "tool-use",
            Self::TurnEnd => "turn-end",
            Self::SessionEnd => "session-end",
        }
    }

    /// State a live session moves to after this event.
    pub fn next_state(&self, current: AgentState) -> AgentState {
        match (self, current) {
            (Self::SessionEnd, _) => AgentState::Completed,
            (_, AgentState::Booting | AgentState::Stalled) => AgentState::Working,
            (_, state) => state,
        }
    }
}

impl fmt::Display for ActivityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityEvent {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prompt-submit" => Ok(Self::PromptSubmit),
            "tool-use" => Ok(Self::ToolUse),
            "turn-end" => Ok(Self::TurnEnd),
            "session-end" => Ok(Self::SessionEnd),
            other => Err(ValidationError::invalid(
                "event",
                other,
                "must be one of: prompt-submit, tool-use, turn-end, session-end",
            )),
        }
    }
}

// ============================================================================
// Agent Session
// ============================================================================

/// One worker instance, as persisted in the session store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSession {
    /// Opaque unique identifier.
    pub id: String,
    /// Human-chosen name, unique among active sessions.
    pub agent_name: String,
    pub capability: Capability,
    pub worktree_path: String,
    pub branch_name: String,
    pub task_id: String,
    /// Terminal-session identifier.
    pub session_handle: String,
    pub state: AgentState,
    pub process_id: Option<u32>,
    /// Name of the spawning agent. A reference only; parents do not own children.
    pub parent_agent: Option<String>,
    pub depth: u32,
    pub run_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub escalation_level: u32,
    pub stalled_since: Option<DateTime<Utc>>,
    pub transcript_path: Option<String>,
}

impl AgentSession {
    /// Generate a unique session ID based on timestamp and UUID.
    pub fn generate_id(agent_name: &str) -> String {
        let now = Utc::now();
        let short_uuid = &uuid::Uuid::new_v4().to_string()[..8];
        format!("session-{}-{}-{}", now.format("%Y%m%d%H%M%S"), agent_name, short_uuid)
    }

    /// Whether this session counts toward admission limits.
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }
}

// ============================================================================
// Run
// ============================================================================

/// Status of an orchestration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Active,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown run status: {}", other)),
        }
    }
}

/// A batch of spawns sharing an identifier and an agent counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub coordinator_session_id: Option<String>,
    pub status: RunStatus,
    /// Number of sessions created under this run.
    pub agent_count: u32,
}

impl Run {
    /// Create a new active run with a generated id.
    pub fn new(coordinator_session_id: Option<String>) -> Self {
        let now = Utc::now();
        let short_uuid = &uuid::Uuid::new_v4().to_string()[..8];
        Self {
            id: format!("run-{}-{}", now.format("%Y%m%d%H%M%S"), short_uuid),
            started_at: now,
            completed_at: None,
            coordinator_session_id,
            status: RunStatus::Active,
            agent_count: 0,
        }
    }
}

// ============================================================================
// Spawn Result
// ============================================================================

/// Summary returned to the caller after a successful spawn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub agent_name: String,
    pub capability: Capability,
    pub task_id: String,
    pub branch: String,
    pub worktree: String,
    pub session_handle: String,
    pub pid: Option<u32>,
    pub run_id: String,
    pub runtime: String,
    /// Non-fatal warnings raised while spawning.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}
