// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for the flotilla orchestrator.
//!
//! Spawn failures fall into three kinds that callers can match on:
//!
//! - [`ValidationError`] - malformed or missing input (task id, name, numeric
//!   options, unworkable task status)
//! - [`HierarchyError`] - the parent/capability rule was violated
//! - [`AgentError`] - an admission policy or provisioning step refused the spawn
//!
//! Storage and configuration have their own error types, using `thiserror`
//! for definitions and `anyhow` for propagation at the CLI boundary.

use thiserror::Error;

/// Malformed or missing spawn input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid {field}{}: {message}", .value.as_ref().map(|v| format!(" '{}'", v)).unwrap_or_default())]
pub struct ValidationError {
    /// The offending option or field.
    pub field: String,
    /// The rejected value, when there was one.
    pub value: Option<String>,
    /// What was wrong with it.
    pub message: String,
}

impl ValidationError {
    /// Create a validation error for a field without a value.
    pub fn missing(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: None,
            message: message.into(),
        }
    }

    /// Create a validation error naming the rejected value.
    pub fn invalid(
        field: impl Into<String>,
        value: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            value: Some(value.into()),
            message: message.into(),
        }
    }
}

/// Structural violation of the parent/capability rule.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Hierarchy violation: {message} (capability: {capability}, parent: {})", .parent.as_deref().unwrap_or("none"))]
pub struct HierarchyError {
    /// Requested capability.
    pub capability: String,
    /// Requested parent agent, if any.
    pub parent: Option<String>,
    /// Explanation of the violated rule.
    pub message: String,
}

/// Admission policy violations and provisioning failures.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Depth limit exceeded: depth {depth} > maxDepth {max_depth}")]
    DepthExceeded { depth: u32, max_depth: u32 },

    #[error("Concurrency limit reached: {active} active sessions (maxConcurrent = {max})")]
    ConcurrencyLimit { active: usize, max: usize },

    #[error("Run session limit reached: run {run_id} has {count} agents (maxSessionsPerRun = {max})")]
    RunLimit { run_id: String, count: u32, max: u32 },

    #[error("Per-parent limit reached: {parent} has {count} active children (maxAgentsPerLead = {max})")]
    ParentLimit { parent: String, count: usize, max: u32 },

    #[error("Task {task_id} is already being worked by {holder}")]
    TaskLocked { task_id: String, holder: String },

    #[error("Task {task_id} already has an active lead: {holder}")]
    DuplicateLead { task_id: String, holder: String },

    #[error("Agent name already in use by an active session: {0}")]
    NameInUse(String),

    #[error("Refusing to spawn agents as root: agent backends reject elevated execution")]
    Elevated,

    #[error("Task tracker error: {0}")]
    Tracker(String),

    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("Overlay error: {0}")]
    Overlay(String),

    #[error("Runtime config error: {0}")]
    Config(String),

    #[error("Mail error: {0}")]
    Mail(String),

    #[error("Identity error: {0}")]
    Identity(String),

    #[error("Terminal backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Launch failed: {0}")]
    Launch(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Any error the spawn operation can surface.
#[derive(Error, Debug)]
pub enum SpawnError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Hierarchy(#[from] HierarchyError),

    #[error(transparent)]
    Agent(#[from] AgentError),
}

impl SpawnError {
    /// Short machine-readable kind, used in JSON output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Hierarchy(_) => "hierarchy",
            Self::Agent(_) => "agent",
        }
    }
}

impl From<StoreError> for SpawnError {
    fn from(err: StoreError) -> Self {
        Self::Agent(AgentError::Store(err))
    }
}

/// Errors from the session, run, and mail stores.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to open store at {path}: {message}")]
    Open { path: String, message: String },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Corrupted row: {0}")]
    Corrupted(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid config format: {0}")]
    InvalidFormat(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("IO error reading config: {0}")]
    IoError(String),

    #[error("YAML parsing error: {0}")]
    YamlError(String),

    #[error("JSON parsing error: {0}")]
    JsonError(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::IoError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::YamlError(err.to_string())
    }
}

/// Result type alias using anyhow for flexible error handling.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_names_field_and_value() {
        let err = ValidationError::invalid("depth", "-1", "must be a non-negative integer");
        let display = err.to_string();
        assert!(display.contains("depth"));
        assert!(display.contains("'-1'"));
        assert!(display.contains("non-negative"));

        let err = ValidationError::missing("name", "is required");
        assert_eq!(err.to_string(), "Invalid name: is required");
    }

    #[test]
    fn test_hierarchy_error_display() {
        let err = HierarchyError {
            capability: "builder".to_string(),
            parent: None,
            message: "only leads may be started without a parent".to_string(),
        };
        let display = err.to_string();
        assert!(display.contains("builder"));
        assert!(display.contains("parent: none"));
    }

    #[test]
    fn test_agent_error_names_limits() {
        let err = AgentError::ConcurrencyLimit { active: 2, max: 2 };
        assert!(err.to_string().contains("maxConcurrent = 2"));

        let err = AgentError::DepthExceeded { depth: 3, max_depth: 2 };
        assert!(err.to_string().contains("depth 3 > maxDepth 2"));
    }

    #[test]
    fn test_spawn_error_kind() {
        let err: SpawnError = ValidationError::missing("taskId", "is required").into();
        assert_eq!(err.kind(), "validation");

        let err: SpawnError = AgentError::Elevated.into();
        assert_eq!(err.kind(), "agent");

        let err: SpawnError = StoreError::RunNotFound("run-1".to_string()).into();
        assert!(matches!(err, SpawnError::Agent(AgentError::Store(_))));
    }

    #[test]
    fn test_config_error_from_json() {
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str("invalid json");
        let json_err = result.unwrap_err();
        let config_err: ConfigError = json_err.into();
        assert!(matches!(config_err, ConfigError::JsonError(_)));
    }
}
