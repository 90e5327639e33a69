// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Task tracker seam.
//!
//! The default tracker shells out to a beads-style CLI (`<command> show <id>
//! --json`, `<command> update <id> --status in_progress`).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;

/// Statuses a task may be in and still be picked up.
pub const WORKABLE_STATUSES: &[&str] = &["open", "in_progress"];

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("{command} failed: {message}")]
    Command { command: String, message: String },

    #[error("Unexpected tracker output: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A task as reported by the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TrackerTask {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub status: String,
}

impl TrackerTask {
    pub fn is_workable(&self) -> bool {
        WORKABLE_STATUSES.contains(&self.status.as_str())
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaskTracker: Send + Sync {
    async fn show(&self, task_id: &str) -> Result<TrackerTask, TrackerError>;

    /// Mark the task in progress.
    async fn claim(&self, task_id: &str) -> Result<(), TrackerError>;
}

/// Tracker backed by an external CLI run in the project root.
pub struct CliTaskTracker {
    command: String,
    cwd: PathBuf,
}

impl CliTaskTracker {
    pub fn new(command: impl Into<String>, cwd: impl AsRef<Path>) -> Self {
        Self {
            command: command.into(),
            cwd: cwd.as_ref().to_path_buf(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String, TrackerError> {
        let output = Command::new(&self.command)
            .args(args)
            .current_dir(&self.cwd)
            .output()
            .await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            Err(TrackerError::Command {
                command: format!("{} {}", self.command, args.join(" ")),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

/// Parse `show --json` output, which may be a single object or a one-element array.
pub fn parse_show_output(task_id: &str, stdout: &str) -> Result<TrackerTask, TrackerError> {
    let value: Value =
        serde_json::from_str(stdout.trim()).map_err(|e| TrackerError::Parse(e.to_string()))?;
    let task = match value {
        Value::Array(items) => items
            .into_iter()
            .next()
            .ok_or_else(|| TrackerError::NotFound(task_id.to_string()))?,
        other => other,
    };
    serde_json::from_value(task).map_err(|e| TrackerError::Parse(e.to_string()))
}

#[async_trait]
impl TaskTracker for CliTaskTracker {
    async fn show(&self, task_id: &str) -> Result<TrackerTask, TrackerError> {
        let stdout = self.run(&["show", task_id, "--json"]).await?;
        parse_show_output(task_id, &stdout)
    }

    async fn claim(&self, task_id: &str) -> Result<(), TrackerError> {
        self.run(&["update", task_id, "--status", "in_progress"])
            .await
            .map(|_| ())
    }
}
