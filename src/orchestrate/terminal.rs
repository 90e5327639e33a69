// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Terminal session primitives, backed by tmux.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;

#[derive(Debug, thiserror::Error)]
pub enum TerminalError {
    #[error("tmux is not installed or not on PATH")]
    Unavailable,

    #[error("Session already exists: {0}")]
    SessionExists(String),

    #[error("tmux {command} failed: {message}")]
    Command { command: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Create, drive, and observe interactive terminal sessions.
#[async_trait]
pub trait TerminalSessions: Send + Sync {
    /// Fail fast if the multiplexer cannot be used.
    async fn ensure_available(&self) -> Result<(), TerminalError>;

    /// Start a detached session running `command` and return its process id.
    async fn create_session(
        &self,
        handle: &str,
        cwd: &Path,
        command: &str,
        env: &HashMap<String, String>,
    ) -> Result<Option<u32>, TerminalError>;

    /// Type `text` literally and press Enter. Empty text presses Enter only.
    async fn send_keys(&self, handle: &str, text: &str) -> Result<(), TerminalError>;

    /// Visible pane text, `None` if the session is gone.
    async fn capture_pane(&self, handle: &str) -> Option<String>;

    async fn is_alive(&self, handle: &str) -> bool;
}

/// tmux-backed sessions. Handles are tmux session names.
#[derive(Debug, Clone, Default)]
pub struct TmuxSessions;

impl TmuxSessions {
    pub fn new() -> Self {
        Self
    }

    async fn tmux(&self, args: &[&str]) -> Result<String, TerminalError> {
        let output = Command::new("tmux").args(args).output().await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            Err(TerminalError::Command {
                command: args.first().copied().unwrap_or_default().to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

/// Session handle for an agent: `flotilla-<project>-<agent>`, with the
/// characters tmux treats as target separators replaced.
pub fn session_handle(project: &str, agent_name: &str) -> String {
    format!("flotilla-{}-{}", project, agent_name)
        .chars()
        .map(|c| if c == '.' || c == ':' || c.is_whitespace() { '-' } else { c })
        .collect()
}

#[async_trait]
impl TerminalSessions for TmuxSessions {
    async fn ensure_available(&self) -> Result<(), TerminalError> {
        which::which("tmux").map_err(|_| TerminalError::Unavailable)?;
        Ok(())
    }

    async fn create_session(
        &self,
        handle: &str,
        cwd: &Path,
        command: &str,
        env: &HashMap<String, String>,
    ) -> Result<Option<u32>, TerminalError> {
        if self.is_alive(handle).await {
            return Err(TerminalError::SessionExists(handle.to_string()));
        }

        let cwd = cwd.to_string_lossy().to_string();
        let mut vars: Vec<String> = env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        vars.sort();

        let mut args = vec!["new-session", "-d", "-s", handle, "-c", cwd.as_str()];
        for var in &vars {
            args.push("-e");
            args.push(var);
        }
        args.push(command);
        self.tmux(&args).await?;

        let pid = self
            .tmux(&["list-panes", "-t", handle, "-F", "#{pane_pid}"])
            .await
            .ok()
            .and_then(|out| out.lines().next().and_then(|l| l.trim().parse().ok()));

        tracing::info!(handle, pid = ?pid, "Started tmux session");
        Ok(pid)
    }

    async fn send_keys(&self, handle: &str, text: &str) -> Result<(), TerminalError> {
        if !text.is_empty() {
            self.tmux(&["send-keys", "-t", handle, "-l", text]).await?;
        }
        self.tmux(&["send-keys", "-t", handle, "Enter"]).await?;
        Ok(())
    }

    async fn capture_pane(&self, handle: &str) -> Option<String> {
        self.tmux(&capture_args(handle)).await.ok()
    }

    async fn is_alive(&self, handle: &str) -> bool {
        // `=` pins an exact match instead of tmux's prefix matching
        let target = format!("={}", handle);
        self.tmux(&["has-session", "-t", &target]).await.is_ok()
    }
}

/// Visible screen only. Scrollback can still hold an accepted dialog.
fn capture_args(handle: &str) -> [&str; 4] {
    ["capture-pane", "-t", handle, "-p"]
}
