// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Expertise priming. Failures degrade to no primed context.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

#[async_trait]
pub trait ContextPrimer: Send + Sync {
    /// Project expertise relevant to `files`, or `None` if unavailable.
    async fn prime(&self, files: &[String]) -> Option<String>;
}

/// Runs `<command> prime [--files a,b]` in the project root.
pub struct CommandPrimer {
    command: String,
    cwd: PathBuf,
}

impl CommandPrimer {
    pub fn new(command: impl Into<String>, cwd: impl AsRef<Path>) -> Self {
        Self {
            command: command.into(),
            cwd: cwd.as_ref().to_path_buf(),
        }
    }

    fn args(files: &[String]) -> Vec<String> {
        let mut args = vec!["prime".to_string()];
        if !files.is_empty() {
            args.push("--files".to_string());
            args.push(files.join(","));
        }
        args
    }
}

#[async_trait]
impl ContextPrimer for CommandPrimer {
    async fn prime(&self, files: &[String]) -> Option<String> {
        if which::which(&self.command).is_err() {
            tracing::debug!(command = %self.command, "Primer not installed; skipping");
            return None;
        }

        let output = match Command::new(&self.command)
            .args(Self::args(files))
            .current_dir(&self.cwd)
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(command = %self.command, error = %e, "Priming failed");
                return None;
            }
        };

        if !output.status.success() {
            tracing::warn!(
                command = %self.command,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "Priming exited with an error"
            );
            return None;
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!text.is_empty()).then_some(text)
    }
}

/// Primer that never returns context, for when priming is disabled.
pub struct NoPrimer;

#[async_trait]
impl ContextPrimer for NoPrimer {
    async fn prime(&self, _files: &[String]) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args() {
        assert_eq!(CommandPrimer::args(&[]), vec!["prime"]);
        assert_eq!(
            CommandPrimer::args(&["a.rs".to_string(), "b.rs".to_string()]),
            vec!["prime", "--files", "a.rs,b.rs"]
        );
    }

    #[tokio::test]
    async fn test_missing_command_is_none() {
        let primer = CommandPrimer::new("flotilla-no-such-primer", ".");
        assert!(primer.prime(&[]).await.is_none());
        assert!(NoPrimer.prime(&[]).await.is_none());
    }
}
