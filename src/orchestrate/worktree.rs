// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Git worktree isolator.
//!
//! Uses `git worktree` to give each agent a branch checked out under the
//! configured base directory.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::isolation::{
    branch_name_for, worktree_path_for, IsolationError, Workspace, WorkspaceIsolator,
};

/// Git worktree isolator for a single repository.
pub struct GitWorktreeIsolator {
    repo_root: PathBuf,
    base_dir: PathBuf,
}

impl GitWorktreeIsolator {
    pub fn new(repo_root: impl AsRef<Path>, base_dir: impl AsRef<Path>) -> Self {
        Self {
            repo_root: repo_root.as_ref().to_path_buf(),
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    /// Get the path where an agent's worktree would be created.
    pub fn worktree_path(&self, agent_name: &str) -> PathBuf {
        worktree_path_for(&self.repo_root, &self.base_dir, agent_name)
    }

    /// Run a git command in the main checkout and return trimmed stdout.
    async fn git(&self, args: &[&str]) -> Result<String, IsolationError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_root)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(IsolationError::Git(stderr.trim().to_string()))
        }
    }

    async fn branch_exists(&self, branch: &str) -> bool {
        self.git(&["rev-parse", "--verify", "--quiet", &format!("refs/heads/{}", branch)])
            .await
            .is_ok()
    }

    /// Check if a branch is checked out in any worktree.
    async fn is_branch_checked_out(&self, branch: &str) -> bool {
        let Ok(output) = self.git(&["worktree", "list", "--porcelain"]).await else {
            return false;
        };
        output
            .lines()
            .filter_map(|line| line.strip_prefix("branch refs/heads/"))
            .any(|checked| checked == branch)
    }
}

#[async_trait]
impl WorkspaceIsolator for GitWorktreeIsolator {
    async fn create(
        &self,
        agent_name: &str,
        base_branch: &str,
        task_id: &str,
    ) -> Result<Workspace, IsolationError> {
        let branch = branch_name_for(agent_name, task_id);
        let path = self.worktree_path(agent_name);

        if self.is_branch_checked_out(&branch).await {
            return Err(IsolationError::BranchInUse(branch));
        }
        if path.exists() {
            return Err(IsolationError::InvalidWorkspace(format!(
                "Directory already exists: {}",
                path.display()
            )));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!(branch = %branch, path = %path.display(), "Creating worktree");
        let path_str = path.to_string_lossy().to_string();

        // A branch left over from an earlier attempt is reused as is
        let result = if self.branch_exists(&branch).await {
            self.git(&["worktree", "add", &path_str, &branch]).await
        } else {
            self.git(&["worktree", "add", "-b", &branch, &path_str, base_branch])
                .await
        };

        match result {
            Ok(_) => {
                debug!(branch = %branch, "Created worktree");
                Ok(Workspace { path, branch })
            }
            Err(e) => Err(IsolationError::WorktreeCreationFailed(e.to_string())),
        }
    }

    async fn remove(&self, path: &Path) -> Result<(), IsolationError> {
        info!(path = %path.display(), "Removing worktree");
        let path_str = path.to_string_lossy().to_string();

        if let Err(e) = self.git(&["worktree", "remove", "--force", &path_str]).await {
            warn!("Failed to remove worktree via git: {}", e);
            if path.exists() {
                std::fs::remove_dir_all(path)?;
            }
            let _ = self.git(&["worktree", "prune"]).await;
        }
        Ok(())
    }
}
