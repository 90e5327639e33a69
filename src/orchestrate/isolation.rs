// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Workspace isolation trait and path conventions.
//!
//! Every agent works in its own branch-scoped copy of the repository:
//!
//! ```text
//! /project/                          # Main checkout
//! ├── .git/
//! └── .flotilla/
//!     └── worktrees/
//!         └── builder-1/             # branch flotilla/builder-1/T-42
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;

/// Error type for workspace isolation operations.
#[derive(Debug, thiserror::Error)]
pub enum IsolationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Git error: {0}")]
    Git(String),

    #[error("Branch already in use: {0}")]
    BranchInUse(String),

    #[error("Invalid workspace: {0}")]
    InvalidWorkspace(String),

    #[error("Worktree creation failed: {0}")]
    WorktreeCreationFailed(String),
}

/// A provisioned workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub path: PathBuf,
    pub branch: String,
}

/// Creates and removes isolated workspaces for agents.
#[async_trait]
pub trait WorkspaceIsolator: Send + Sync {
    /// Create a workspace on a new branch for `agent_name` working `task_id`,
    /// cut from `base_branch`.
    async fn create(
        &self,
        agent_name: &str,
        base_branch: &str,
        task_id: &str,
    ) -> Result<Workspace, IsolationError>;

    /// Remove a workspace. The branch is kept.
    async fn remove(&self, path: &Path) -> Result<(), IsolationError>;
}

/// Find the root of the enclosing git repository.
pub fn find_workspace_root(path: &Path) -> Option<PathBuf> {
    path.ancestors()
        .find(|ancestor| ancestor.join(".git").exists())
        .map(Path::to_path_buf)
}

/// Sanitize a name for use as a path component or branch segment.
///
/// Converts path separators and characters git or filesystems reject to dashes.
pub fn sanitize_branch_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '~' | '^' | ' ' => '-',
            c if c.is_control() => '-',
            c => c,
        })
        .collect::<String>()
        .trim_matches(|c| c == '-' || c == '.')
        .to_string()
}

/// Branch an agent works on: `flotilla/<agent>/<task>`.
pub fn branch_name_for(agent_name: &str, task_id: &str) -> String {
    format!(
        "flotilla/{}/{}",
        sanitize_branch_name(agent_name),
        sanitize_branch_name(task_id)
    )
}

/// Directory an agent's worktree lives in. Relative `base_dir` resolves
/// against the repository root.
pub fn worktree_path_for(repo_root: &Path, base_dir: &Path, agent_name: &str) -> PathBuf {
    let base = if base_dir.is_absolute() {
        base_dir.to_path_buf()
    } else {
        repo_root.join(base_dir)
    };
    base.join(sanitize_branch_name(agent_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sanitize_branch_name() {
        assert_eq!(sanitize_branch_name("feat/auth"), "feat-auth");
        assert_eq!(sanitize_branch_name("fix bug~1"), "fix-bug-1");
        assert_eq!(sanitize_branch_name("builder-1"), "builder-1");
        assert_eq!(sanitize_branch_name("/lead/"), "lead");
    }

    #[test]
    fn test_branch_name_for() {
        assert_eq!(branch_name_for("builder-1", "T-42"), "flotilla/builder-1/T-42");
        assert_eq!(branch_name_for("a/b", "x:y"), "flotilla/a-b/x-y");
    }

    #[test]
    fn test_worktree_path_for() {
        let root = PathBuf::from("/workspace/project");
        assert_eq!(
            worktree_path_for(&root, Path::new(".flotilla/worktrees"), "builder-1"),
            PathBuf::from("/workspace/project/.flotilla/worktrees/builder-1")
        );
        assert_eq!(
            worktree_path_for(&root, Path::new("/tmp/wt"), "lead"),
            PathBuf::from("/tmp/wt/lead")
        );
    }

    #[test]
    fn test_find_workspace_root() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();

        let root = find_workspace_root(&nested);
        assert_eq!(root, Some(dir.path().to_path_buf()));
    }
}
