// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Instruction overlay rendered into each agent's worktree.
//!
//! The overlay is the file the backend reads as project instructions
//! (`.claude/CLAUDE.md`, `AGENTS.md`). It tells the agent who it is, what
//! task it owns, which files are in scope, and how to report back.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::types::Capability;

#[derive(Debug, thiserror::Error)]
pub enum OverlayError {
    #[error("IO error writing {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Everything the overlay template needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayContext {
    pub agent_name: String,
    pub capability: Capability,
    pub task_id: String,
    pub branch: String,
    pub parent_agent: Option<String>,
    pub depth: u32,
    pub max_depth: u32,
    pub spec_path: Option<String>,
    pub file_scope: Vec<String>,
    /// Output of the context primer, if any.
    pub primed_context: Option<String>,
}

#[async_trait]
pub trait OverlayWriter: Send + Sync {
    /// Write the overlay to `relative_path` inside `worktree`; returns the full path.
    async fn write(
        &self,
        worktree: &Path,
        relative_path: &str,
        ctx: &OverlayContext,
    ) -> Result<PathBuf, OverlayError>;
}

/// Writes the built-in markdown template.
#[derive(Debug, Clone, Default)]
pub struct MarkdownOverlay;

fn role_guidance(capability: Capability) -> &'static str {
    match capability {
        Capability::Scout => {
            "Explore and report. Do not modify files; send findings to your parent by mail."
        }
        Capability::Builder => {
            "Implement the task within your file scope. Commit to your branch when tests pass."
        }
        Capability::Reviewer => {
            "Review the work on the task branch. Do not modify files; report issues by mail."
        }
        Capability::Lead => {
            "Break the task down and spawn scouts, builders and reviewers for the parts. \
             Verify their work before reporting completion."
        }
        Capability::Merger => "Merge completed branches and resolve conflicts.",
        Capability::Coordinator => "Start leads for top-level tasks and track their progress.",
        Capability::Monitor => "Watch agent health and escalate stalled work. Do not modify files.",
    }
}

/// Render the overlay markdown.
pub fn render_overlay(ctx: &OverlayContext) -> String {
    let parent = ctx.parent_agent.as_deref().unwrap_or("none");

    let mut out = format!("# Agent: {}\n\n", ctx.agent_name);
    out.push_str(&format!("- **Capability:** {}\n", ctx.capability));
    out.push_str(&format!("- **Task:** {}\n", ctx.task_id));
    out.push_str(&format!("- **Branch:** {}\n", ctx.branch));
    out.push_str(&format!("- **Parent:** {}\n", parent));
    out.push_str(&format!("- **Depth:** {} of {}\n\n", ctx.depth, ctx.max_depth));

    out.push_str(&format!("## Role\n\n{}\n\n", role_guidance(ctx.capability)));

    if let Some(spec) = &ctx.spec_path {
        out.push_str(&format!("## Spec\n\nRead `{}` before starting.\n\n", spec));
    }

    out.push_str("## File scope\n\n");
    if ctx.file_scope.is_empty() {
        out.push_str("No restriction beyond the task itself.\n\n");
    } else {
        for file in &ctx.file_scope {
            out.push_str(&format!("- `{}`\n", file));
        }
        out.push_str("\nDo not edit files outside this list.\n\n");
    }

    if ctx.depth >= ctx.max_depth {
        out.push_str("## Spawning\n\nYou are at the maximum depth and may not spawn agents.\n\n");
    }

    if let Some(primed) = ctx.primed_context.as_deref().filter(|p| !p.trim().is_empty()) {
        out.push_str(&format!("## Project expertise\n\n{}\n\n", primed.trim_end()));
    }

    out.push_str(&format!(
        "## Communication\n\n\
         - Check mail: `flotilla mail check --agent {name}`\n\
         - Report to {parent} by mail when done or blocked.\n",
        name = ctx.agent_name,
        parent = parent,
    ));

    out
}

#[async_trait]
impl OverlayWriter for MarkdownOverlay {
    async fn write(
        &self,
        worktree: &Path,
        relative_path: &str,
        ctx: &OverlayContext,
    ) -> Result<PathBuf, OverlayError> {
        let path = worktree.join(relative_path);
        let io_err = |source| OverlayError::Io {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        tokio::fs::write(&path, render_overlay(ctx))
            .await
            .map_err(io_err)?;
        Ok(path)
    }
}
