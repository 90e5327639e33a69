// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration module for flotilla.
//!
//! Handles loading and merging of configuration from multiple sources:
//! - Global config: ~/.flotilla/config.yaml or ~/.flotilla/config.json
//! - Workspace config: .flotilla/config.yaml, .flotilla/config.json, or flotilla.config.json
//! - Local config: .flotilla/config.local.yaml (gitignored, for personal overrides)
//! - CLI options: command-line arguments
//!
//! Configuration is merged with precedence (CLI > local > workspace > global > defaults).

mod loader;
mod merger;
mod types;

pub use loader::{
    find_workspace_root, get_example_config, get_global_config_dir, init_config,
    load_config_file, load_global_config, load_local_config, load_workspace_config,
    CONFIG_FILES, GLOBAL_CONFIG_DIR, LOCAL_CONFIG_FILE,
};

pub use merger::{default_config, merge_config, CliOptions};

pub use types::{
    AgentLimits, AgentsConfig, PrimingConfig, ProjectConfig, ProviderConfig, ResolvedConfig,
    ResolvedPriming, ResolvedProject, ResolvedRuntime, ResolvedTaskTracker, ResolvedWorktrees,
    RuntimeConfig, TaskTrackerConfig, WorkspaceConfig, WorktreesConfig,
};

use crate::error::ConfigError;
use std::path::Path;

/// Load and merge all configuration sources for a project.
pub fn load_config(
    workspace_root: &Path,
    cli_options: CliOptions,
) -> Result<ResolvedConfig, ConfigError> {
    let global = load_global_config()?;
    let workspace = load_workspace_config(workspace_root)?;
    let local = load_local_config(workspace_root)?;

    Ok(merge_config(global, workspace, local, cli_options))
}
