// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration loading from files.
//!
//! Handles loading configuration from JSON and YAML files in various locations.

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

use super::types::{AgentsConfig, ProjectConfig, TaskTrackerConfig, WorkspaceConfig, WorktreesConfig};

/// Config file names to search for (in order).
pub const CONFIG_FILES: &[&str] = &[
    ".flotilla/config.yaml",
    ".flotilla/config.json",
    "flotilla.config.json",
];

/// Local config file name (for per-checkout overrides).
pub const LOCAL_CONFIG_FILE: &str = ".flotilla/config.local.yaml";

/// Global config directory name.
pub const GLOBAL_CONFIG_DIR: &str = ".flotilla";

/// Global config file names, in lookup order.
pub const GLOBAL_CONFIG_FILES: &[&str] = &["config.yaml", "config.json"];

/// Get the global config directory path.
pub fn get_global_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(GLOBAL_CONFIG_DIR))
}

/// Load global configuration from ~/.flotilla/.
pub fn load_global_config() -> Result<Option<WorkspaceConfig>, ConfigError> {
    let dir = match get_global_config_dir() {
        Some(d) => d,
        None => return Ok(None),
    };
    load_first(&dir, GLOBAL_CONFIG_FILES)
}

/// Load workspace configuration from the project root.
///
/// Searches for config files in the following order:
/// 1. .flotilla/config.yaml
/// 2. .flotilla/config.json
/// 3. flotilla.config.json
pub fn load_workspace_config(workspace_root: &Path) -> Result<Option<WorkspaceConfig>, ConfigError> {
    load_first(workspace_root, CONFIG_FILES)
}

/// Load local configuration from .flotilla/config.local.yaml.
pub fn load_local_config(workspace_root: &Path) -> Result<Option<WorkspaceConfig>, ConfigError> {
    load_first(workspace_root, &[LOCAL_CONFIG_FILE])
}

fn load_first(dir: &Path, candidates: &[&str]) -> Result<Option<WorkspaceConfig>, ConfigError> {
    for filename in candidates {
        let path = dir.join(filename);
        if path.exists() {
            tracing::debug!(path = %path.display(), "Loading config");
            return load_config_file(&path).map(Some);
        }
    }
    Ok(None)
}

/// Load a configuration file (JSON or YAML).
pub fn load_config_file(path: &Path) -> Result<WorkspaceConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");

    match extension.to_lowercase().as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&content).map_err(ConfigError::from),
        _ => serde_json::from_str(&content).map_err(ConfigError::from),
    }
}

/// Write a workspace config as YAML, refusing to clobber an existing file.
pub fn init_config(
    workspace_root: &Path,
    config: Option<WorkspaceConfig>,
) -> Result<PathBuf, ConfigError> {
    let path = workspace_root.join(CONFIG_FILES[0]);
    if path.exists() {
        return Err(ConfigError::InvalidValue {
            field: "init".to_string(),
            message: format!("{} already exists", path.display()),
        });
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let config = config.unwrap_or_else(get_example_config);
    let content = serde_yaml::to_string(&config)?;
    std::fs::write(&path, content)?;

    Ok(path)
}

/// Find the project root by searching for a `.flotilla` directory or config file.
///
/// Walks up the directory tree from `start` until it finds a match or
/// reaches the filesystem root.
pub fn find_workspace_root(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        if current.join(GLOBAL_CONFIG_DIR).is_dir()
            || CONFIG_FILES.iter().any(|f| current.join(f).exists())
        {
            // The home directory holds the global config, not a project
            if dirs::home_dir().as_deref() != Some(current.as_path()) {
                return Some(current);
            }
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => return None,
        }
    }
}

/// The config `flotilla init` writes.
pub fn get_example_config() -> WorkspaceConfig {
    WorkspaceConfig {
        project: Some(ProjectConfig {
            name: None,
            canonical_branch: Some("main".to_string()),
        }),
        agents: Some(AgentsConfig {
            max_concurrent: Some(25),
            max_depth: Some(2),
            max_sessions_per_run: Some(0),
            max_agents_per_lead: Some(5),
            stagger_delay_ms: Some(2000),
            prevent_duplicate_leads: Some(false),
        }),
        worktrees: Some(WorktreesConfig {
            base_dir: Some(".flotilla/worktrees".to_string()),
        }),
        task_tracker: Some(TaskTrackerConfig {
            enabled: Some(true),
            command: Some("bd".to_string()),
        }),
        ..Default::default()
    }
}
