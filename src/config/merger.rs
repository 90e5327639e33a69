// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration merging.
//!
//! Handles merging configurations from different sources with proper precedence.

use super::types::{ResolvedConfig, WorkspaceConfig};

/// CLI options that can override configuration.
#[derive(Debug, Clone, Default)]
pub struct CliOptions {
    /// Backend selector (`--runtime`)
    pub runtime: Option<String>,
    /// Per-parent ceiling (`--max-agents`)
    pub max_agents_per_lead: Option<u32>,
}

/// Default configuration values.
pub fn default_config() -> ResolvedConfig {
    ResolvedConfig::default()
}

/// Merge multiple configurations with precedence.
///
/// Precedence (highest to lowest):
/// 1. CLI options
/// 2. Local config (.flotilla/config.local.yaml)
/// 3. Workspace config (.flotilla/config.yaml)
/// 4. Global config (~/.flotilla/config.yaml)
/// 5. Default values
pub fn merge_config(
    global: Option<WorkspaceConfig>,
    workspace: Option<WorkspaceConfig>,
    local: Option<WorkspaceConfig>,
    cli: CliOptions,
) -> ResolvedConfig {
    let mut result = default_config();

    for config in [global, workspace, local].into_iter().flatten() {
        apply_workspace_config(&mut result, &config);
    }

    apply_cli_options(&mut result, &cli);

    result
}

fn apply_workspace_config(result: &mut ResolvedConfig, config: &WorkspaceConfig) {
    if let Some(ref project) = config.project {
        if project.name.is_some() {
            result.project.name = project.name.clone();
        }
        if let Some(ref branch) = project.canonical_branch {
            result.project.canonical_branch = branch.clone();
        }
    }

    if let Some(ref agents) = config.agents {
        let limits = &mut result.agents;
        if let Some(v) = agents.max_concurrent {
            limits.max_concurrent = v;
        }
        if let Some(v) = agents.max_depth {
            limits.max_depth = v;
        }
        if let Some(v) = agents.max_sessions_per_run {
            limits.max_sessions_per_run = v;
        }
        if let Some(v) = agents.max_agents_per_lead {
            limits.max_agents_per_lead = v;
        }
        if let Some(v) = agents.stagger_delay_ms {
            limits.stagger_delay_ms = v;
        }
        if let Some(v) = agents.prevent_duplicate_leads {
            limits.prevent_duplicate_leads = v;
        }
    }

    if let Some(base_dir) = config.worktrees.as_ref().and_then(|w| w.base_dir.as_ref()) {
        result.worktrees.base_dir = base_dir.clone();
    }

    if let Some(ref tracker) = config.task_tracker {
        if let Some(enabled) = tracker.enabled {
            result.task_tracker.enabled = enabled;
        }
        if let Some(ref command) = tracker.command {
            result.task_tracker.command = command.clone();
        }
    }

    if let Some(ref runtime) = config.runtime {
        if let Some(ref default) = runtime.default {
            result.runtime.default = default.clone();
        }
        // Maps merge key by key so a local file can override one capability
        if let Some(ref models) = runtime.models {
            result.runtime.models.extend(models.clone());
        }
        if let Some(ref providers) = runtime.providers {
            result.runtime.providers.extend(providers.clone());
        }
    }

    if let Some(ref priming) = config.priming {
        if let Some(enabled) = priming.enabled {
            result.priming.enabled = enabled;
        }
        if let Some(ref command) = priming.command {
            result.priming.command = command.clone();
        }
    }
}

fn apply_cli_options(result: &mut ResolvedConfig, cli: &CliOptions) {
    if let Some(ref runtime) = cli.runtime {
        result.runtime.default = runtime.clone();
    }

    if let Some(max) = cli.max_agents_per_lead {
        result.agents.max_agents_per_lead = max;
    }
}
