// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration type definitions.
//!
//! `WorkspaceConfig` is the partial, file-level shape (every key optional) and
//! `ResolvedConfig` is the fully merged result handed to the orchestrator.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Configuration as it appears in a single config file.
/// Can be defined in `.flotilla/config.yaml` or `.flotilla/config.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<ProjectConfig>,

    /// Admission limits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agents: Option<AgentsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub worktrees: Option<WorktreesConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_tracker: Option<TaskTrackerConfig>,

    /// Backend selection and model routing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeConfig>,

    /// Expertise priming for new agents
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priming: Option<PrimingConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Branch new worktrees are cut from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canonical_branch: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<u32>,

    /// 0 means unlimited
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_sessions_per_run: Option<u32>,

    /// 0 means unlimited
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_agents_per_lead: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stagger_delay_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub prevent_duplicate_leads: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorktreesConfig {
    /// Relative paths resolve against the project root
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskTrackerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Tracker CLI executable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// Backend used when `--runtime` is not given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    /// Capability name to model identifier. A `provider/model` value routes
    /// through the named provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub models: Option<HashMap<String, String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub providers: Option<HashMap<String, ProviderConfig>>,
}

/// Alternate API gateway for a backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Name of the environment variable holding the auth token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token_env: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrimingConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

// ============================================================================
// Resolved configuration
// ============================================================================

/// Fully resolved configuration after merging all sources.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedConfig {
    pub project: ResolvedProject,
    pub agents: AgentLimits,
    pub worktrees: ResolvedWorktrees,
    pub task_tracker: ResolvedTaskTracker,
    pub runtime: ResolvedRuntime,
    pub priming: ResolvedPriming,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedProject {
    pub name: Option<String>,
    pub canonical_branch: String,
}

/// Admission ceilings consumed by the admission controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentLimits {
    pub max_concurrent: usize,
    pub max_depth: u32,
    pub max_sessions_per_run: u32,
    pub max_agents_per_lead: u32,
    pub stagger_delay_ms: u64,
    pub prevent_duplicate_leads: bool,
}

impl Default for AgentLimits {
    fn default() -> Self {
        Self {
            max_concurrent: 25,
            max_depth: 2,
            max_sessions_per_run: 0,
            max_agents_per_lead: 5,
            stagger_delay_ms: 2000,
            prevent_duplicate_leads: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedWorktrees {
    pub base_dir: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedTaskTracker {
    pub enabled: bool,
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedRuntime {
    pub default: String,
    pub models: HashMap<String, String>,
    pub providers: HashMap<String, ProviderConfig>,
}

impl ResolvedRuntime {
    /// Configured model for a capability, if any.
    pub fn model_for(&self, capability: &str) -> Option<&str> {
        self.models.get(capability).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedPriming {
    pub enabled: bool,
    pub command: String,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            project: ResolvedProject {
                name: None,
                canonical_branch: "main".to_string(),
            },
            agents: AgentLimits::default(),
            worktrees: ResolvedWorktrees {
                base_dir: ".flotilla/worktrees".to_string(),
            },
            task_tracker: ResolvedTaskTracker {
                enabled: true,
                command: "bd".to_string(),
            },
            runtime: ResolvedRuntime {
                default: "claude".to_string(),
                models: HashMap::new(),
                providers: HashMap::new(),
            },
            priming: ResolvedPriming {
                enabled: true,
                command: "mulch".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_config_default() {
        let config = WorkspaceConfig::default();
        assert!(config.agents.is_none());
        assert!(config.runtime.is_none());
    }

    #[test]
    fn test_resolved_defaults() {
        let config = ResolvedConfig::default();
        assert_eq!(config.agents.max_concurrent, 25);
        assert_eq!(config.agents.max_depth, 2);
        assert_eq!(config.agents.max_sessions_per_run, 0);
        assert_eq!(config.agents.max_agents_per_lead, 5);
        assert_eq!(config.agents.stagger_delay_ms, 2000);
        assert!(!config.agents.prevent_duplicate_leads);
        assert_eq!(config.runtime.default, "claude");
        assert_eq!(config.task_tracker.command, "bd");
    }

    #[test]
    fn test_parse_camel_case_yaml() {
        let yaml = r#"
agents:
  maxConcurrent: 4
  staggerDelayMs: 0
runtime:
  default: codex
  models:
    builder: openrouter/qwen-coder
  providers:
    openrouter:
      baseUrl: https://openrouter.ai/api
      authTokenEnv: OPENROUTER_API_KEY
"#;
        let config: WorkspaceConfig = serde_yaml::from_str(yaml).unwrap();
        let agents = config.agents.unwrap();
        assert_eq!(agents.max_concurrent, Some(4));
        assert_eq!(agents.stagger_delay_ms, Some(0));
        assert!(agents.max_depth.is_none());

        let runtime = config.runtime.unwrap();
        assert_eq!(runtime.default.as_deref(), Some("codex"));
        let provider = &runtime.providers.unwrap()["openrouter"];
        assert_eq!(provider.auth_token_env.as_deref(), Some("OPENROUTER_API_KEY"));
    }

    #[test]
    fn test_resolved_serializes_camel_case() {
        let json = serde_json::to_value(ResolvedConfig::default()).unwrap();
        assert_eq!(json["agents"]["maxAgentsPerLead"], 5);
        assert_eq!(json["taskTracker"]["enabled"], true);
        assert_eq!(json["project"]["canonicalBranch"], "main");
    }
}
