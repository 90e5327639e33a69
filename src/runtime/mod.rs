// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Runtime adapters for interactive agent backends.
//!
//! Each backend implements [`RuntimeAdapter`], translating abstract launch
//! options into its own command line, deploying its own config files, and
//! classifying its own terminal screens. The orchestrator never branches on
//! backend identity; it selects an adapter with [`get_runtime`] and calls
//! through the trait.
//!
//! Adapter operations never fail on a missing target. Reading a transcript
//! that does not exist yields `None`, classifying an empty pane yields
//! [`ReadyPhase::Loading`], and deploying into a missing worktree is a no-op.

pub mod claude;
pub mod codex;
pub mod pi;
pub mod transcript;

use std::borrow::Cow;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::{ProviderConfig, ResolvedRuntime};
use crate::error::ValidationError;
use crate::types::Capability;

pub use claude::ClaudeRuntime;
pub use codex::CodexRuntime;
pub use pi::PiRuntime;
pub use transcript::{TokenUsage, TranscriptSummary};

/// Identifiers accepted by [`get_runtime`].
pub const RUNTIME_IDS: &[&str] = &["claude", "codex", "pi"];

/// What a captured terminal pane shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyPhase {
    /// Still booting, busy, or unrecognizable.
    Loading,
    /// A first-run trust/consent prompt awaiting a keypress.
    Dialog,
    /// An idle input prompt with no task in progress.
    Ready,
}

/// How much the agent may do without asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermissionMode {
    /// Skip all approval prompts. Agents run unattended in their own worktree.
    #[default]
    Bypass,
    /// Use the backend's normal approval flow.
    Ask,
}

/// Abstract launch options, mapped to flags by each backend.
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    pub model: Option<String>,
    pub permission_mode: PermissionMode,
    pub cwd: PathBuf,
    /// Extra system prompt text. Backends without the feature ignore it.
    pub append_system_prompt: Option<String>,
}

/// Identity baked into deployed hook commands.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub agent_name: String,
    pub capability: Capability,
    /// Executable the hooks call back into.
    pub flotilla_bin: String,
}

/// A model choice, optionally routed through a configured provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub model: String,
    pub provider: Option<(String, ProviderConfig)>,
}

impl ModelSpec {
    /// Resolve the configured model for a capability.
    ///
    /// A value of the form `provider/model` whose prefix names a configured
    /// provider is split; anything else is taken as a bare model name.
    pub fn resolve(runtime: &ResolvedRuntime, capability: Capability) -> Option<ModelSpec> {
        let value = runtime.model_for(capability.as_str())?;
        if let Some((prefix, model)) = value.split_once('/') {
            if let Some(provider) = runtime.providers.get(prefix) {
                return Some(ModelSpec {
                    model: model.to_string(),
                    provider: Some((prefix.to_string(), provider.clone())),
                });
            }
        }
        Some(ModelSpec {
            model: value.to_string(),
            provider: None,
        })
    }
}

/// Backend-specific behavior behind one interface.
pub trait RuntimeAdapter: Send + Sync {
    /// Identifier used in config and on the command line.
    fn id(&self) -> &'static str;

    /// Where the instruction overlay goes, relative to the worktree.
    fn instruction_path(&self) -> &'static str;

    /// Shell command that starts the interactive agent.
    fn build_launch_command(&self, opts: &LaunchOptions) -> String;

    /// Argument vector for a non-interactive single prompt.
    fn build_one_shot_command(&self, prompt: &str, model: Option<&str>) -> Vec<String>;

    /// Write hook and guard files into the worktree.
    fn deploy_config(&self, worktree: &Path, ctx: &HookContext) -> io::Result<()>;

    /// Classify a captured pane. Never fails; unknown screens are `Loading`.
    fn detect_ready(&self, pane: &str) -> ReadyPhase;

    /// Whether idle and processing screens can be told apart after the beacon.
    fn requires_beacon_verification(&self) -> bool {
        true
    }

    /// Aggregate token usage from a transcript, `None` if it does not exist.
    fn parse_transcript(&self, path: &Path) -> Option<TranscriptSummary>;

    /// Environment variables for model and provider routing.
    fn build_environment(&self, model: &ModelSpec) -> HashMap<String, String>;
}

static CLAUDE: ClaudeRuntime = ClaudeRuntime;
static CODEX: CodexRuntime = CodexRuntime;
static PI: PiRuntime = PiRuntime;

/// Look up an adapter by identifier.
pub fn get_runtime(id: &str) -> Option<&'static dyn RuntimeAdapter> {
    match id {
        "claude" => Some(&CLAUDE),
        "codex" => Some(&CODEX),
        "pi" => Some(&PI),
        _ => None,
    }
}

/// Look up an adapter, naming the accepted ids on failure.
pub fn resolve_runtime(id: &str) -> Result<&'static dyn RuntimeAdapter, ValidationError> {
    get_runtime(id).ok_or_else(|| {
        ValidationError::invalid(
            "runtime",
            id,
            format!("must be one of: {}", RUNTIME_IDS.join(", ")),
        )
    })
}

static ANSI_ESCAPE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07]*\x07").ok());

/// Remove terminal escape sequences from captured pane text.
pub fn strip_ansi(text: &str) -> Cow<'_, str> {
    match ANSI_ESCAPE.as_ref() {
        Some(re) => re.replace_all(text, ""),
        None => Cow::Borrowed(text),
    }
}

/// Whether any line, ignoring box-drawing borders, starts with one of `glyphs`.
pub(crate) fn has_prompt_line(text: &str, glyphs: &[char]) -> bool {
    text.lines().any(|line| {
        let trimmed = line.trim_matches(|c: char| c.is_whitespace() || c == '│' || c == '┃');
        trimmed.starts_with(glyphs)
    })
}

/// Quote an argument vector into one shell command line.
pub(crate) fn join_command(args: &[String]) -> String {
    shlex::try_join(args.iter().map(String::as_str)).unwrap_or_else(|_| args.join(" "))
}

/// Provider routing variables shared by the backends.
pub(crate) fn provider_environment(
    model: &ModelSpec,
    base_url_var: &str,
    token_var: &str,
) -> HashMap<String, String> {
    let mut env = HashMap::new();
    let Some((_, provider)) = &model.provider else {
        return env;
    };
    if let Some(url) = &provider.base_url {
        env.insert(base_url_var.to_string(), url.clone());
    }
    if let Some(source) = &provider.auth_token_env {
        match std::env::var(source) {
            Ok(token) => {
                env.insert(token_var.to_string(), token);
            }
            Err(_) => {
                tracing::warn!(variable = %source, "Provider auth token variable is not set");
            }
        }
    }
    env
}
