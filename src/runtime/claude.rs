// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Claude Code backend.
//!
//! Shows a folder-trust dialog on first run in a new worktree and supports
//! settings-file hooks, which carry the activity reports and the read-only
//! guard for scout, reviewer and monitor agents.

use std::collections::HashMap;
use std::io;
use std::path::Path;

use serde_json::{json, Map, Value};

use super::transcript::{count, fold_jsonl, TokenUsage, TranscriptSummary};
use super::{
    has_prompt_line, join_command, provider_environment, strip_ansi, HookContext, LaunchOptions,
    ModelSpec, PermissionMode, ReadyPhase, RuntimeAdapter,
};

/// Tools a read-only agent may not call.
const WRITE_TOOLS: &str = "Write|Edit|MultiEdit|NotebookEdit";

pub struct ClaudeRuntime;

impl ClaudeRuntime {
    fn hooks(ctx: &HookContext) -> Value {
        let bin = &ctx.flotilla_bin;
        let agent = &ctx.agent_name;
        let callback = |args: &[&str]| -> Value {
            let mut argv = vec![bin.clone()];
            argv.extend(args.iter().map(|a| a.to_string()));
            argv.push("--agent".to_string());
            argv.push(agent.clone());
            json!([{ "matcher": "", "hooks": [{ "type": "command", "command": join_command(&argv) }] }])
        };

        let mut hooks = Map::new();
        hooks.insert("SessionStart".into(), callback(&["mail", "check"]));
        hooks.insert("UserPromptSubmit".into(), callback(&["log", "prompt-submit"]));
        hooks.insert("PostToolUse".into(), callback(&["log", "tool-use"]));
        hooks.insert("Stop".into(), callback(&["log", "turn-end"]));
        hooks.insert("SessionEnd".into(), callback(&["log", "session-end"]));

        if ctx.capability.is_read_only() {
            let message = format!(
                "{} agents are read-only: file modification is blocked",
                ctx.capability
            );
            let guard = format!("echo {} >&2; exit 2", join_command(&[message]));
            hooks.insert(
                "PreToolUse".into(),
                json!([{ "matcher": WRITE_TOOLS, "hooks": [{ "type": "command", "command": guard }] }]),
            );
        }

        Value::Object(hooks)
    }
}

impl RuntimeAdapter for ClaudeRuntime {
    fn id(&self) -> &'static str {
        "claude"
    }

    fn instruction_path(&self) -> &'static str {
        ".claude/CLAUDE.md"
    }

    fn build_launch_command(&self, opts: &LaunchOptions) -> String {
        let mut args = vec!["claude".to_string()];
        if let Some(model) = &opts.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        if opts.permission_mode == PermissionMode::Bypass {
            args.push("--dangerously-skip-permissions".to_string());
        }
        if let Some(prompt) = &opts.append_system_prompt {
            args.push("--append-system-prompt".to_string());
            args.push(prompt.clone());
        }
        join_command(&args)
    }

    fn build_one_shot_command(&self, prompt: &str, model: Option<&str>) -> Vec<String> {
        let mut args = vec!["claude".to_string(), "-p".to_string(), prompt.to_string()];
        if let Some(model) = model {
            args.push("--model".to_string());
            args.push(model.to_string());
        }
        args
    }

    fn deploy_config(&self, worktree: &Path, ctx: &HookContext) -> io::Result<()> {
        if !worktree.is_dir() {
            tracing::debug!(path = %worktree.display(), "Worktree missing; skipping hook deploy");
            return Ok(());
        }
        let dir = worktree.join(".claude");
        std::fs::create_dir_all(&dir)?;
        let path = dir.join("settings.local.json");

        // Keep unrelated settings a checked-in file may already carry
        let mut settings = std::fs::read_to_string(&path)
            .ok()
            .and_then(|s| serde_json::from_str::<Map<String, Value>>(&s).ok())
            .unwrap_or_default();
        settings.insert("hooks".to_string(), Self::hooks(ctx));

        let content = serde_json::to_string_pretty(&Value::Object(settings))
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        std::fs::write(&path, content)
    }

    fn detect_ready(&self, pane: &str) -> ReadyPhase {
        let text = strip_ansi(pane);
        let lines: Vec<&str> = text.lines().collect();

        // Only what follows the last trust prompt is current
        let screen = match lines.iter().rposition(|l| is_trust_prompt(l)) {
            Some(i) => {
                let after = lines[i + 1..].join("\n");
                if !shows_idle_prompt(&after) {
                    return ReadyPhase::Dialog;
                }
                after
            }
            None => text.to_string(),
        };

        if screen.to_lowercase().contains("esc to interrupt") {
            ReadyPhase::Loading
        } else if shows_idle_prompt(&screen) {
            ReadyPhase::Ready
        } else {
            ReadyPhase::Loading
        }
    }

    fn parse_transcript(&self, path: &Path) -> Option<TranscriptSummary> {
        fold_jsonl(path, |entry, summary| {
            if entry.get("type").and_then(Value::as_str) != Some("assistant") {
                return;
            }
            let Some(message) = entry.get("message") else {
                return;
            };
            let Some(usage) = message.get("usage") else {
                return;
            };
            let model = message
                .get("model")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            summary.record(
                model,
                TokenUsage {
                    input_tokens: count(usage, "input_tokens"),
                    output_tokens: count(usage, "output_tokens"),
                    cache_read_tokens: count(usage, "cache_read_input_tokens"),
                    cache_creation_tokens: count(usage, "cache_creation_input_tokens"),
                },
            );
        })
    }

    fn build_environment(&self, model: &ModelSpec) -> HashMap<String, String> {
        provider_environment(model, "ANTHROPIC_BASE_URL", "ANTHROPIC_AUTH_TOKEN")
    }
}

fn is_trust_prompt(line: &str) -> bool {
    let lower = line.to_lowercase();
    lower.contains("do you trust the files") || lower.contains("trust this folder")
}

fn shows_idle_prompt(screen: &str) -> bool {
    let lower = screen.to_lowercase();
    let hint = lower.contains("? for shortcuts") || lower.contains("bypass permissions");
    hint && has_prompt_line(screen, &['>', '❯'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Capability;
    use tempfile::TempDir;

    fn ctx(capability: Capability) -> HookContext {
        HookContext {
            agent_name: "scout-1".to_string(),
            capability,
            flotilla_bin: "flotilla".to_string(),
        }
    }

    #[test]
    fn test_launch_command_flags() {
        let opts = LaunchOptions {
            model: Some("sonnet".to_string()),
            append_system_prompt: Some("Stay in your worktree.".to_string()),
            ..Default::default()
        };
        let cmd = ClaudeRuntime.build_launch_command(&opts);
        assert!(cmd.starts_with("claude --model sonnet --dangerously-skip-permissions"));
        assert!(cmd.contains("--append-system-prompt 'Stay in your worktree.'"));

        let opts = LaunchOptions {
            permission_mode: PermissionMode::Ask,
            ..Default::default()
        };
        assert_eq!(ClaudeRuntime.build_launch_command(&opts), "claude");
    }

    #[test]
    fn test_detect_ready_phases() {
        let rt = ClaudeRuntime;
        assert_eq!(rt.detect_ready(""), ReadyPhase::Loading);
        assert_eq!(
            rt.detect_ready("Do you trust the files in this folder?\n❯ 1. Yes, proceed"),
            ReadyPhase::Dialog
        );
        assert_eq!(
            rt.detect_ready("╭──────╮\n│ >    │\n╰──────╯\n  ? for shortcuts"),
            ReadyPhase::Ready
        );
        assert_eq!(
            rt.detect_ready("✻ Thinking… (esc to interrupt)\n│ > │\n? for shortcuts"),
            ReadyPhase::Loading
        );
    }

    #[test]
    fn test_accepted_dialog_above_idle_prompt_is_ready() {
        let rt = ClaudeRuntime;
        let pane = "Do you trust the files in this folder?\n❯ 1. Yes, proceed\n\n\
                    ╭──────╮\n│ >    │\n╰──────╯\n  ? for shortcuts";
        assert_eq!(rt.detect_ready(pane), ReadyPhase::Ready);

        let busy = "Do you trust the files in this folder?\n❯ 1. Yes, proceed\n\
                    ✻ Working… (esc to interrupt)\n│ > │\n? for shortcuts";
        assert_eq!(rt.detect_ready(busy), ReadyPhase::Loading);
    }

    #[test]
    fn test_deploy_config_guards_read_only() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join(".claude")).unwrap();
        std::fs::write(
            temp.path().join(".claude/settings.local.json"),
            r#"{"model": "opus"}"#,
        )
        .unwrap();

        ClaudeRuntime
            .deploy_config(temp.path(), &ctx(Capability::Scout))
            .unwrap();

        let content =
            std::fs::read_to_string(temp.path().join(".claude/settings.local.json")).unwrap();
        let settings: Value = serde_json::from_str(&content).unwrap();
        assert_eq!(settings["model"], "opus");
        assert_eq!(settings["hooks"]["PreToolUse"][0]["matcher"], WRITE_TOOLS);
        let start = settings["hooks"]["SessionStart"][0]["hooks"][0]["command"]
            .as_str()
            .unwrap();
        assert_eq!(start, "flotilla mail check --agent scout-1");
    }

    #[test]
    fn test_deploy_config_builder_has_no_guard() {
        let temp = TempDir::new().unwrap();
        ClaudeRuntime
            .deploy_config(temp.path(), &ctx(Capability::Builder))
            .unwrap();
        let content =
            std::fs::read_to_string(temp.path().join(".claude/settings.local.json")).unwrap();
        let settings: Value = serde_json::from_str(&content).unwrap();
        assert!(settings["hooks"].get("PreToolUse").is_none());
    }

    #[test]
    fn test_deploy_config_missing_worktree_is_noop() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("gone");
        ClaudeRuntime
            .deploy_config(&missing, &ctx(Capability::Builder))
            .unwrap();
        assert!(!missing.exists());
    }

    #[test]
    fn test_parse_transcript() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("session.jsonl");
        let lines = [
            r#"{"type":"user","message":{"content":"hi"}}"#,
            r#"{"type":"assistant","message":{"model":"claude-sonnet","usage":{"input_tokens":10,"output_tokens":4,"cache_read_input_tokens":100}}}"#,
            r#"{"type":"assistant","message":{"model":"claude-sonnet","usage":{"input_tokens":5,"output_tokens":1}}}"#,
            r#"{"type":"assistant","message":{"model":"claude-haiku","usage":{"input_tokens":"#,
        ];
        std::fs::write(&path, lines.join("\n")).unwrap();

        let summary = ClaudeRuntime.parse_transcript(&path).unwrap();
        let sonnet = summary.by_model["claude-sonnet"];
        assert_eq!(sonnet.input_tokens, 15);
        assert_eq!(sonnet.output_tokens, 5);
        assert_eq!(sonnet.cache_read_tokens, 100);
        assert!(!summary.by_model.contains_key("claude-haiku"));
        assert_eq!(summary.skipped_lines, 1);

        assert!(ClaudeRuntime
            .parse_transcript(&temp.path().join("missing.jsonl"))
            .is_none());
    }
}
