// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Codex CLI backend. No hook mechanism and no system-prompt append; the
//! instruction overlay in `AGENTS.md` carries everything.

use std::collections::HashMap;
use std::io;
use std::path::Path;

use serde_json::Value;

use super::transcript::{count, fold_jsonl, TokenUsage, TranscriptSummary};
use super::{
    has_prompt_line, join_command, provider_environment, strip_ansi, HookContext, LaunchOptions,
    ModelSpec, PermissionMode, ReadyPhase, RuntimeAdapter,
};

pub struct CodexRuntime;

impl RuntimeAdapter for CodexRuntime {
    fn id(&self) -> &'static str {
        "codex"
    }

    fn instruction_path(&self) -> &'static str {
        "AGENTS.md"
    }

    fn build_launch_command(&self, opts: &LaunchOptions) -> String {
        let mut args = vec!["codex".to_string()];
        if let Some(model) = &opts.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        match opts.permission_mode {
            PermissionMode::Bypass => {
                args.push("--dangerously-bypass-approvals-and-sandbox".to_string())
            }
            PermissionMode::Ask => {
                args.push("--ask-for-approval".to_string());
                args.push("on-request".to_string());
            }
        }
        join_command(&args)
    }

    fn build_one_shot_command(&self, prompt: &str, model: Option<&str>) -> Vec<String> {
        let mut args = vec!["codex".to_string(), "exec".to_string()];
        if let Some(model) = model {
            args.push("--model".to_string());
            args.push(model.to_string());
        }
        args.push(prompt.to_string());
        args
    }

    fn deploy_config(&self, _worktree: &Path, ctx: &HookContext) -> io::Result<()> {
        tracing::debug!(agent = %ctx.agent_name, "codex has no hook mechanism; nothing to deploy");
        Ok(())
    }

    fn detect_ready(&self, pane: &str) -> ReadyPhase {
        let text = strip_ansi(pane);
        let lower = text.to_lowercase();

        if lower.contains("allow codex to work in this folder")
            || lower.contains("do you trust the contents of this directory")
        {
            return ReadyPhase::Dialog;
        }
        if lower.contains("esc to interrupt") {
            return ReadyPhase::Loading;
        }
        let footer = lower.contains("context left") || lower.contains("send");
        if footer && has_prompt_line(&text, &['›', '▌']) {
            ReadyPhase::Ready
        } else {
            ReadyPhase::Loading
        }
    }

    fn parse_transcript(&self, path: &Path) -> Option<TranscriptSummary> {
        let mut model = String::from("unknown");
        fold_jsonl(path, |entry, summary| {
            let Some(payload) = entry.get("payload") else {
                return;
            };
            match entry.get("type").and_then(Value::as_str) {
                Some("turn_context") => {
                    if let Some(m) = payload.get("model").and_then(Value::as_str) {
                        model = m.to_string();
                    }
                }
                Some("event_msg") => {
                    if payload.get("type").and_then(Value::as_str) != Some("token_count") {
                        return;
                    }
                    let Some(usage) = payload.pointer("/info/last_token_usage") else {
                        return;
                    };
                    summary.record(
                        &model,
                        TokenUsage {
                            input_tokens: count(usage, "input_tokens"),
                            output_tokens: count(usage, "output_tokens"),
                            cache_read_tokens: count(usage, "cached_input_tokens"),
                            cache_creation_tokens: 0,
                        },
                    );
                }
                _ => {}
            }
        })
    }

    fn build_environment(&self, model: &ModelSpec) -> HashMap<String, String> {
        provider_environment(model, "OPENAI_BASE_URL", "OPENAI_API_KEY")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_launch_command_ignores_system_prompt() {
        let opts = LaunchOptions {
            model: Some("gpt-5-codex".to_string()),
            append_system_prompt: Some("ignored".to_string()),
            ..Default::default()
        };
        let cmd = CodexRuntime.build_launch_command(&opts);
        assert_eq!(
            cmd,
            "codex --model gpt-5-codex --dangerously-bypass-approvals-and-sandbox"
        );
    }

    #[test]
    fn test_one_shot_command() {
        let args = CodexRuntime.build_one_shot_command("summarize", Some("o4-mini"));
        assert_eq!(args, vec!["codex", "exec", "--model", "o4-mini", "summarize"]);
    }

    #[test]
    fn test_detect_ready_phases() {
        let rt = CodexRuntime;
        assert_eq!(rt.detect_ready("booting"), ReadyPhase::Loading);
        assert_eq!(
            rt.detect_ready("Allow Codex to work in this folder without asking for approval?"),
            ReadyPhase::Dialog
        );
        assert_eq!(
            rt.detect_ready("› Ask Codex to do anything\n\n  ⏎ send   100% context left"),
            ReadyPhase::Ready
        );
        assert_eq!(
            rt.detect_ready("• Working (3s • esc to interrupt)\n› \n 98% context left"),
            ReadyPhase::Loading
        );
    }

    #[test]
    fn test_parse_transcript_tracks_model_changes() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("rollout.jsonl");
        let lines = [
            r#"{"type":"turn_context","payload":{"model":"gpt-5"}}"#,
            r#"{"type":"event_msg","payload":{"type":"token_count","info":{"last_token_usage":{"input_tokens":100,"cached_input_tokens":40,"output_tokens":20}}}}"#,
            r#"{"type":"event_msg","payload":{"type":"agent_message","message":"done"}}"#,
            r#"{"type":"turn_context","payload":{"model":"gpt-5-mini"}}"#,
            r#"{"type":"event_msg","payload":{"type":"token_count","info":{"last_token_usage":{"input_tokens":7,"output_tokens":3}}}}"#,
            r#"{"type":"event_msg","payload":{"type":"token_count","info":null}}"#,
        ];
        std::fs::write(&path, lines.join("\n")).unwrap();

        let summary = CodexRuntime.parse_transcript(&path).unwrap();
        assert_eq!(summary.by_model["gpt-5"].input_tokens, 100);
        assert_eq!(summary.by_model["gpt-5"].cache_read_tokens, 40);
        assert_eq!(summary.by_model["gpt-5-mini"].output_tokens, 3);
    }
}
