// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Pi coding agent backend.
//!
//! Pi keeps its editor box on screen while it works, so an idle screen and a
//! processing screen look the same. Beacon verification is turned off: a
//! resend would land as a second prompt in a busy session.

use std::collections::HashMap;
use std::io;
use std::path::Path;

use serde_json::Value;

use super::transcript::{count, fold_jsonl, TokenUsage, TranscriptSummary};
use super::{
    join_command, provider_environment, strip_ansi, HookContext, LaunchOptions, ModelSpec,
    ReadyPhase, RuntimeAdapter,
};

/// Minimum run of `─` that counts as the editor border.
const BORDER_MIN: usize = 10;

pub struct PiRuntime;

impl RuntimeAdapter for PiRuntime {
    fn id(&self) -> &'static str {
        "pi"
    }

    fn instruction_path(&self) -> &'static str {
        "AGENTS.md"
    }

    fn build_launch_command(&self, opts: &LaunchOptions) -> String {
        // Pi has no approval prompts, so the permission mode has no flag
        let mut args = vec!["pi".to_string()];
        if let Some(model) = &opts.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        if let Some(prompt) = &opts.append_system_prompt {
            args.push("--append-system-prompt".to_string());
            args.push(prompt.clone());
        }
        join_command(&args)
    }

    fn build_one_shot_command(&self, prompt: &str, model: Option<&str>) -> Vec<String> {
        let mut args = vec!["pi".to_string(), "-p".to_string()];
        if let Some(model) = model {
            args.push("--model".to_string());
            args.push(model.to_string());
        }
        args.push(prompt.to_string());
        args
    }

    fn deploy_config(&self, _worktree: &Path, _ctx: &HookContext) -> io::Result<()> {
        Ok(())
    }

    fn detect_ready(&self, pane: &str) -> ReadyPhase {
        let text = strip_ansi(pane);
        let has_border = text
            .lines()
            .any(|line| line.trim().chars().filter(|&c| c == '─').count() >= BORDER_MIN);
        if has_border {
            ReadyPhase::Ready
        } else {
            ReadyPhase::Loading
        }
    }

    fn requires_beacon_verification(&self) -> bool {
        false
    }

    fn parse_transcript(&self, path: &Path) -> Option<TranscriptSummary> {
        fold_jsonl(path, |entry, summary| {
            if entry.get("type").and_then(Value::as_str) != Some("message") {
                return;
            }
            let Some(message) = entry.get("message") else {
                return;
            };
            if message.get("role").and_then(Value::as_str) != Some("assistant") {
                return;
            }
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
                    input_tokens: count(usage, "input"),
                    output_tokens: count(usage, "output"),
                    cache_read_tokens: count(usage, "cacheRead"),
                    cache_creation_tokens: count(usage, "cacheWrite"),
                },
            );
        })
    }

    fn build_environment(&self, model: &ModelSpec) -> HashMap<String, String> {
        provider_environment(model, "OPENAI_BASE_URL", "OPENAI_API_KEY")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use tempfile::TempDir;

    #[test]
    fn test_opts_out_of_verification() {
        assert!(!PiRuntime.requires_beacon_verification());
    }

    #[test]
    fn test_detect_ready() {
        let rt = PiRuntime;
        assert_eq!(rt.detect_ready(""), ReadyPhase::Loading);
        assert_eq!(
            rt.detect_ready("pi v0.9\n────────────────────\n> \n────────────────────"),
            ReadyPhase::Ready
        );
    }

    #[test]
    fn test_build_environment_routes_provider() {
        let spec = ModelSpec {
            model: "qwen3-coder".to_string(),
            provider: Some((
                "gateway".to_string(),
                ProviderConfig {
                    base_url: Some("https://gateway.example/v1".to_string()),
                    auth_token_env: None,
                },
            )),
        };
        let env = PiRuntime.build_environment(&spec);
        assert_eq!(
            env.get("OPENAI_BASE_URL").map(String::as_str),
            Some("https://gateway.example/v1")
        );
        assert!(!env.contains_key("OPENAI_API_KEY"));
    }

    #[test]
    fn test_parse_transcript() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("pi.jsonl");
        let lines = [
            r#"{"type":"session","id":"abc"}"#,
            r#"{"type":"message","message":{"role":"user","content":"go"}}"#,
            r#"{"type":"message","message":{"role":"assistant","model":"qwen3","usage":{"input":30,"output":12,"cacheRead":5,"cacheWrite":2}}}"#,
        ];
        std::fs::write(&path, lines.join("\n")).unwrap();

        let summary = PiRuntime.parse_transcript(&path).unwrap();
        assert_eq!(
            summary.by_model["qwen3"],
            TokenUsage {
                input_tokens: 30,
                output_tokens: 12,
                cache_read_tokens: 5,
                cache_creation_tokens: 2,
            }
        );
    }
}
