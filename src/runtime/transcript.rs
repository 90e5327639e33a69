// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Token accounting over append-only JSONL transcripts.
//!
//! Backends write one JSON object per line while the agent runs, so the last
//! line may be half-written when we read. Lines that fail to parse are skipped.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use serde_json::Value;

/// Token totals for one model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
        self.cache_creation_tokens += other.cache_creation_tokens;
    }

    pub fn is_empty(&self) -> bool {
        *self == TokenUsage::default()
    }
}

/// Per-model token totals aggregated from a transcript.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptSummary {
    pub by_model: BTreeMap<String, TokenUsage>,
    /// Lines that could not be parsed and were skipped.
    pub skipped_lines: usize,
}

impl TranscriptSummary {
    /// Add usage for a model. Empty usage is ignored.
    pub fn record(&mut self, model: &str, usage: TokenUsage) {
        if usage.is_empty() {
            return;
        }
        self.by_model.entry(model.to_string()).or_default().add(&usage);
    }

    /// Sum across all models.
    pub fn total(&self) -> TokenUsage {
        let mut total = TokenUsage::default();
        for usage in self.by_model.values() {
            total.add(usage);
        }
        total
    }
}

/// Parse a JSONL file, handing each well-formed line to `visit`.
///
/// Returns `None` when the file does not exist or cannot be read.
pub(crate) fn fold_jsonl<F>(path: &Path, mut visit: F) -> Option<TranscriptSummary>
where
    F: FnMut(&Value, &mut TranscriptSummary),
{
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Transcript unreadable");
            return None;
        }
    };

    let mut summary = TranscriptSummary::default();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(value) => visit(&value, &mut summary),
            Err(_) => summary.skipped_lines += 1,
        }
    }
    Some(summary)
}

/// Read a non-negative integer field, treating anything else as zero.
pub(crate) fn count(value: &Value, key: &str) -> u64 {
    value.get(key).and_then(Value::as_u64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_none() {
        let temp = TempDir::new().unwrap();
        let result = fold_jsonl(&temp.path().join("nope.jsonl"), |_, _| {});
        assert!(result.is_none());
    }

    #[test]
    fn test_partial_trailing_line_is_skipped() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("t.jsonl");
        std::fs::write(&path, "{\"n\": 3}\n\n{\"n\": 4}\n{\"n\": ").unwrap();

        let summary = fold_jsonl(&path, |value, summary| {
            summary.record(
                "m",
                TokenUsage {
                    input_tokens: count(value, "n"),
                    ..Default::default()
                },
            );
        })
        .unwrap();

        assert_eq!(summary.by_model["m"].input_tokens, 7);
        assert_eq!(summary.skipped_lines, 1);
    }

    #[test]
    fn test_total_sums_models_and_ignores_empty() {
        let mut summary = TranscriptSummary::default();
        summary.record(
            "a",
            TokenUsage {
                input_tokens: 10,
                output_tokens: 2,
                ..Default::default()
            },
        );
        summary.record(
            "b",
            TokenUsage {
                input_tokens: 5,
                cache_read_tokens: 100,
                ..Default::default()
            },
        );
        summary.record("c", TokenUsage::default());

        let total = summary.total();
        assert_eq!(total.input_tokens, 15);
        assert_eq!(total.output_tokens, 2);
        assert_eq!(total.cache_read_tokens, 100);
        assert!(!summary.by_model.contains_key("c"));
    }
}
