// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Subscriber setup for the CLI.
//!
//! Everything goes to stderr. Stdout belongs to command output (`--json`
//! summaries, mail bodies) and, for `flotilla log`, to the agent's hook
//! runner, which must not see log lines.

use std::io::{self, IsTerminal};
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Crate-specific filter variable, consulted before `RUST_LOG`.
pub const LOG_ENV: &str = "FLOTILLA_LOG";

/// How log lines are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Level and message only.
    Compact,
    /// Target, file and line included.
    Full,
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Level used when neither [`LOG_ENV`] nor `RUST_LOG` is set.
    pub level: Level,
    pub format: LogFormat,
    pub ansi: bool,
    /// Explicit directive; overrides the environment.
    pub directive: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl TelemetryConfig {
    /// `--verbose`: debug for this crate, colored when stderr is a terminal.
    pub fn development() -> Self {
        Self {
            level: Level::WARN,
            format: LogFormat::Full,
            ansi: io::stderr().is_terminal(),
            directive: Some("warn,flotilla=debug".to_string()),
        }
    }

    /// Warnings only.
    pub fn production() -> Self {
        Self {
            level: Level::WARN,
            format: LogFormat::Compact,
            ansi: false,
            directive: None,
        }
    }

    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directive = Some(directive.into());
        self
    }

    fn env_filter(&self) -> EnvFilter {
        let fallback = || EnvFilter::new(self.level.to_string());
        if let Some(directive) = &self.directive {
            return EnvFilter::try_new(directive).unwrap_or_else(|_| fallback());
        }
        EnvFilter::try_from_env(LOG_ENV)
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| fallback())
    }
}

/// Returned by [`init_telemetry`]; hold it for the life of the process.
pub struct TelemetryGuard {
    _private: (),
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_telemetry(config: &TelemetryConfig) -> io::Result<TelemetryGuard> {
    let registry = tracing_subscriber::registry().with(config.env_filter());
    let layer = fmt::layer().with_writer(io::stderr).with_ansi(config.ansi);

    let result = match config.format {
        LogFormat::Compact => registry
            .with(layer.compact().with_target(false))
            .try_init(),
        LogFormat::Full => registry
            .with(layer.with_target(true).with_file(true).with_line_number(true))
            .try_init(),
    };
    result.map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

    Ok(TelemetryGuard { _private: () })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let production = TelemetryConfig::default();
        assert_eq!(production.level, Level::WARN);
        assert_eq!(production.format, LogFormat::Compact);
        assert!(!production.ansi);
        assert!(production.directive.is_none());

        let development = TelemetryConfig::development();
        assert_eq!(development.format, LogFormat::Full);
        assert_eq!(development.directive.as_deref(), Some("warn,flotilla=debug"));
    }

    #[test]
    fn test_explicit_directive_wins() {
        let config = TelemetryConfig::production().with_directive("flotilla::orchestrate=trace");
        assert_eq!(
            config.env_filter().to_string(),
            "flotilla::orchestrate=trace"
        );
    }
}
