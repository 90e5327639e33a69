// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Startup handshake with a freshly launched agent.
//!
//! The agent's only control surface is its terminal UI, which has no way to
//! acknowledge input. The handshake therefore works from pane snapshots:
//!
//! 1. Poll until the backend reports the UI has finished booting.
//! 2. Let input handling settle, then type the beacon.
//! 3. Press Enter a few more times on a widening schedule, since a booting
//!    UI sometimes swallows the first submit.
//! 4. If the backend can tell idle from busy, check that the agent started
//!    working and resend the beacon while it still sits idle.
//!
//! Every wait has a fixed bound. Only step 1 can fail; the rest is best
//! effort and an agent that never picks up the beacon is left for the
//! watchdog.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::terminal::{TerminalError, TerminalSessions};
use crate::runtime::{ReadyPhase, RuntimeAdapter};
use crate::types::Capability;

/// Tag that opens every beacon line.
pub const BEACON_TAG: &str = "[FLOTILLA]";

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("Session {handle} did not become ready within {waited:?}")]
    ReadyTimeout { handle: String, waited: Duration },

    #[error("Session {0} exited while booting")]
    SessionDied(String),

    #[error(transparent)]
    Terminal(#[from] TerminalError),
}

/// Timing bounds for the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeConfig {
    pub poll_interval: Duration,
    pub ready_timeout: Duration,
    /// Pause between first ready render and typing the beacon.
    pub settle_delay: Duration,
    /// Offsets after the beacon at which an empty submit is sent.
    pub submit_ladder: Vec<Duration>,
    pub verify_attempts: u32,
    pub verify_delay: Duration,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            ready_timeout: Duration::from_secs(30),
            settle_delay: Duration::from_secs(1),
            submit_ladder: [1, 2, 3, 5].into_iter().map(Duration::from_secs).collect(),
            verify_attempts: 5,
            verify_delay: Duration::from_secs(2),
        }
    }
}

impl HandshakeConfig {
    /// No waiting anywhere. Readiness is checked once.
    pub fn immediate() -> Self {
        Self {
            poll_interval: Duration::ZERO,
            ready_timeout: Duration::ZERO,
            settle_delay: Duration::ZERO,
            submit_ladder: vec![Duration::ZERO; 4],
            verify_attempts: 5,
            verify_delay: Duration::ZERO,
        }
    }
}

/// How the handshake ended. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// The agent left the idle prompt after the beacon.
    Accepted,
    /// Still idle after every verification attempt.
    Unverified,
    /// The backend cannot tell idle from busy, so nothing was checked.
    Skipped,
}

impl HandshakeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Unverified => "unverified",
            Self::Skipped => "skipped",
        }
    }
}

/// Assignment details carried by the beacon.
#[derive(Debug, Clone)]
pub struct BeaconInfo<'a> {
    pub agent_name: &'a str,
    pub capability: Capability,
    pub task_id: &'a str,
    pub depth: u32,
    pub parent_agent: Option<&'a str>,
    /// Where the backend reads the overlay from.
    pub instruction_path: &'a str,
    /// Command that loads project expertise.
    pub prime_command: &'a str,
}

/// Render the beacon as a single line.
pub fn build_beacon(info: &BeaconInfo<'_>, timestamp: DateTime<Utc>) -> String {
    format!(
        "{tag} {name} ({capability}) {ts} task:{task} depth:{depth} parent:{parent} | \
         Startup: 1) read {overlay} 2) load context: {prime} prime \
         3) check mail: flotilla mail check --agent {name} 4) begin task {task}",
        tag = BEACON_TAG,
        name = info.agent_name,
        capability = info.capability,
        ts = timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        task = info.task_id,
        depth = info.depth,
        parent = info.parent_agent.unwrap_or("none"),
        overlay = info.instruction_path,
        prime = info.prime_command,
    )
}

/// Drives one agent's handshake.
pub struct Handshake<'a> {
    terminal: &'a dyn TerminalSessions,
    adapter: &'a dyn RuntimeAdapter,
    config: &'a HandshakeConfig,
}

impl<'a> Handshake<'a> {
    pub fn new(
        terminal: &'a dyn TerminalSessions,
        adapter: &'a dyn RuntimeAdapter,
        config: &'a HandshakeConfig,
    ) -> Self {
        Self {
            terminal,
            adapter,
            config,
        }
    }

    /// Poll until the pane shows an idle prompt.
    ///
    /// A trust dialog is acknowledged with Enter and polling continues.
    pub async fn wait_for_ready(&self, handle: &str) -> Result<(), HandshakeError> {
        let start = Instant::now();
        loop {
            match self.terminal.capture_pane(handle).await {
                Some(pane) => match self.adapter.detect_ready(&pane) {
                    ReadyPhase::Ready => {
                        debug!(handle, elapsed = ?start.elapsed(), "Agent UI ready");
                        return Ok(());
                    }
                    ReadyPhase::Dialog => {
                        debug!(handle, "Acknowledging startup dialog");
                        self.terminal.send_keys(handle, "").await?;
                    }
                    ReadyPhase::Loading => {}
                },
                None => {
                    if !self.terminal.is_alive(handle).await {
                        return Err(HandshakeError::SessionDied(handle.to_string()));
                    }
                }
            }

            if start.elapsed() >= self.config.ready_timeout {
                return Err(HandshakeError::ReadyTimeout {
                    handle: handle.to_string(),
                    waited: self.config.ready_timeout,
                });
            }
            sleep(self.config.poll_interval).await;
        }
    }

    /// Run the full handshake. Fails only if the UI never becomes ready or
    /// the beacon cannot be typed at all.
    pub async fn run(&self, handle: &str, beacon: &str) -> Result<HandshakeOutcome, HandshakeError> {
        self.wait_for_ready(handle).await?;
        sleep(self.config.settle_delay).await;

        self.terminal.send_keys(handle, beacon).await?;
        self.submit_ladder(handle).await;

        if !self.adapter.requires_beacon_verification() {
            debug!(handle, runtime = self.adapter.id(), "Beacon verification not supported");
            return Ok(HandshakeOutcome::Skipped);
        }

        let outcome = self.verify(handle, beacon).await;
        match outcome {
            HandshakeOutcome::Accepted => info!(handle, "Beacon accepted"),
            _ => warn!(handle, "Agent still idle after beacon; leaving it for the watchdog"),
        }
        Ok(outcome)
    }

    async fn submit_ladder(&self, handle: &str) {
        let mut elapsed = Duration::ZERO;
        for offset in &self.config.submit_ladder {
            sleep(offset.saturating_sub(elapsed)).await;
            elapsed = elapsed.max(*offset);
            if let Err(e) = self.terminal.send_keys(handle, "").await {
                warn!(handle, error = %e, "Follow-up submit failed");
            }
        }
    }

    async fn verify(&self, handle: &str, beacon: &str) -> HandshakeOutcome {
        for attempt in 1..=self.config.verify_attempts {
            sleep(self.config.verify_delay).await;

            let Some(pane) = self.terminal.capture_pane(handle).await else {
                debug!(handle, attempt, "Pane unavailable during verification");
                continue;
            };
            if self.adapter.detect_ready(&pane) != ReadyPhase::Ready {
                return HandshakeOutcome::Accepted;
            }

            debug!(handle, attempt, "Agent idle; resending beacon");
            if let Err(e) = self.terminal.send_keys(handle, beacon).await {
                warn!(handle, attempt, error = %e, "Beacon resend failed");
                continue;
            }
            if let Err(e) = self.terminal.send_keys(handle, "").await {
                warn!(handle, attempt, error = %e, "Follow-up submit failed");
            }
        }
        HandshakeOutcome::Unverified
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{ClaudeRuntime, PiRuntime};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::{HashMap, VecDeque};
    use std::path::Path;
    use std::sync::Mutex;

    const IDLE: &str = "╭──────╮\n│ >    │\n╰──────╯\n  ? for shortcuts";
    const BUSY: &str = "✻ Working… (esc to interrupt)";
    const TRUST: &str = "Do you trust the files in this folder?";

    /// Replays scripted panes; the last one repeats forever.
    struct ScriptedTerminal {
        panes: Mutex<VecDeque<Option<&'static str>>>,
        alive: bool,
        sent: Mutex<Vec<String>>,
    }

    impl ScriptedTerminal {
        fn new(panes: &[Option<&'static str>]) -> Self {
            Self {
                panes: Mutex::new(panes.iter().copied().collect()),
                alive: true,
                sent: Mutex::new(Vec::new()),
            }
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TerminalSessions for ScriptedTerminal {
        async fn ensure_available(&self) -> Result<(), TerminalError> {
            Ok(())
        }

        async fn create_session(
            &self,
            _handle: &str,
            _cwd: &Path,
            _command: &str,
            _env: &HashMap<String, String>,
        ) -> Result<Option<u32>, TerminalError> {
            Ok(Some(1))
        }

        async fn send_keys(&self, _handle: &str, text: &str) -> Result<(), TerminalError> {
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }

        async fn capture_pane(&self, _handle: &str) -> Option<String> {
            let mut panes = self.panes.lock().unwrap();
            let pane = if panes.len() > 1 {
                panes.pop_front().flatten()
            } else {
                panes.front().copied().flatten()
            };
            pane.map(String::from)
        }

        async fn is_alive(&self, _handle: &str) -> bool {
            self.alive
        }
    }

    fn fast_config() -> HandshakeConfig {
        HandshakeConfig {
            poll_interval: Duration::from_millis(1),
            ready_timeout: Duration::from_millis(200),
            ..HandshakeConfig::immediate()
        }
    }

    #[test]
    fn test_beacon_format() {
        let info = BeaconInfo {
            agent_name: "builder-1",
            capability: Capability::Builder,
            task_id: "T-42",
            depth: 1,
            parent_agent: Some("lead-1"),
            instruction_path: ".claude/CLAUDE.md",
            prime_command: "mulch",
        };
        let ts = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        insta::assert_snapshot!(
            build_beacon(&info, ts),
            @"[FLOTILLA] builder-1 (builder) 2026-01-02T03:04:05Z task:T-42 depth:1 parent:lead-1 | Startup: 1) read .claude/CLAUDE.md 2) load context: mulch prime 3) check mail: flotilla mail check --agent builder-1 4) begin task T-42"
        );

        let orphan = BeaconInfo {
            parent_agent: None,
            ..info
        };
        assert!(build_beacon(&orphan, ts).contains("parent:none"));
    }

    #[tokio::test]
    async fn test_accepted_when_agent_starts_working() {
        let terminal = ScriptedTerminal::new(&[Some(""), Some(IDLE), Some(BUSY)]);
        let config = fast_config();
        let outcome = Handshake::new(&terminal, &ClaudeRuntime, &config)
            .run("h", "BEACON")
            .await
            .unwrap();

        assert_eq!(outcome, HandshakeOutcome::Accepted);
        // Beacon then the four-step submit ladder
        assert_eq!(terminal.sent(), vec!["BEACON", "", "", "", ""]);
    }

    #[tokio::test]
    async fn test_idle_throughout_resends_once_per_attempt() {
        let terminal = ScriptedTerminal::new(&[Some(IDLE)]);
        let config = fast_config();
        let outcome = Handshake::new(&terminal, &ClaudeRuntime, &config)
            .run("h", "BEACON")
            .await
            .unwrap();

        assert_eq!(outcome, HandshakeOutcome::Unverified);
        let beacons = terminal.sent().iter().filter(|s| *s == "BEACON").count();
        assert_eq!(beacons, 1 + config.verify_attempts as usize);
    }

    #[tokio::test]
    async fn test_dialog_is_acknowledged() {
        let terminal = ScriptedTerminal::new(&[Some(TRUST), Some(IDLE), Some(BUSY)]);
        let config = fast_config();
        let handshake = Handshake::new(&terminal, &ClaudeRuntime, &config);
        handshake.wait_for_ready("h").await.unwrap();
        assert_eq!(terminal.sent(), vec![""]);
    }

    #[tokio::test]
    async fn test_ready_timeout() {
        let terminal = ScriptedTerminal::new(&[Some(BUSY)]);
        let config = fast_config();
        let err = Handshake::new(&terminal, &ClaudeRuntime, &config)
            .run("h", "BEACON")
            .await
            .unwrap_err();
        assert!(matches!(err, HandshakeError::ReadyTimeout { .. }));
        assert!(terminal.sent().is_empty());
    }

    #[tokio::test]
    async fn test_dead_session_fails_fast() {
        let mut terminal = ScriptedTerminal::new(&[None]);
        terminal.alive = false;
        let config = HandshakeConfig {
            ready_timeout: Duration::from_secs(30),
            ..fast_config()
        };
        let err = Handshake::new(&terminal, &ClaudeRuntime, &config)
            .wait_for_ready("h")
            .await
            .unwrap_err();
        assert!(matches!(err, HandshakeError::SessionDied(_)));
    }

    #[tokio::test]
    async fn test_verification_skipped_for_pi() {
        let terminal = ScriptedTerminal::new(&[Some("────────────────\n > \n────────────────")]);
        let config = fast_config();
        let outcome = Handshake::new(&terminal, &PiRuntime, &config)
            .run("h", "BEACON")
            .await
            .unwrap();
        assert_eq!(outcome, HandshakeOutcome::Skipped);
        assert_eq!(terminal.sent().len(), 5);
    }
}
