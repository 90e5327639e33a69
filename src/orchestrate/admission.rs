// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Admission control.
//!
//! Pure decision functions over a snapshot of sessions. Nothing here touches
//! the store or the clock: the caller reads one snapshot, passes `now`, and
//! gets the same decision every time for the same inputs.
//!
//! Every function that reasons about "active" sessions filters out zombie
//! and completed rows itself, so passing a full snapshot is safe.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::AgentLimits;
use crate::error::{AgentError, HierarchyError};
use crate::types::{AgentSession, Capability};

fn active(sessions: &[AgentSession]) -> impl Iterator<Item = &AgentSession> {
    sessions.iter().filter(|s| s.is_active())
}

/// Only a lead may be started without a parent, unless forced.
pub fn validate_hierarchy(
    parent_agent: Option<&str>,
    capability: Capability,
    force_override: bool,
) -> Result<(), HierarchyError> {
    if parent_agent.is_some() || capability == Capability::Lead || force_override {
        return Ok(());
    }
    Err(HierarchyError {
        capability: capability.to_string(),
        parent: None,
        message: "only leads may be spawned without a parent; spawn a lead or pass --force-hierarchy"
            .to_string(),
    })
}

/// Depth equal to the ceiling is the deepest permitted leaf.
pub fn check_depth(depth: u32, max_depth: u32) -> Result<(), AgentError> {
    if depth > max_depth {
        return Err(AgentError::DepthExceeded { depth, max_depth });
    }
    Ok(())
}

/// True when the run is full. Zero means unlimited.
pub fn check_run_session_limit(max_per_run: u32, current_count: u32) -> bool {
    max_per_run > 0 && current_count >= max_per_run
}

/// Number of active sessions spawned by `parent_agent`.
pub fn count_active_children(sessions: &[AgentSession], parent_agent: &str) -> usize {
    active(sessions)
        .filter(|s| s.parent_agent.as_deref() == Some(parent_agent))
        .count()
}

/// True when `parent_agent` already has its ceiling of active children.
/// Zero means unlimited.
pub fn check_parent_agent_limit(
    sessions: &[AgentSession],
    parent_agent: &str,
    max_per_parent: u32,
) -> bool {
    max_per_parent > 0 && count_active_children(sessions, parent_agent) >= max_per_parent as usize
}

/// Name of the active session holding `task_id`, if any.
pub fn check_task_lock<'a>(sessions: &'a [AgentSession], task_id: &str) -> Option<&'a str> {
    active(sessions)
        .find(|s| s.task_id == task_id)
        .map(|s| s.agent_name.as_str())
}

/// Name of an active lead already assigned to `task_id`, if any.
pub fn check_duplicate_lead<'a>(sessions: &'a [AgentSession], task_id: &str) -> Option<&'a str> {
    active(sessions)
        .find(|s| s.task_id == task_id && s.capability == Capability::Lead)
        .map(|s| s.agent_name.as_str())
}

/// Whether an active session already uses `agent_name`.
pub fn is_name_in_use(sessions: &[AgentSession], agent_name: &str) -> bool {
    active(sessions).any(|s| s.agent_name == agent_name)
}

/// Milliseconds to wait so launches are at least `stagger_ms` apart.
///
/// Measured from the newest active session's start. Always in
/// `[0, stagger_ms]`; a start time in the future counts as just started.
pub fn calculate_stagger_delay(
    stagger_ms: i64,
    sessions: &[AgentSession],
    now: DateTime<Utc>,
) -> u64 {
    if stagger_ms <= 0 {
        return 0;
    }
    let Some(latest) = active(sessions).map(|s| s.started_at).max() else {
        return 0;
    };
    let elapsed = (now - latest).num_milliseconds().max(0);
    (stagger_ms - elapsed).max(0) as u64
}

/// Advisory: whether `parent_agent` has spawned any scout, active or not.
pub fn parent_has_scouts(sessions: &[AgentSession], parent_agent: &str) -> bool {
    sessions.iter().any(|s| {
        s.capability == Capability::Scout && s.parent_agent.as_deref() == Some(parent_agent)
    })
}

/// The spawn being considered.
#[derive(Debug, Clone, Copy)]
pub struct AdmissionRequest<'a> {
    pub agent_name: &'a str,
    pub capability: Capability,
    pub task_id: &'a str,
    pub parent_agent: Option<&'a str>,
}

/// A session-level admission that passed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    /// How long to sleep before launching.
    pub stagger_delay: Duration,
    /// Non-blocking advice for the operator.
    pub warnings: Vec<String>,
}

/// One read of the session table, taken right before deciding.
#[derive(Debug, Clone)]
pub struct AdmissionSnapshot {
    pub sessions: Vec<AgentSession>,
    pub now: DateTime<Utc>,
}

impl AdmissionSnapshot {
    pub fn new(sessions: Vec<AgentSession>, now: DateTime<Utc>) -> Self {
        Self { sessions, now }
    }

    pub fn active_count(&self) -> usize {
        active(&self.sessions).count()
    }

    /// Run every session-level check in order: concurrency, name, task lock,
    /// duplicate lead (when enabled), per-parent ceiling. The stagger delay
    /// and scout advice are computed for the caller to act on.
    pub fn admit(
        &self,
        request: &AdmissionRequest<'_>,
        limits: &AgentLimits,
    ) -> Result<Admission, AgentError> {
        let active_count = self.active_count();
        if active_count >= limits.max_concurrent {
            return Err(AgentError::ConcurrencyLimit {
                active: active_count,
                max: limits.max_concurrent,
            });
        }

        if is_name_in_use(&self.sessions, request.agent_name) {
            return Err(AgentError::NameInUse(request.agent_name.to_string()));
        }

        if let Some(holder) = check_task_lock(&self.sessions, request.task_id) {
            // A parent may hand its own task down to a child
            if request.parent_agent != Some(holder) {
                return Err(AgentError::TaskLocked {
                    task_id: request.task_id.to_string(),
                    holder: holder.to_string(),
                });
            }
        }

        if limits.prevent_duplicate_leads && request.capability == Capability::Lead {
            if let Some(holder) = check_duplicate_lead(&self.sessions, request.task_id) {
                return Err(AgentError::DuplicateLead {
                    task_id: request.task_id.to_string(),
                    holder: holder.to_string(),
                });
            }
        }

        let stagger_ms = i64::try_from(limits.stagger_delay_ms).unwrap_or(i64::MAX);
        let delay_ms = calculate_stagger_delay(stagger_ms, &self.sessions, self.now);

        let mut warnings = Vec::new();
        if let Some(parent) = request.parent_agent {
            if check_parent_agent_limit(&self.sessions, parent, limits.max_agents_per_lead) {
                return Err(AgentError::ParentLimit {
                    parent: parent.to_string(),
                    count: count_active_children(&self.sessions, parent),
                    max: limits.max_agents_per_lead,
                });
            }

            if request.capability == Capability::Builder && !parent_has_scouts(&self.sessions, parent)
            {
                warnings.push(format!(
                    "{} is spawning a builder without having spawned any scouts",
                    parent
                ));
            }
        }

        Ok(Admission {
            stagger_delay: Duration::from_millis(delay_ms),
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AgentState;
    use chrono::Duration as ChronoDuration;

    fn session(name: &str, task: &str, parent: Option<&str>) -> AgentSession {
        let now = Utc::now();
        AgentSession {
            id: format!("id-{}", name),
            agent_name: name.to_string(),
            capability: Capability::Builder,
            worktree_path: format!("/wt/{}", name),
            branch_name: format!("flotilla/{}/{}", name, task),
            task_id: task.to_string(),
            session_handle: format!("flotilla-p-{}", name),
            state: AgentState::Working,
            process_id: None,
            parent_agent: parent.map(String::from),
            depth: 1,
            run_id: Some("run-1".to_string()),
            started_at: now - ChronoDuration::minutes(10),
            last_activity: now,
            escalation_level: 0,
            stalled_since: None,
            transcript_path: None,
        }
    }

    fn request<'a>(name: &'a str, task: &'a str, parent: Option<&'a str>) -> AdmissionRequest<'a> {
        AdmissionRequest {
            agent_name: name,
            capability: Capability::Builder,
            task_id: task,
            parent_agent: parent,
        }
    }

    #[test]
    fn test_validate_hierarchy() {
        assert!(validate_hierarchy(None, Capability::Lead, false).is_ok());
        assert!(validate_hierarchy(None, Capability::Builder, true).is_ok());
        assert!(validate_hierarchy(Some("lead-1"), Capability::Scout, false).is_ok());

        let err = validate_hierarchy(None, Capability::Builder, false).unwrap_err();
        assert_eq!(err.capability, "builder");
    }

    #[test]
    fn test_check_depth_boundary() {
        assert!(check_depth(2, 2).is_ok());
        assert!(matches!(
            check_depth(3, 2),
            Err(AgentError::DepthExceeded { depth: 3, max_depth: 2 })
        ));
    }

    #[test]
    fn test_run_limit_zero_is_unlimited() {
        assert!(!check_run_session_limit(0, 1_000));
        assert!(!check_run_session_limit(3, 2));
        assert!(check_run_session_limit(3, 3));
    }

    #[test]
    fn test_terminal_sessions_are_ignored() {
        let mut zombie = session("z", "T1", Some("lead"));
        zombie.state = AgentState::Zombie;
        let mut done = session("d", "T1", Some("lead"));
        done.state = AgentState::Completed;
        let sessions = vec![zombie, done];

        assert_eq!(check_task_lock(&sessions, "T1"), None);
        assert!(!is_name_in_use(&sessions, "z"));
        assert_eq!(count_active_children(&sessions, "lead"), 0);
        assert_eq!(calculate_stagger_delay(5_000, &sessions, Utc::now()), 0);
    }

    #[test]
    fn test_stagger_delay() {
        let now = Utc::now();
        let mut recent = session("a", "T1", None);
        recent.started_at = now - ChronoDuration::milliseconds(500);
        let sessions = vec![session("old", "T0", None), recent];

        assert_eq!(calculate_stagger_delay(2_000, &sessions, now), 1_500);
        assert_eq!(calculate_stagger_delay(400, &sessions, now), 0);
        assert_eq!(calculate_stagger_delay(0, &sessions, now), 0);
        assert_eq!(calculate_stagger_delay(2_000, &[], now), 0);

        let mut future = session("f", "T2", None);
        future.started_at = now + ChronoDuration::seconds(30);
        assert_eq!(calculate_stagger_delay(2_000, &[future], now), 2_000);
    }

    #[test]
    fn test_admit_concurrency_limit() {
        let snapshot = AdmissionSnapshot::new(
            vec![session("a", "T1", None), session("b", "T2", None)],
            Utc::now(),
        );
        let limits = AgentLimits {
            max_concurrent: 2,
            ..Default::default()
        };
        let err = snapshot
            .admit(&request("c", "T3", Some("lead")), &limits)
            .unwrap_err();
        assert!(matches!(err, AgentError::ConcurrencyLimit { active: 2, max: 2 }));
    }

    #[test]
    fn test_admit_task_lock_and_delegation() {
        let snapshot = AdmissionSnapshot::new(vec![session("A", "T1", Some("lead"))], Utc::now());
        let limits = AgentLimits::default();

        let err = snapshot
            .admit(&request("c", "T1", Some("other")), &limits)
            .unwrap_err();
        assert!(matches!(err, AgentError::TaskLocked { ref holder, .. } if holder == "A"));

        assert!(snapshot.admit(&request("c", "T1", Some("A")), &limits).is_ok());
    }

    #[test]
    fn test_admit_name_in_use() {
        let snapshot = AdmissionSnapshot::new(vec![session("A", "T1", None)], Utc::now());
        let err = snapshot
            .admit(&request("A", "T9", Some("lead")), &AgentLimits::default())
            .unwrap_err();
        assert!(matches!(err, AgentError::NameInUse(ref n) if n == "A"));
    }

    #[test]
    fn test_admit_parent_limit() {
        let sessions = vec![session("a", "T1", Some("lead")), session("b", "T2", Some("lead"))];
        let snapshot = AdmissionSnapshot::new(sessions, Utc::now());

        let limits = AgentLimits {
            max_agents_per_lead: 2,
            ..Default::default()
        };
        let err = snapshot
            .admit(&request("c", "T3", Some("lead")), &limits)
            .unwrap_err();
        assert!(matches!(err, AgentError::ParentLimit { count: 2, max: 2, .. }));

        let unlimited = AgentLimits {
            max_agents_per_lead: 0,
            ..Default::default()
        };
        assert!(snapshot.admit(&request("c", "T3", Some("lead")), &unlimited).is_ok());
    }

    #[test]
    fn test_admit_duplicate_lead_only_when_enabled() {
        let mut lead = session("lead-1", "T1", None);
        lead.capability = Capability::Lead;
        let snapshot = AdmissionSnapshot::new(vec![lead], Utc::now());
        let req = AdmissionRequest {
            agent_name: "lead-2",
            capability: Capability::Lead,
            task_id: "T1",
            parent_agent: Some("lead-1"),
        };

        assert!(snapshot.admit(&req, &AgentLimits::default()).is_ok());

        let strict = AgentLimits {
            prevent_duplicate_leads: true,
            ..Default::default()
        };
        let err = snapshot.admit(&req, &strict).unwrap_err();
        assert!(matches!(err, AgentError::DuplicateLead { .. }));
    }

    #[test]
    fn test_admit_scout_warning_and_stagger() {
        let now = Utc::now();
        let mut recent = session("a", "T1", Some("lead"));
        recent.started_at = now - ChronoDuration::milliseconds(250);
        let snapshot = AdmissionSnapshot::new(vec![recent], now);
        let limits = AgentLimits {
            stagger_delay_ms: 1_000,
            ..Default::default()
        };

        let admission = snapshot.admit(&request("b", "T2", Some("lead")), &limits).unwrap();
        assert_eq!(admission.stagger_delay, Duration::from_millis(750));
        assert_eq!(admission.warnings.len(), 1);
        assert!(admission.warnings[0].contains("scouts"));

        let mut scout = session("s", "T0", Some("lead"));
        scout.capability = Capability::Scout;
        scout.state = AgentState::Completed;
        let snapshot = AdmissionSnapshot::new(vec![scout], now);
        let admission = snapshot.admit(&request("b", "T2", Some("lead")), &limits).unwrap();
        assert!(admission.warnings.is_empty());
    }
}
