// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Spawn orchestrator.
//!
//! Sequences admission, provisioning, launch and handshake for one agent.
//! Every admission check runs before the first external side effect. A
//! failure between workspace creation and launch removes the workspace
//! (best effort) and surfaces the original error. Once the session row is
//! written the orchestrator never rolls it back: a failed handshake leaves a
//! `booting` session for the watchdog.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[cfg(feature = "telemetry")]
use crate::telemetry::{SpawnOutcome, GLOBAL_METRICS};
#[cfg(feature = "telemetry")]
use std::time::Instant;

use super::admission::{
    check_depth, check_run_session_limit, validate_hierarchy, AdmissionRequest, AdmissionSnapshot,
};
use super::handshake::{build_beacon, BeaconInfo, Handshake, HandshakeConfig};
use super::identity::{FileIdentityStore, IdentityStore};
use super::isolation::{Workspace, WorkspaceIsolator};
use super::mail::{MailPriority, MailType, Mailbox, NewMail, SqliteMailbox};
use super::overlay::{MarkdownOverlay, OverlayContext, OverlayWriter};
use super::priming::{CommandPrimer, ContextPrimer, NoPrimer};
use super::terminal::{session_handle, TerminalSessions, TmuxSessions};
use super::tracker::{CliTaskTracker, TaskTracker};
use super::worktree::GitWorktreeIsolator;
use crate::config::ResolvedConfig;
use crate::error::{AgentError, SpawnError, ValidationError};
use crate::runtime::{
    resolve_runtime, HookContext, LaunchOptions, ModelSpec, PermissionMode, RuntimeAdapter,
};
use crate::store::{RunStore, SessionStore};
use crate::types::{AgentSession, AgentState, Capability, SessionSummary};

/// Sender recorded on dispatch mail when there is no parent agent.
const ORCHESTRATOR_SENDER: &str = "orchestrator";

/// Raw spawn options, as typed on the command line.
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    pub task_id: String,
    pub agent_name: String,
    pub capability: Option<String>,
    pub spec_path: Option<String>,
    /// Comma-separated file scope.
    pub files: Option<String>,
    pub parent_agent: Option<String>,
    pub depth: Option<String>,
    pub skip_depth_limit: bool,
    pub skip_task_check: bool,
    pub force_hierarchy: bool,
    /// Per-parent cap override.
    pub max_agents_per_lead: Option<String>,
    pub runtime: Option<String>,
}

/// Validated spawn options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub task_id: String,
    pub agent_name: String,
    pub capability: Capability,
    pub spec_path: Option<String>,
    pub file_scope: Vec<String>,
    pub parent_agent: Option<String>,
    pub depth: Option<u32>,
    pub skip_depth_limit: bool,
    pub skip_task_check: bool,
    pub force_hierarchy: bool,
    pub max_agents_per_lead: Option<u32>,
    pub runtime: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

impl SpawnOptions {
    pub fn validate(&self) -> Result<SpawnRequest, ValidationError> {
        let task_id = self.task_id.trim();
        if task_id.is_empty() {
            return Err(ValidationError::missing("taskId", "a task id is required"));
        }
        let agent_name = self.agent_name.trim();
        if agent_name.is_empty() {
            return Err(ValidationError::missing("name", "an agent name is required"));
        }

        let capability = match non_empty(&self.capability) {
            Some(value) => value.parse()?,
            None => Capability::default(),
        };
        let depth = non_empty(&self.depth)
            .map(|v| parse_non_negative("depth", &v))
            .transpose()?;
        let max_agents_per_lead = non_empty(&self.max_agents_per_lead)
            .map(|v| parse_non_negative("maxAgents", &v))
            .transpose()?;

        Ok(SpawnRequest {
            task_id: task_id.to_string(),
            agent_name: agent_name.to_string(),
            capability,
            spec_path: non_empty(&self.spec_path),
            file_scope: self.files.as_deref().map(parse_file_scope).unwrap_or_default(),
            parent_agent: non_empty(&self.parent_agent),
            depth,
            skip_depth_limit: self.skip_depth_limit,
            skip_task_check: self.skip_task_check,
            force_hierarchy: self.force_hierarchy,
            max_agents_per_lead,
            runtime: non_empty(&self.runtime),
        })
    }
}

/// Parse a numeric option that must be a non-negative integer.
pub fn parse_non_negative(field: &str, value: &str) -> Result<u32, ValidationError> {
    value
        .trim()
        .parse::<u32>()
        .map_err(|_| ValidationError::invalid(field, value, "must be a non-negative integer"))
}

/// Split a comma-separated file list, dropping blanks.
pub fn parse_file_scope(files: &str) -> Vec<String> {
    files
        .split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(String::from)
        .collect()
}

/// An explicit depth wins; otherwise one below the parent's recorded depth.
/// A parent with no recorded session counts as depth 0.
pub fn resolve_depth(
    explicit: Option<u32>,
    parent_agent: Option<&str>,
    parent_session: Option<&AgentSession>,
) -> u32 {
    if let Some(depth) = explicit {
        return depth;
    }
    match (parent_agent, parent_session) {
        (_, Some(parent)) => parent.depth.saturating_add(1),
        (Some(_), None) => 1,
        (None, None) => 0,
    }
}

/// Whether the effective user is root.
pub fn running_as_root() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Whether an error is a policy refusal rather than a provisioning failure.
pub fn is_rejection(err: &SpawnError) -> bool {
    match err {
        SpawnError::Validation(_) | SpawnError::Hierarchy(_) => true,
        SpawnError::Agent(agent) => matches!(
            agent,
            AgentError::DepthExceeded { .. }
                | AgentError::ConcurrencyLimit { .. }
                | AgentError::RunLimit { .. }
                | AgentError::ParentLimit { .. }
                | AgentError::TaskLocked { .. }
                | AgentError::DuplicateLead { .. }
                | AgentError::NameInUse(_)
                | AgentError::Elevated
        ),
    }
}

/// External systems the orchestrator drives.
pub struct Collaborators {
    pub workspaces: Arc<dyn WorkspaceIsolator>,
    pub terminal: Arc<dyn TerminalSessions>,
    /// `None` when task tracking is disabled.
    pub tracker: Option<Arc<dyn TaskTracker>>,
    pub mailbox: Arc<dyn Mailbox>,
    pub identities: Arc<dyn IdentityStore>,
    pub overlay: Arc<dyn OverlayWriter>,
    pub primer: Arc<dyn ContextPrimer>,
}

impl Collaborators {
    /// Production collaborators for a project: git worktrees, tmux, the
    /// configured tracker and primer, and the project's mail database.
    pub fn for_project(project_root: &Path, config: &ResolvedConfig) -> Result<Self, AgentError> {
        let mailbox = SqliteMailbox::open(project_root).map_err(|e| AgentError::Mail(e.to_string()))?;

        let tracker: Option<Arc<dyn TaskTracker>> = config.task_tracker.enabled.then(|| {
            Arc::new(CliTaskTracker::new(&config.task_tracker.command, project_root))
                as Arc<dyn TaskTracker>
        });
        let primer: Arc<dyn ContextPrimer> = if config.priming.enabled {
            Arc::new(CommandPrimer::new(&config.priming.command, project_root))
        } else {
            Arc::new(NoPrimer)
        };

        Ok(Self {
            workspaces: Arc::new(GitWorktreeIsolator::new(project_root, &config.worktrees.base_dir)),
            terminal: Arc::new(TmuxSessions::new()),
            tracker,
            mailbox: Arc::new(mailbox),
            identities: Arc::new(FileIdentityStore::new(project_root)),
            overlay: Arc::new(MarkdownOverlay),
            primer,
        })
    }
}

/// Everything decided before provisioning starts.
struct Plan {
    request: SpawnRequest,
    adapter: &'static dyn RuntimeAdapter,
    depth: u32,
    run_id: String,
    handle: String,
    warnings: Vec<String>,
    /// Dispatch mail queued for the agent, withdrawn if the launch fails.
    dispatch_id: Option<i64>,
}

/// What provisioning produced.
struct Launched {
    workspace: Workspace,
    pid: Option<u32>,
}

pub struct SpawnOrchestrator {
    project_root: PathBuf,
    config: ResolvedConfig,
    sessions: Arc<Mutex<SessionStore>>,
    runs: Arc<Mutex<RunStore>>,
    collaborators: Collaborators,
    handshake: HandshakeConfig,
    flotilla_bin: String,
    is_elevated: fn() -> bool,
}

impl SpawnOrchestrator {
    pub fn new(
        project_root: impl AsRef<Path>,
        config: ResolvedConfig,
        sessions: SessionStore,
        runs: RunStore,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            project_root: project_root.as_ref().to_path_buf(),
            config,
            sessions: Arc::new(Mutex::new(sessions)),
            runs: Arc::new(Mutex::new(runs)),
            collaborators,
            handshake: HandshakeConfig::default(),
            flotilla_bin: "flotilla".to_string(),
            is_elevated: running_as_root,
        }
    }

    pub fn with_handshake_config(mut self, handshake: HandshakeConfig) -> Self {
        self.handshake = handshake;
        self
    }

    /// Executable the deployed hooks call back into.
    pub fn with_flotilla_bin(mut self, bin: impl Into<String>) -> Self {
        self.flotilla_bin = bin.into();
        self
    }

    /// Replace the root check.
    pub fn with_privilege_check(mut self, is_elevated: fn() -> bool) -> Self {
        self.is_elevated = is_elevated;
        self
    }

    pub fn sessions(&self) -> &Arc<Mutex<SessionStore>> {
        &self.sessions
    }

    pub fn runs(&self) -> &Arc<Mutex<RunStore>> {
        &self.runs
    }

    fn project_name(&self) -> String {
        self.config
            .project
            .name
            .clone()
            .or_else(|| {
                self.project_root
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
            })
            .unwrap_or_else(|| "project".to_string())
    }

    /// Spawn one agent for `options.task_id`.
    pub async fn spawn(&self, options: SpawnOptions) -> Result<SessionSummary, SpawnError> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let result = self.spawn_inner(options).await;

        #[cfg(feature = "telemetry")]
        {
            GLOBAL_METRICS.record_operation("spawn.total", start.elapsed());
            let outcome = match &result {
                Ok(_) => SpawnOutcome::Admitted,
                Err(e) if is_rejection(e) => SpawnOutcome::Rejected,
                Err(_) => SpawnOutcome::Failed,
            };
            GLOBAL_METRICS.record_spawn(outcome);
        }

        result
    }

    async fn spawn_inner(&self, options: SpawnOptions) -> Result<SessionSummary, SpawnError> {
        if (self.is_elevated)() {
            return Err(AgentError::Elevated.into());
        }
        let request = options.validate()?;
        let mut plan = self.admit(request).await?;

        self.check_task(&plan.request).await?;

        let workspace = self
            .collaborators
            .workspaces
            .create(
                &plan.request.agent_name,
                &self.config.project.canonical_branch,
                &plan.request.task_id,
            )
            .await
            .map_err(|e| AgentError::Workspace(e.to_string()))?;
        info!(
            agent = %plan.request.agent_name,
            path = %workspace.path.display(),
            branch = %workspace.branch,
            "Created workspace"
        );

        let launched = match self.provision_and_launch(&mut plan, workspace.clone()).await {
            Ok(launched) => launched,
            Err(e) => {
                self.remove_workspace(&workspace.path).await;
                self.retract_dispatch(&plan).await;
                return Err(e.into());
            }
        };

        let session = self.register(&plan, &launched).await?;

        let beacon = build_beacon(
            &BeaconInfo {
                agent_name: &session.agent_name,
                capability: session.capability,
                task_id: &session.task_id,
                depth: session.depth,
                parent_agent: session.parent_agent.as_deref(),
                instruction_path: plan.adapter.instruction_path(),
                prime_command: &self.config.priming.command,
            },
            Utc::now(),
        );
        let outcome = Handshake::new(self.collaborators.terminal.as_ref(), plan.adapter, &self.handshake)
            .run(&plan.handle, &beacon)
            .await
            .map_err(|e| AgentError::Launch(e.to_string()))?;
        info!(agent = %session.agent_name, outcome = outcome.as_str(), "Handshake finished");

        Ok(SessionSummary {
            agent_name: session.agent_name,
            capability: session.capability,
            task_id: session.task_id,
            branch: session.branch_name,
            worktree: session.worktree_path,
            session_handle: session.session_handle,
            pid: session.process_id,
            run_id: plan.run_id,
            runtime: plan.adapter.id().to_string(),
            warnings: plan.warnings,
        })
    }

    /// Hierarchy, depth, run and session admission. The only side effects
    /// are creating the current run and sleeping the stagger delay.
    async fn admit(&self, request: SpawnRequest) -> Result<Plan, SpawnError> {
        let adapter = resolve_runtime(request.runtime.as_deref().unwrap_or(&self.config.runtime.default))?;

        validate_hierarchy(
            request.parent_agent.as_deref(),
            request.capability,
            request.force_hierarchy,
        )?;

        let mut limits = self.config.agents;
        if let Some(max) = request.max_agents_per_lead {
            limits.max_agents_per_lead = max;
        }

        let depth = {
            let sessions = self.sessions.lock().await;
            let parent = match request.parent_agent.as_deref() {
                Some(name) => sessions.get_by_name(name)?,
                None => None,
            };
            resolve_depth(request.depth, request.parent_agent.as_deref(), parent.as_ref())
        };
        if !request.skip_depth_limit {
            check_depth(depth, limits.max_depth)?;
        }

        let run = self.runs.lock().await.current_or_create()?;
        if check_run_session_limit(limits.max_sessions_per_run, run.agent_count) {
            return Err(AgentError::RunLimit {
                run_id: run.id,
                count: run.agent_count,
                max: limits.max_sessions_per_run,
            }
            .into());
        }

        let snapshot = AdmissionSnapshot::new(self.sessions.lock().await.get_all()?, Utc::now());
        let admission = snapshot.admit(
            &AdmissionRequest {
                agent_name: &request.agent_name,
                capability: request.capability,
                task_id: &request.task_id,
                parent_agent: request.parent_agent.as_deref(),
            },
            &limits,
        )?;

        if !admission.stagger_delay.is_zero() {
            info!(delay_ms = admission.stagger_delay.as_millis() as u64, "Staggering launch");
            tokio::time::sleep(admission.stagger_delay).await;
        }
        for warning in &admission.warnings {
            warn!("{}", warning);
        }

        Ok(Plan {
            handle: session_handle(&self.project_name(), &request.agent_name),
            request,
            adapter,
            depth,
            run_id: run.id,
            warnings: admission.warnings,
            dispatch_id: None,
        })
    }

    async fn check_task(&self, request: &SpawnRequest) -> Result<(), SpawnError> {
        let Some(tracker) = &self.collaborators.tracker else {
            return Ok(());
        };
        if request.skip_task_check {
            debug!(task = %request.task_id, "Skipping task check");
            return Ok(());
        }

        let task = tracker
            .show(&request.task_id)
            .await
            .map_err(|e| AgentError::Tracker(e.to_string()))?;
        if !task.is_workable() {
            return Err(ValidationError::invalid(
                "task status",
                task.status,
                format!("task {} must be open or in_progress", request.task_id),
            )
            .into());
        }
        Ok(())
    }

    /// Overlay, hooks, dispatch mail, claim, identity, launch.
    async fn provision_and_launch(
        &self,
        plan: &mut Plan,
        workspace: Workspace,
    ) -> Result<Launched, AgentError> {
        let request = &plan.request;

        let primed_context = self.collaborators.primer.prime(&request.file_scope).await;
        let overlay = OverlayContext {
            agent_name: request.agent_name.clone(),
            capability: request.capability,
            task_id: request.task_id.clone(),
            branch: workspace.branch.clone(),
            parent_agent: request.parent_agent.clone(),
            depth: plan.depth,
            max_depth: self.config.agents.max_depth,
            spec_path: request.spec_path.clone(),
            file_scope: request.file_scope.clone(),
            primed_context,
        };
        self.collaborators
            .overlay
            .write(&workspace.path, plan.adapter.instruction_path(), &overlay)
            .await
            .map_err(|e| AgentError::Overlay(e.to_string()))?;

        plan.adapter
            .deploy_config(
                &workspace.path,
                &HookContext {
                    agent_name: request.agent_name.clone(),
                    capability: request.capability,
                    flotilla_bin: self.flotilla_bin.clone(),
                },
            )
            .map_err(|e| AgentError::Config(e.to_string()))?;

        // Must land before launch so the startup hook finds it
        let dispatch_id = self
            .collaborators
            .mailbox
            .send(dispatch_mail(request, &workspace))
            .await
            .map_err(|e| AgentError::Mail(e.to_string()))?;
        plan.dispatch_id = Some(dispatch_id);

        if let Some(tracker) = &self.collaborators.tracker {
            if let Err(e) = tracker.claim(&request.task_id).await {
                warn!(task = %request.task_id, error = %e, "Could not claim task");
                plan.warnings
                    .push(format!("could not claim task {}: {}", request.task_id, e));
            }
        }

        let identities = &self.collaborators.identities;
        let identity = identities
            .load(&request.agent_name)
            .await
            .map_err(|e| AgentError::Identity(e.to_string()))?;
        if identity.is_none() {
            identities
                .create(&request.agent_name, request.capability)
                .await
                .map_err(|e| AgentError::Identity(e.to_string()))?;
            debug!(agent = %request.agent_name, "Created identity");
        }

        self.collaborators
            .terminal
            .ensure_available()
            .await
            .map_err(|e| AgentError::BackendUnavailable(e.to_string()))?;

        let model = ModelSpec::resolve(&self.config.runtime, request.capability);
        let command = plan.adapter.build_launch_command(&LaunchOptions {
            model: model.as_ref().map(|m| m.model.clone()),
            permission_mode: PermissionMode::Bypass,
            cwd: workspace.path.clone(),
            append_system_prompt: None,
        });
        let env = launch_environment(plan.adapter, model.as_ref(), request, &workspace);

        let pid = self
            .collaborators
            .terminal
            .create_session(&plan.handle, &workspace.path, &command, &env)
            .await
            .map_err(|e| AgentError::Launch(e.to_string()))?;
        info!(agent = %request.agent_name, handle = %plan.handle, ?pid, "Launched agent");

        Ok(Launched { workspace, pid })
    }

    /// Persist the session as booting and count it against the run.
    async fn register(&self, plan: &Plan, launched: &Launched) -> Result<AgentSession, SpawnError> {
        let now = Utc::now();
        let session = AgentSession {
            id: AgentSession::generate_id(&plan.request.agent_name),
            agent_name: plan.request.agent_name.clone(),
            capability: plan.request.capability,
            worktree_path: launched.workspace.path.display().to_string(),
            branch_name: launched.workspace.branch.clone(),
            task_id: plan.request.task_id.clone(),
            session_handle: plan.handle.clone(),
            state: AgentState::Booting,
            process_id: launched.pid,
            parent_agent: plan.request.parent_agent.clone(),
            depth: plan.depth,
            run_id: Some(plan.run_id.clone()),
            started_at: now,
            last_activity: now,
            escalation_level: 0,
            stalled_since: None,
            transcript_path: None,
        };

        self.sessions.lock().await.upsert(&session)?;
        let count = self.runs.lock().await.increment_agent_count(&plan.run_id)?;
        info!(agent = %session.agent_name, run = %plan.run_id, agents_in_run = count, "Registered session");

        Ok(session)
    }

    async fn remove_workspace(&self, path: &Path) {
        if let Err(e) = self.collaborators.workspaces.remove(path).await {
            warn!(path = %path.display(), error = %e, "Failed to clean up workspace");
        }
    }

    /// A later spawn under the same name must not inherit this assignment.
    async fn retract_dispatch(&self, plan: &Plan) {
        let Some(id) = plan.dispatch_id else {
            return;
        };
        match self.collaborators.mailbox.retract(id).await {
            Ok(true) => debug!(agent = %plan.request.agent_name, id, "Withdrew dispatch mail"),
            Ok(false) => {}
            Err(e) => warn!(
                agent = %plan.request.agent_name,
                error = %e,
                "Failed to withdraw dispatch mail"
            ),
        }
    }
}

fn dispatch_mail(request: &SpawnRequest, workspace: &Workspace) -> NewMail {
    let mut body = format!(
        "You are {} ({}). Work task {} on branch {}.",
        request.agent_name, request.capability, request.task_id, workspace.branch
    );
    if let Some(spec) = &request.spec_path {
        body.push_str(&format!("\nSpec: {}", spec));
    }
    if !request.file_scope.is_empty() {
        body.push_str(&format!("\nFiles: {}", request.file_scope.join(", ")));
    }

    NewMail {
        from: request
            .parent_agent
            .clone()
            .unwrap_or_else(|| ORCHESTRATOR_SENDER.to_string()),
        to: request.agent_name.clone(),
        subject: format!("Dispatch: {}", request.task_id),
        body,
        kind: MailType::Dispatch,
        priority: MailPriority::High,
    }
}

fn launch_environment(
    adapter: &dyn RuntimeAdapter,
    model: Option<&ModelSpec>,
    request: &SpawnRequest,
    workspace: &Workspace,
) -> HashMap<String, String> {
    let mut env = model.map(|m| adapter.build_environment(m)).unwrap_or_default();
    env.insert("FLOTILLA_AGENT_NAME".to_string(), request.agent_name.clone());
    env.insert("FLOTILLA_TASK_ID".to_string(), request.task_id.clone());
    env.insert(
        "FLOTILLA_WORKTREE_PATH".to_string(),
        workspace.path.display().to_string(),
    );
    env
}
