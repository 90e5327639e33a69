// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Agent admission and spawning.
//!
//! # Architecture
//!
//! - **Admission**: pure decisions over one snapshot of the session store
//!   (hierarchy, depth, run and per-parent ceilings, task locks, name
//!   uniqueness, concurrency, stagger delay).
//!
//! - **SpawnOrchestrator**: sequences admission, workspace provisioning,
//!   overlay and hook deployment, dispatch mail, launch, registration and the
//!   handshake into one operation.
//!
//! - **Handshake**: gets the first assignment into a terminal UI that has no
//!   acknowledgement channel.
//!
//! - **Collaborators**: traits for everything outside the core, each with a
//!   production implementation (git worktrees, tmux, a CLI task tracker,
//!   SQLite mail, YAML identities, a markdown overlay, a priming command).
//!
//! ```text
//! spawn(task, options)
//! ├── root guard, option parsing
//! ├── hierarchy, depth
//! ├── current run ── run ceiling
//! ├── session snapshot ── admit ── stagger sleep
//! ├── tracker status
//! ├── worktree ─┬─ overlay, hooks, dispatch mail, claim, identity, launch
//! │             └─ on failure: remove worktree
//! ├── persist session (booting), count against run
//! └── handshake
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use flotilla::config::{load_config, CliOptions};
//! use flotilla::orchestrate::{Collaborators, SpawnOptions, SpawnOrchestrator};
//! use flotilla::store::{RunStore, SessionStore};
//!
//! let config = load_config(root, CliOptions::default())?;
//! let collaborators = Collaborators::for_project(root, &config)?;
//! let orchestrator = SpawnOrchestrator::new(
//!     root,
//!     config,
//!     SessionStore::open(root)?,
//!     RunStore::open(root)?,
//!     collaborators,
//! );
//!
//! let summary = orchestrator
//!     .spawn(SpawnOptions {
//!         task_id: "T-42".into(),
//!         agent_name: "builder-1".into(),
//!         parent_agent: Some("lead-1".into()),
//!         ..Default::default()
//!     })
//!     .await?;
//! ```

pub mod admission;
pub mod handshake;
pub mod identity;
pub mod isolation;
pub mod mail;
pub mod overlay;
pub mod priming;
pub mod spawn;
pub mod terminal;
pub mod tracker;
pub mod worktree;

pub use admission::{
    calculate_stagger_delay, check_depth, check_duplicate_lead, check_parent_agent_limit,
    check_run_session_limit, check_task_lock, count_active_children, is_name_in_use,
    parent_has_scouts, validate_hierarchy, Admission, AdmissionRequest, AdmissionSnapshot,
};
pub use handshake::{
    build_beacon, BeaconInfo, Handshake, HandshakeConfig, HandshakeError, HandshakeOutcome,
};
pub use identity::{AgentIdentity, FileIdentityStore, IdentityError, IdentityStore};
pub use isolation::{IsolationError, Workspace, WorkspaceIsolator};
pub use mail::{MailError, MailMessage, MailPriority, MailType, Mailbox, NewMail, SqliteMailbox};
pub use overlay::{MarkdownOverlay, OverlayContext, OverlayError, OverlayWriter};
pub use priming::{CommandPrimer, ContextPrimer, NoPrimer};
pub use spawn::{
    is_rejection, parse_file_scope, parse_non_negative, resolve_depth, running_as_root,
    Collaborators, SpawnOptions, SpawnOrchestrator, SpawnRequest,
};
pub use terminal::{session_handle, TerminalError, TerminalSessions, TmuxSessions};
pub use tracker::{CliTaskTracker, TaskTracker, TrackerError, TrackerTask, WORKABLE_STATUSES};
pub use worktree::GitWorktreeIsolator;
