// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Flotilla - admission control and spawn handshakes for agent fleets.
//!
//! Coding agents run as interactive terminal programs, one per isolated git
//! worktree. Flotilla decides whether a new agent may start, provisions its
//! workspace, launches it, and makes sure its first assignment lands.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`types`] - Core records (AgentSession, Run, Capability, SessionSummary)
//! - [`error`] - Error types and result aliases
//! - [`config`] - Configuration loading and merging
//! - [`telemetry`] - Tracing setup and operation metrics
//! - [`store`] - SQLite session and run stores shared across processes
//! - [`runtime`] - Backend adapters (claude, codex, pi) and transcript parsing
//! - [`orchestrate`] - Admission, the spawn orchestrator, and the handshake
//!
//! # Example
//!
//! ```rust,ignore
//! use flotilla::orchestrate::{AdmissionRequest, AdmissionSnapshot};
//! use flotilla::store::SessionStore;
//!
//! let store = SessionStore::open(root)?;
//! let snapshot = AdmissionSnapshot::new(store.get_all()?, chrono::Utc::now());
//! let admission = snapshot.admit(&request, &config.agents)?;
//! ```

pub mod config;
pub mod error;
pub mod orchestrate;
pub mod runtime;
pub mod store;
pub mod telemetry;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{
    AgentError, ConfigError, HierarchyError, Result, SpawnError, StoreError, ValidationError,
};
pub use types::{
    ActivityEvent, AgentSession, AgentState, Capability, Run, RunStatus, SessionSummary,
};

/// Flotilla version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
