// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Persistent agent identities, one YAML file per agent name.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::STATE_DIR;
use crate::types::Capability;

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid identity file {path}: {message}")]
    Format { path: String, message: String },
}

/// What an agent name has accumulated across sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentIdentity {
    pub name: String,
    pub capability: Capability,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub sessions_completed: u32,
    #[serde(default)]
    pub expertise_domains: Vec<String>,
    #[serde(default)]
    pub recent_tasks: Vec<String>,
}

impl AgentIdentity {
    pub fn new(name: impl Into<String>, capability: Capability) -> Self {
        Self {
            name: name.into(),
            capability,
            created_at: Utc::now(),
            sessions_completed: 0,
            expertise_domains: Vec::new(),
            recent_tasks: Vec::new(),
        }
    }
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn load(&self, name: &str) -> Result<Option<AgentIdentity>, IdentityError>;

    async fn create(
        &self,
        name: &str,
        capability: Capability,
    ) -> Result<AgentIdentity, IdentityError>;
}

/// Identities under `.flotilla/agents/<name>/identity.yaml`.
pub struct FileIdentityStore {
    root: PathBuf,
}

impl FileIdentityStore {
    pub fn new(project_root: &Path) -> Self {
        Self {
            root: project_root.join(STATE_DIR).join("agents"),
        }
    }

    pub fn identity_path(&self, name: &str) -> PathBuf {
        self.root.join(name).join("identity.yaml")
    }
}

#[async_trait]
impl IdentityStore for FileIdentityStore {
    async fn load(&self, name: &str) -> Result<Option<AgentIdentity>, IdentityError> {
        let path = self.identity_path(name);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_yaml::from_str(&content)
            .map(Some)
            .map_err(|e| IdentityError::Format {
                path: path.display().to_string(),
                message: e.to_string(),
            })
    }

    async fn create(
        &self,
        name: &str,
        capability: Capability,
    ) -> Result<AgentIdentity, IdentityError> {
        let path = self.identity_path(name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let identity = AgentIdentity::new(name, capability);
        let content = serde_yaml::to_string(&identity).map_err(|e| IdentityError::Format {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        tokio::fs::write(&path, content).await?;
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_missing_then_create() {
        let temp = TempDir::new().unwrap();
        let store = FileIdentityStore::new(temp.path());

        assert!(store.load("builder-1").await.unwrap().is_none());

        let created = store.create("builder-1", Capability::Builder).await.unwrap();
        let loaded = store.load("builder-1").await.unwrap().unwrap();
        assert_eq!(loaded.name, "builder-1");
        assert_eq!(loaded.capability, Capability::Builder);
        assert_eq!(loaded.created_at, created.created_at);
        assert!(store
            .identity_path("builder-1")
            .ends_with(".flotilla/agents/builder-1/identity.yaml"));
    }

    #[tokio::test]
    async fn test_load_tolerates_missing_optional_fields() {
        let temp = TempDir::new().unwrap();
        let store = FileIdentityStore::new(temp.path());
        let path = store.identity_path("scout-1");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            "name: scout-1\ncapability: scout\ncreatedAt: 2026-01-02T03:04:05Z\n",
        )
        .unwrap();

        let loaded = store.load("scout-1").await.unwrap().unwrap();
        assert_eq!(loaded.sessions_completed, 0);
        assert!(loaded.recent_tasks.is_empty());
    }

    #[tokio::test]
    async fn test_load_corrupt_file_is_error() {
        let temp = TempDir::new().unwrap();
        let store = FileIdentityStore::new(temp.path());
        let path = store.identity_path("x");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "name: [unterminated").unwrap();

        assert!(matches!(
            store.load("x").await,
            Err(IdentityError::Format { .. })
        ));
    }
}
