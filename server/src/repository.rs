//! In-memory repository implementations backed by the loaded `FileConfig`.
//!
//! These exist only so the binary has something to run against; they are
//! not the relational store the core crates are designed to sit in front
//! of. Every lookup clones out of a plain `Vec` — fine for a provisioned
//! file with a few dozen entries, not meant to scale further.

use std::sync::Arc;

use async_trait::async_trait;
use embermq_auth::{AclRule, AuthRepository, MqttCredential};
use embermq_bridge::Bridge;
use embermq_core::{BridgeRepository, ClientRepository};
use embermq_script::{Script, ScriptLog, ScriptLogRepository, ScriptRepository};
use parking_lot::Mutex;
use tracing::info;

use crate::config::FileConfig;

pub struct FileAuthRepository {
    credentials: Vec<MqttCredential>,
    acl_rules: Vec<AclRule>,
}

impl FileAuthRepository {
    pub fn new(config: &FileConfig) -> Self {
        Self {
            credentials: config.credentials.clone(),
            acl_rules: config.acl_rules.clone(),
        }
    }
}

#[async_trait]
impl AuthRepository for FileAuthRepository {
    async fn credential_by_username(&self, username: &str) -> embermq_auth::Result<Option<MqttCredential>> {
        Ok(self.credentials.iter().find(|c| c.username == username).cloned())
    }

    async fn credential_by_id(&self, credential_id: &str) -> embermq_auth::Result<Option<MqttCredential>> {
        Ok(self.credentials.iter().find(|c| c.id == credential_id).cloned())
    }

    async fn acl_rules_for_credential(&self, credential_id: &str) -> embermq_auth::Result<Vec<AclRule>> {
        Ok(self
            .acl_rules
            .iter()
            .filter(|r| r.credential_id == credential_id)
            .cloned()
            .collect())
    }
}

pub struct FileBridgeRepository {
    bridges: Vec<Bridge>,
}

impl FileBridgeRepository {
    pub fn new(config: &FileConfig) -> Self {
        Self {
            bridges: config.bridges.clone(),
        }
    }
}

#[async_trait]
impl BridgeRepository for FileBridgeRepository {
    async fn load_bridges(&self) -> embermq_core::Result<Vec<Bridge>> {
        Ok(self.bridges.clone())
    }
}

pub struct FileScriptRepository {
    scripts: Vec<Script>,
}

impl FileScriptRepository {
    pub fn new(config: &FileConfig) -> Self {
        Self {
            scripts: config.scripts.clone(),
        }
    }
}

#[async_trait]
impl ScriptRepository for FileScriptRepository {
    async fn load_enabled_scripts(&self) -> embermq_script::Result<Vec<Script>> {
        Ok(self.scripts.iter().filter(|s| s.enabled).cloned().collect())
    }
}

/// Logs scripts emit go to `tracing`; there is no log store backing this
/// binary. A deployment wiring a real persistence layer would append these
/// to the relational `script_logs` table instead.
pub struct TracingScriptLogRepository;

#[async_trait]
impl ScriptLogRepository for TracingScriptLogRepository {
    async fn append(&self, log: ScriptLog) -> embermq_script::Result<()> {
        info!(
            script_id = %log.script_id,
            trigger = ?log.trigger_type,
            level = ?log.level,
            execution_ms = log.execution_ms,
            "{}",
            log.message
        );
        Ok(())
    }

    /// No-op: this binary has nothing backing `append` but `tracing`, so
    /// there is nothing to prune. A deployment with a real log store would
    /// run its `DELETE FROM script_logs WHERE created_at < cutoff` here.
    async fn prune_older_than(&self, _cutoff: chrono::DateTime<chrono::Utc>) -> embermq_script::Result<()> {
        Ok(())
    }
}

/// Tracks connected client ids in memory; this binary has no device
/// registry to upsert into.
pub struct InMemoryClientRepository {
    active: Mutex<Vec<(String, String)>>,
}

impl InMemoryClientRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            active: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ClientRepository for InMemoryClientRepository {
    async fn upsert_active(&self, client_id: &str, username: &str) -> embermq_core::Result<()> {
        let mut active = self.active.lock();
        active.retain(|(id, _)| id != client_id);
        active.push((client_id.to_string(), username.to_string()));
        Ok(())
    }

    async fn mark_inactive(&self, client_id: &str) -> embermq_core::Result<()> {
        self.active.lock().retain(|(id, _)| id != client_id);
        Ok(())
    }
}
