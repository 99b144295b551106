//! File-provisioned collaborator data.
//!
//! The core crates are persistence-agnostic; this binary's only concrete
//! repository is a YAML file loaded once at startup. Everything it loads
//! is marked `provisioned = true`, matching the admin-layer convention that
//! provisioned records are read-only at runtime. A real deployment would
//! point these repository traits at a relational store instead — that
//! store lives outside this binary entirely.

use std::net::SocketAddr;

use embermq_auth::{AclRule, MqttCredential};
use embermq_bridge::Bridge;
use embermq_script::Script;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ListenerConfig {
    pub tcp_addr: SocketAddr,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    pub listener: ListenerConfig,
    #[serde(default)]
    pub credentials: Vec<MqttCredential>,
    #[serde(default)]
    pub acl_rules: Vec<AclRule>,
    #[serde(default)]
    pub bridges: Vec<Bridge>,
    #[serde(default)]
    pub scripts: Vec<Script>,
    /// If false, `OnConnectAuthenticate`/`OnACLCheck` allow everything —
    /// useful for a first run with an empty credentials list.
    #[serde(default)]
    pub acl_enabled: bool,
}

impl FileConfig {
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let cfg: FileConfig = serde_yaml::from_str(&raw)?;
        Ok(cfg)
    }
}
