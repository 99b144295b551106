//! Credential and ACL data model.

use serde::{Deserialize, Serialize};

/// A stored MQTT credential. `username` is unique and non-empty once a
/// client has successfully authenticated with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MqttCredential {
    pub id: String,
    pub username: String,
    pub password_hash: String,
    /// `true` if this credential was declared via config-file provisioning;
    /// the admin layer (out of scope here) refuses to mutate provisioned
    /// records.
    pub provisioned: bool,
}

/// What an ACL rule permits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Permission {
    Pub,
    Sub,
    PubSub,
}

impl Permission {
    /// Whether this permission covers the given action.
    pub fn covers(self, action: Action) -> bool {
        match (self, action) {
            (Permission::PubSub, _) => true,
            (Permission::Pub, Action::Pub) => true,
            (Permission::Sub, Action::Sub) => true,
            _ => false,
        }
    }
}

/// The action being checked against a credential's ACL rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Pub,
    Sub,
}

/// One ACL entry: a credential is allowed `permission` on topics matching
/// `topic_pattern`. Unique key is `(credential_id, topic_pattern)`; rows are
/// cascade-deleted with their owning credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclRule {
    pub id: String,
    pub credential_id: String,
    pub topic_pattern: String,
    pub permission: Permission,
    pub provisioned: bool,
}
