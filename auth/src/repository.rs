//! Narrow repository interface consumed by `AuthService`.
//!
//! The actual persistence layer (relational CRUD for users/ACLs/bridges/
//! scripts, the HTTP admin API) lives outside this crate; this trait is the
//! only surface `embermq-auth` needs from it.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{AclRule, MqttCredential};

#[async_trait]
pub trait AuthRepository: Send + Sync {
    async fn credential_by_username(&self, username: &str) -> Result<Option<MqttCredential>>;
    async fn credential_by_id(&self, credential_id: &str) -> Result<Option<MqttCredential>>;
    async fn acl_rules_for_credential(&self, credential_id: &str) -> Result<Vec<AclRule>>;
}
