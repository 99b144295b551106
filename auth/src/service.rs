//! `AuthService`: cache-through authentication and ACL checks.

use std::sync::Arc;

use tracing::warn;

use crate::cache::AuthCache;
use crate::repository::AuthRepository;
use crate::types::{AclRule, Action, MqttCredential};

/// Authenticates clients and checks topic-level ACLs, reading from the
/// cache first and falling back to the repository on a miss.
pub struct AuthService {
    cache: AuthCache,
    repository: Arc<dyn AuthRepository>,
    /// Whether ACL enforcement is active. When disabled, `check_acl` always
    /// allows — anonymous clients are still denied only when enforcement is
    /// on.
    acl_enforced: bool,
}

impl AuthService {
    pub fn new(cache: AuthCache, repository: Arc<dyn AuthRepository>, acl_enforced: bool) -> Self {
        Self {
            cache,
            repository,
            acl_enforced,
        }
    }

    /// Looks up `username`, cache first, falls back to the repository on a
    /// miss, and verifies `password` against the stored hash in constant
    /// time. Returns `None` for both an unknown user and a wrong password —
    /// the two cases must be indistinguishable to the caller.
    pub async fn authenticate(&self, username: &str, password: &str) -> Option<MqttCredential> {
        if username.is_empty() {
            return None;
        }

        let credential = match self.resolve_credential(username).await {
            Some(c) => c,
            None => return None,
        };

        match bcrypt::verify(password, &credential.password_hash) {
            Ok(true) => Some(credential),
            Ok(false) => None,
            Err(e) => {
                warn!(error = %e, "auth: password verification failed");
                None
            }
        }
    }

    /// Checks whether `username` may perform `action` on `topic`. Anonymous
    /// (empty username) is denied whenever ACL enforcement is on. Repository
    /// failures fail closed (deny) and are logged.
    pub async fn check_acl(&self, username: &str, topic: &str, action: Action) -> bool {
        if !self.acl_enforced {
            return true;
        }
        if username.is_empty() {
            return false;
        }

        let credential = match self.resolve_credential(username).await {
            Some(c) => c,
            None => return false,
        };

        let rules = match self.resolve_acls(&credential.id).await {
            Some(r) => r,
            None => return false,
        };

        rules
            .iter()
            .any(|rule| rule.permission.covers(action) && embermq_topic::matches(topic, &rule.topic_pattern))
    }

    async fn resolve_credential(&self, username: &str) -> Option<MqttCredential> {
        if let Some(credential) = self.cache.get_credential(username) {
            return Some(credential);
        }

        match self.repository.credential_by_username(username).await {
            Ok(Some(credential)) => {
                self.cache
                    .set_credential(username.to_string(), credential.clone());
                Some(credential)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, username, "auth: repository lookup failed, denying");
                None
            }
        }
    }

    async fn resolve_acls(&self, credential_id: &str) -> Option<Vec<AclRule>> {
        if let Some(rules) = self.cache.get_acls(credential_id) {
            return Some(rules);
        }

        match self.repository.acl_rules_for_credential(credential_id).await {
            Ok(rules) => {
                self.cache.set_acls(credential_id.to_string(), rules.clone());
                Some(rules)
            }
            Err(e) => {
                warn!(error = %e, credential_id, "auth: ACL lookup failed, denying");
                None
            }
        }
    }
}
