//! TTL cache of credentials and ACL rule lists, with a background sweeper.
//!
//! Two maps: `username -> (MqttCredential, cached_at)` and
//! `credential_id -> (Vec<AclRule>, cached_at)`. Entries older than the
//! configured TTL are treated as misses by `get`, and are additionally swept
//! out once a minute by a background task so the maps don't grow unbounded
//! with dead entries between reads.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::debug;

use crate::types::{AclRule, MqttCredential};

const MIN_TTL: Duration = Duration::from_secs(60);
const MAX_TTL: Duration = Duration::from_secs(3600);
const DEFAULT_TTL: Duration = Duration::from_secs(300);
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct Entry<T> {
    value: T,
    cached_at: Instant,
}

struct Inner {
    ttl: Duration,
    credentials: RwLock<HashMap<String, Entry<MqttCredential>>>,
    acls: RwLock<HashMap<String, Entry<Vec<AclRule>>>>,
}

/// Shared handle to the auth cache. Cheap to clone; all clones see the same
/// underlying maps.
#[derive(Clone)]
pub struct AuthCache {
    inner: Arc<Inner>,
}

impl AuthCache {
    /// Creates a cache with the given TTL, clamped to `[1 minute, 1 hour]`.
    pub fn new(ttl: Duration) -> Self {
        let ttl = ttl.clamp(MIN_TTL, MAX_TTL);
        Self {
            inner: Arc::new(Inner {
                ttl,
                credentials: RwLock::new(HashMap::new()),
                acls: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Spawns the once-a-minute background sweep task. Callers never block
    /// on it; it only exists to reclaim memory from entries nobody has read
    /// (and so evicted) since they expired.
    pub fn spawn_sweeper(&self) -> tokio::task::JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                cache.sweep();
            }
        })
    }

    fn sweep(&self) {
        let now = Instant::now();
        let ttl = self.inner.ttl;

        let mut credentials = self.inner.credentials.write();
        let before = credentials.len();
        credentials.retain(|_, e| now.duration_since(e.cached_at) < ttl);
        let evicted = before - credentials.len();
        drop(credentials);
        if evicted > 0 {
            metrics::counter!("embermq_auth_cache_evictions_total").increment(evicted as u64);
            debug!(evicted, "auth cache: swept expired credentials");
        }

        let mut acls = self.inner.acls.write();
        let before = acls.len();
        acls.retain(|_, e| now.duration_since(e.cached_at) < ttl);
        let evicted = before - acls.len();
        drop(acls);
        if evicted > 0 {
            metrics::counter!("embermq_auth_cache_evictions_total").increment(evicted as u64);
            debug!(evicted, "auth cache: swept expired ACL lists");
        }
    }

    pub fn get_credential(&self, username: &str) -> Option<MqttCredential> {
        let found = self.inner.credentials.read().get(username).and_then(|e| {
            (Instant::now().duration_since(e.cached_at) < self.inner.ttl).then(|| e.value.clone())
        });
        if found.is_some() {
            metrics::counter!("embermq_auth_cache_hits_total", "kind" => "credential")
                .increment(1);
        } else {
            metrics::counter!("embermq_auth_cache_misses_total", "kind" => "credential")
                .increment(1);
        }
        found
    }

    pub fn set_credential(&self, username: String, credential: MqttCredential) {
        self.inner.credentials.write().insert(
            username,
            Entry {
                value: credential,
                cached_at: Instant::now(),
            },
        );
    }

    pub fn delete_credential(&self, username: &str) {
        self.inner.credentials.write().remove(username);
    }

    pub fn get_acls(&self, credential_id: &str) -> Option<Vec<AclRule>> {
        let found = self.inner.acls.read().get(credential_id).and_then(|e| {
            (Instant::now().duration_since(e.cached_at) < self.inner.ttl).then(|| e.value.clone())
        });
        if found.is_some() {
            metrics::counter!("embermq_auth_cache_hits_total", "kind" => "acl").increment(1);
        } else {
            metrics::counter!("embermq_auth_cache_misses_total", "kind" => "acl").increment(1);
        }
        found
    }

    pub fn set_acls(&self, credential_id: String, rules: Vec<AclRule>) {
        self.inner.acls.write().insert(
            credential_id,
            Entry {
                value: rules,
                cached_at: Instant::now(),
            },
        );
    }

    pub fn delete_acls(&self, credential_id: &str) {
        self.inner.acls.write().remove(credential_id);
    }

    /// Invalidates every cached entry for a principal: both the credential
    /// keyed by username and the ACL list keyed by credential id. Called by
    /// the admin layer after a credential/ACL mutation.
    pub fn invalidate(&self, username: &str, credential_id: &str) {
        self.delete_credential(username);
        self.delete_acls(credential_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(id: &str, username: &str) -> MqttCredential {
        MqttCredential {
            id: id.to_string(),
            username: username.to_string(),
            password_hash: "hash".to_string(),
            provisioned: false,
        }
    }

    #[test]
    fn ttl_is_clamped() {
        let cache = AuthCache::new(Duration::from_secs(1));
        assert_eq!(cache.inner.ttl, MIN_TTL);

        let cache = AuthCache::new(Duration::from_secs(10_000));
        assert_eq!(cache.inner.ttl, MAX_TTL);
    }

    #[test]
    fn miss_then_hit_then_delete() {
        let cache = AuthCache::new(DEFAULT_TTL);
        assert!(cache.get_credential("alice").is_none());

        cache.set_credential("alice".to_string(), credential("c1", "alice"));
        assert!(cache.get_credential("alice").is_some());

        cache.delete_credential("alice");
        assert!(cache.get_credential("alice").is_none());
    }

    #[test]
    fn expired_entry_is_treated_as_miss() {
        let cache = AuthCache::new(MIN_TTL);
        cache.set_credential("alice".to_string(), credential("c1", "alice"));

        // Directly age the entry past TTL rather than sleeping in a test.
        {
            let mut guard = cache.inner.credentials.write();
            let entry = guard.get_mut("alice").unwrap();
            entry.cached_at = Instant::now() - MIN_TTL - Duration::from_secs(1);
        }

        assert!(cache.get_credential("alice").is_none());
    }

    #[test]
    fn invalidate_clears_both_maps() {
        let cache = AuthCache::new(DEFAULT_TTL);
        cache.set_credential("alice".to_string(), credential("c1", "alice"));
        cache.set_acls("c1".to_string(), vec![]);

        cache.invalidate("alice", "c1");

        assert!(cache.get_credential("alice").is_none());
        assert!(cache.get_acls("c1").is_none());
    }

    #[tokio::test]
    async fn sweeper_evicts_expired_entries_without_blocking_callers() {
        let cache = AuthCache::new(MIN_TTL);
        cache.set_credential("alice".to_string(), credential("c1", "alice"));
        {
            let mut guard = cache.inner.credentials.write();
            let entry = guard.get_mut("alice").unwrap();
            entry.cached_at = Instant::now() - MIN_TTL - Duration::from_secs(1);
        }

        cache.sweep();
        assert_eq!(cache.inner.credentials.read().len(), 0);
    }
}
