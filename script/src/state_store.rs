//! `StateStore`: TTL key-value storage for script state, isolated per scope.
//!
//! Two implementations share one trait: a writeback cache over a relational
//! `StateRepository` (dirty-bit map, periodic flush) and a direct-write
//! layer over an embedded `embermq_kv::KVStore`. Either must give scripts
//! identical semantics — isolation between scopes, and entries that vanish
//! once their TTL has passed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};

const FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const EXPIRE_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Either the global scope or a specific script's private scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    Script(String),
}

impl Scope {
    /// The opaque external key schema: `"global:<k>"` or `"script:<id>:<k>"`.
    fn storage_key(&self, key: &str) -> String {
        match self {
            Scope::Global => format!("global:{key}"),
            Scope::Script(id) => format!("script:{id}:{key}"),
        }
    }

    fn storage_prefix(&self) -> String {
        match self {
            Scope::Global => "global:".to_string(),
            Scope::Script(id) => format!("script:{id}:"),
        }
    }

    fn strip_prefix<'a>(&self, storage_key: &'a str) -> Option<&'a str> {
        storage_key.strip_prefix(&self.storage_prefix())
    }
}

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn set(&self, scope: &Scope, key: &str, value: Value, ttl: Option<Duration>) -> Result<()>;
    async fn get(&self, scope: &Scope, key: &str) -> Result<Option<Value>>;
    async fn delete(&self, scope: &Scope, key: &str) -> Result<()>;
    async fn keys(&self, scope: &Scope) -> Result<Vec<String>>;
    /// Idempotent sweep of expired entries; safe to call repeatedly.
    async fn expire_now(&self);
}

/// Narrow CRUD contract over the durable relational store, used only by the
/// writeback backend. Keys passed here are the opaque `storage_key()` form.
#[async_trait]
pub trait StateRepository: Send + Sync {
    async fn load_all(&self) -> Result<Vec<(String, Value, Option<SystemTime>)>>;
    async fn upsert(&self, key: &str, value: &Value, expires_at: Option<SystemTime>) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

struct MemEntry {
    value: Value,
    expires_at: Option<SystemTime>,
    dirty: bool,
}

impl MemEntry {
    fn is_expired(&self, now: SystemTime) -> bool {
        matches!(self.expires_at, Some(t) if t <= now)
    }
}

/// Writeback backend: reads/writes go to an in-memory map first; a
/// background task flushes dirty entries to the repository every 5 seconds,
/// and a second task sweeps expired entries out of both layers.
pub struct WritebackStateStore {
    repository: Arc<dyn StateRepository>,
    map: RwLock<HashMap<String, MemEntry>>,
}

impl WritebackStateStore {
    pub async fn load(repository: Arc<dyn StateRepository>) -> Result<Arc<Self>> {
        let rows = repository.load_all().await?;
        let mut map = HashMap::new();
        for (key, value, expires_at) in rows {
            map.insert(
                key,
                MemEntry {
                    value,
                    expires_at,
                    dirty: false,
                },
            );
        }
        Ok(Arc::new(Self {
            repository,
            map: RwLock::new(map),
        }))
    }

    /// Spawns the flush and expiry-sweep background tasks. Returns both
    /// handles so a caller can abort them on shutdown.
    pub fn spawn_background_tasks(self: &Arc<Self>) -> (tokio::task::JoinHandle<()>, tokio::task::JoinHandle<()>) {
        let flush_store = self.clone();
        let flush = tokio::spawn(async move {
            let mut interval = tokio::time::interval(FLUSH_INTERVAL);
            loop {
                interval.tick().await;
                flush_store.flush().await;
            }
        });

        let expire_store = self.clone();
        let sweep = tokio::spawn(async move {
            let mut interval = tokio::time::interval(EXPIRE_SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                expire_store.expire_now().await;
            }
        });

        (flush, sweep)
    }

    /// Flushes every dirty entry to the repository, then clears the dirty
    /// bit. Also runs on shutdown to guarantee no writes are lost.
    pub async fn flush(&self) {
        let dirty: Vec<(String, Value, Option<SystemTime>)> = {
            let guard = self.map.read();
            guard
                .iter()
                .filter(|(_, e)| e.dirty)
                .map(|(k, e)| (k.clone(), e.value.clone(), e.expires_at))
                .collect()
        };

        if dirty.is_empty() {
            return;
        }

        let mut flushed = Vec::with_capacity(dirty.len());
        for (key, value, expires_at) in dirty {
            match self.repository.upsert(&key, &value, expires_at).await {
                Ok(()) => flushed.push(key),
                Err(e) => warn!(error = %e, key, "state store: flush failed, will retry"),
            }
        }

        let mut guard = self.map.write();
        for key in flushed {
            if let Some(entry) = guard.get_mut(&key) {
                entry.dirty = false;
            }
        }
    }
}

#[async_trait]
impl StateStore for WritebackStateStore {
    async fn set(&self, scope: &Scope, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        let storage_key = scope.storage_key(key);
        let expires_at = ttl.map(|d| SystemTime::now() + d);
        self.map.write().insert(
            storage_key,
            MemEntry {
                value,
                expires_at,
                dirty: true,
            },
        );
        Ok(())
    }

    async fn get(&self, scope: &Scope, key: &str) -> Result<Option<Value>> {
        let storage_key = scope.storage_key(key);
        let now = SystemTime::now();
        Ok(self.map.read().get(&storage_key).and_then(|e| {
            if e.is_expired(now) {
                None
            } else {
                Some(e.value.clone())
            }
        }))
    }

    async fn delete(&self, scope: &Scope, key: &str) -> Result<()> {
        let storage_key = scope.storage_key(key);
        self.map.write().remove(&storage_key);
        self.repository.delete(&storage_key).await
    }

    async fn keys(&self, scope: &Scope) -> Result<Vec<String>> {
        let prefix = scope.storage_prefix();
        let now = SystemTime::now();
        Ok(self
            .map
            .read()
            .iter()
            .filter(|(k, e)| k.starts_with(&prefix) && !e.is_expired(now))
            .filter_map(|(k, _)| scope.strip_prefix(k).map(str::to_string))
            .collect())
    }

    async fn expire_now(&self) {
        let now = SystemTime::now();
        let expired: Vec<String> = {
            let guard = self.map.read();
            guard
                .iter()
                .filter(|(_, e)| e.is_expired(now))
                .map(|(k, _)| k.clone())
                .collect()
        };
        if expired.is_empty() {
            return;
        }
        self.map.write().retain(|_, e| !e.is_expired(now));
        for key in &expired {
            if let Err(e) = self.repository.delete(key).await {
                warn!(error = %e, key, "state store: failed to propagate expiry delete");
            }
        }
        debug!(count = expired.len(), "state store: swept expired entries");
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct Envelope {
    value: Value,
    expires_at: Option<u64>,
}

/// Direct-write backend over an embedded KV store. Every write goes straight
/// to the KV; since the KV here has no native per-key TTL, an expires-at
/// envelope is stored alongside the value and checked on every read.
pub struct DirectStateStore {
    kv: Arc<dyn embermq_kv::KVStore>,
}

impl DirectStateStore {
    pub fn new(kv: Arc<dyn embermq_kv::KVStore>) -> Self {
        Self { kv }
    }
}

fn unix_secs(t: SystemTime) -> u64 {
    t.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[async_trait]
impl StateStore for DirectStateStore {
    async fn set(&self, scope: &Scope, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        let storage_key = scope.storage_key(key);
        let expires_at = ttl.map(|d| unix_secs(SystemTime::now() + d));
        let envelope = Envelope { value, expires_at };
        let bytes = serde_json::to_vec(&envelope)?;
        self.kv.set(&storage_key, &bytes).map_err(Error::from)
    }

    async fn get(&self, scope: &Scope, key: &str) -> Result<Option<Value>> {
        let storage_key = scope.storage_key(key);
        let Some(bytes) = self.kv.get(&storage_key)? else {
            return Ok(None);
        };
        let envelope: Envelope = serde_json::from_slice(&bytes)?;
        if let Some(expires_at) = envelope.expires_at {
            if expires_at <= unix_secs(SystemTime::now()) {
                let _ = self.kv.delete(&storage_key);
                return Ok(None);
            }
        }
        Ok(Some(envelope.value))
    }

    async fn delete(&self, scope: &Scope, key: &str) -> Result<()> {
        self.kv.delete(&scope.storage_key(key)).map_err(Error::from)
    }

    async fn keys(&self, scope: &Scope) -> Result<Vec<String>> {
        let prefix = scope.storage_prefix();
        let now = unix_secs(SystemTime::now());
        let mut out = Vec::new();
        for (k, bytes) in self.kv.scan(&prefix)? {
            let Ok(envelope) = serde_json::from_slice::<Envelope>(&bytes) else {
                continue;
            };
            if matches!(envelope.expires_at, Some(t) if t <= now) {
                continue;
            }
            if let Some(stripped) = scope.strip_prefix(&k) {
                out.push(stripped.to_string());
            }
        }
        Ok(out)
    }

    async fn expire_now(&self) {
        // The embedded KV's own GC reclaims space lazily; direct reads and
        // scans already filter out expired entries, so there is nothing
        // further to do here.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeRepository {
        rows: Mutex<HashMap<String, (Value, Option<SystemTime>)>>,
    }

    #[async_trait]
    impl StateRepository for FakeRepository {
        async fn load_all(&self) -> Result<Vec<(String, Value, Option<SystemTime>)>> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .map(|(k, (v, e))| (k.clone(), v.clone(), *e))
                .collect())
        }

        async fn upsert(&self, key: &str, value: &Value, expires_at: Option<SystemTime>) -> Result<()> {
            self.rows
                .lock()
                .unwrap()
                .insert(key.to_string(), (value.clone(), expires_at));
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.rows.lock().unwrap().remove(key);
            Ok(())
        }
    }

    fn empty_repo() -> Arc<FakeRepository> {
        Arc::new(FakeRepository {
            rows: Mutex::new(HashMap::new()),
        })
    }

    #[tokio::test]
    async fn scopes_are_isolated() {
        let store = WritebackStateStore::load(empty_repo()).await.unwrap();

        store
            .set(&Scope::Script("A".into()), "k", Value::from(1), None)
            .await
            .unwrap();
        store
            .set(&Scope::Script("B".into()), "k", Value::from(2), None)
            .await
            .unwrap();

        assert_eq!(
            store.get(&Scope::Script("A".into()), "k").await.unwrap(),
            Some(Value::from(1))
        );
        assert_eq!(
            store.get(&Scope::Script("B".into()), "k").await.unwrap(),
            Some(Value::from(2))
        );
        assert_eq!(store.keys(&Scope::Script("A".into())).await.unwrap(), vec!["k"]);
    }

    #[tokio::test]
    async fn expired_writeback_entry_is_treated_as_miss() {
        let store = WritebackStateStore::load(empty_repo()).await.unwrap();
        store
            .set(&Scope::Global, "k", Value::from("v"), Some(Duration::from_secs(0)))
            .await
            .unwrap();

        // TTL of zero means the entry expired immediately.
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(store.get(&Scope::Global, "k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn flush_persists_dirty_entries_and_clears_dirty_bit() {
        let repo = empty_repo();
        let store = WritebackStateStore::load(repo.clone()).await.unwrap();
        store
            .set(&Scope::Global, "k", Value::from("v"), None)
            .await
            .unwrap();

        store.flush().await;

        assert!(repo.rows.lock().unwrap().contains_key("global:k"));
    }

    #[tokio::test]
    async fn direct_store_round_trips_through_memory_kv() {
        let kv: Arc<dyn embermq_kv::KVStore> = Arc::new(embermq_kv::memory::MemoryStore::new());
        let store = DirectStateStore::new(kv);

        store
            .set(&Scope::Script("S".into()), "n", Value::from(5), None)
            .await
            .unwrap();
        assert_eq!(
            store.get(&Scope::Script("S".into()), "n").await.unwrap(),
            Some(Value::from(5))
        );

        store.delete(&Scope::Script("S".into()), "n").await.unwrap();
        assert_eq!(store.get(&Scope::Script("S".into()), "n").await.unwrap(), None);
    }

    #[tokio::test]
    async fn direct_store_ttl_expires() {
        let kv: Arc<dyn embermq_kv::KVStore> = Arc::new(embermq_kv::memory::MemoryStore::new());
        let store = DirectStateStore::new(kv);

        store
            .set(&Scope::Global, "k", Value::from("v"), Some(Duration::from_secs(0)))
            .await
            .unwrap();
        assert_eq!(store.get(&Scope::Global, "k").await.unwrap(), None);
    }
}
