//! Publish fingerprint table used for self-trigger suppression.
//!
//! When a script publishes, the Engine records a short-lived fingerprint of
//! `(script_id, topic, hash(payload))`. The publish re-enters the local
//! broker and is redispatched as an ordinary `on_publish` event; if that
//! event matches a fingerprint, the originating script is skipped for that
//! one event (other matching scripts still run — this is what makes script
//! chaining work without a script re-triggering itself forever).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

const DEFAULT_TTL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Key {
    script_id: String,
    topic: String,
    payload_hash: [u8; 32],
}

/// Hashes a payload for fingerprint comparison. Exposed so callers and
/// tests can construct lookup keys without duplicating the hash algorithm.
pub fn hash_payload(payload: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hasher.finalize().into()
}

/// Concurrent table of recent script-publish fingerprints, each expiring a
/// few seconds after it was recorded.
pub struct FingerprintTable {
    entries: Mutex<HashMap<Key, Instant>>,
    ttl: Duration,
}

impl Default for FingerprintTable {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl FingerprintTable {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Records that `script_id` just published `payload` to `topic`.
    pub fn record(&self, script_id: &str, topic: &str, payload: &[u8]) {
        let key = Key {
            script_id: script_id.to_string(),
            topic: topic.to_string(),
            payload_hash: hash_payload(payload),
        };
        self.entries.lock().insert(key, Instant::now() + self.ttl);
    }

    /// Returns true and consumes the fingerprint if `script_id` recently
    /// published this exact `(topic, payload)` pair and the fingerprint has
    /// not yet expired. Consuming on lookup keeps the table from growing
    /// unbounded between periodic sweeps.
    pub fn take(&self, script_id: &str, topic: &str, payload: &[u8]) -> bool {
        let key = Key {
            script_id: script_id.to_string(),
            topic: topic.to_string(),
            payload_hash: hash_payload(payload),
        };
        let mut entries = self.entries.lock();
        match entries.remove(&key) {
            Some(expires_at) => Instant::now() < expires_at,
            None => false,
        }
    }

    /// Periodic sweep dropping anything that expired without being looked
    /// up (e.g. a publish no other script happened to subscribe to).
    pub fn sweep(&self) {
        let now = Instant::now();
        self.entries.lock().retain(|_, expires_at| *expires_at > now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorded_fingerprint_is_found_once() {
        let table = FingerprintTable::new(Duration::from_secs(2));
        table.record("s1", "t", b"payload");

        assert!(table.take("s1", "t", b"payload"));
        // Consumed: a second lookup for the same triple misses.
        assert!(!table.take("s1", "t", b"payload"));
    }

    #[test]
    fn different_script_topic_or_payload_does_not_match() {
        let table = FingerprintTable::new(Duration::from_secs(2));
        table.record("s1", "t", b"payload");

        assert!(!table.take("s2", "t", b"payload"));
        assert!(!table.take("s1", "other", b"payload"));
        assert!(!table.take("s1", "t", b"different"));
    }

    #[test]
    fn expired_fingerprint_is_not_found() {
        let table = FingerprintTable::new(Duration::from_millis(0));
        table.record("s1", "t", b"payload");
        std::thread::sleep(Duration::from_millis(5));
        assert!(!table.take("s1", "t", b"payload"));
    }

    #[test]
    fn sweep_drops_unconsumed_entries() {
        let table = FingerprintTable::new(Duration::from_millis(0));
        table.record("s1", "t", b"payload");
        std::thread::sleep(Duration::from_millis(5));
        table.sweep();
        assert_eq!(table.entries.lock().len(), 0);
    }
}
