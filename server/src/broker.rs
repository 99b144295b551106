//! Adapts a running `rumqttd::Broker` link to `embermq_core::Broker`.
//!
//! rumqttd's public `Link` API (the one the MQTT client library exposes to
//! an embedder subscribing to `"#"`) hands back a bare `Publish` on the
//! `Forward` notification — no originating client id. That is enough to
//! fan inbound traffic out to the script engine and the bridge manager,
//! but it loses exactly the identity this system depends on to recognize
//! its own injected packets on the way back in (the `"inline"` and
//! `"bridge-"` conventions).
//!
//! `OriginEcho` recovers that identity for injected packets only: every
//! `inject_publish` call records `(topic, payload hash) -> client_id`
//! before handing the packet to rumqttd, and the Forward loop consults it
//! when the same packet comes back around. Genuinely external client
//! publishes are never in the table and fall back to the empty client id,
//! which is intentionally neither `"inline"` nor `"bridge-"`-prefixed —
//! the safe default for a publish nothing claims to have injected.
use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rumqttd::LinkTx;
use sha2::{Digest, Sha256};
use tracing::warn;

const ECHO_TTL: Duration = Duration::from_secs(5);

#[derive(Hash, PartialEq, Eq, Clone)]
struct EchoKey {
    topic: String,
    payload_hash: [u8; 32],
}

fn hash_payload(payload: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hasher.finalize().into()
}

pub struct RumqttdBroker {
    link_tx: parking_lot::Mutex<LinkTx>,
    echoes: parking_lot::Mutex<HashMap<EchoKey, (String, Instant)>>,
}

impl RumqttdBroker {
    pub fn new(link_tx: LinkTx) -> Self {
        Self {
            link_tx: parking_lot::Mutex::new(link_tx),
            echoes: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Looks up (and does not consume — a topic may legitimately be
    /// delivered to multiple subscribers of this same link) the client id
    /// that injected a packet matching this topic/payload, sweeping
    /// expired entries as it goes.
    pub fn recover_origin(&self, topic: &str, payload: &[u8]) -> Option<String> {
        let key = EchoKey {
            topic: topic.to_string(),
            payload_hash: hash_payload(payload),
        };
        let mut echoes = self.echoes.lock();
        echoes.retain(|_, (_, at)| at.elapsed() < ECHO_TTL);
        echoes.get(&key).map(|(client_id, _)| client_id.clone())
    }
}

#[async_trait]
impl embermq_core::Broker for RumqttdBroker {
    async fn inject_publish(&self, client_id: &str, topic: &str, payload: Vec<u8>, qos: u8, retain: bool) {
        let key = EchoKey {
            topic: topic.to_string(),
            payload_hash: hash_payload(&payload),
        };
        self.echoes.lock().insert(key, (client_id.to_string(), Instant::now()));

        let _ = retain; // rumqttd's LinkTx::publish takes no retain flag in this API surface.
        let _ = qos;
        if let Err(e) = self.link_tx.lock().publish(topic.to_string(), payload) {
            warn!(client_id, topic, error = %e, "broker: failed to inject publish");
        }
    }
}
