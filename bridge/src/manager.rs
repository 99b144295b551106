//! `BridgeManager`: owns the running bridge connections and applies the
//! local<->remote topic transform plus loop suppression in both directions.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::client::{run_v3, run_v5, InboundMessage, OutboundMessage};
use crate::error::{Error, Result};
use crate::types::{Bridge, MqttVersion};

/// A published message crossing the local broker, as seen by the bridge
/// manager's outbound path.
pub struct LocalPublish {
    pub topic: String,
    pub payload: bytes::Bytes,
    pub qos: u8,
    pub retain: bool,
    /// Client id of the publisher. Publishes originating from a client id
    /// with the `bridge-` prefix are never re-forwarded to any bridge —
    /// this is what breaks the republish loop between two bridged brokers.
    pub origin_client_id: String,
}

/// Sink the manager uses to inject a bridged publish into the local broker,
/// as if a client had published it.
#[async_trait::async_trait]
pub trait LocalPublisher: Send + Sync {
    /// Injects a publish under the identity `inline_client_id` (always
    /// `bridge-`-prefixed), so that when it re-enters the hook pipeline the
    /// outbound fan-out recognizes and skips it.
    async fn publish_local(
        &self,
        inline_client_id: &str,
        topic: &str,
        payload: bytes::Bytes,
        qos: u8,
        retain: bool,
    );

    /// Deregisters the inline client registered for a bridge, called when
    /// that bridge is stopped. Default no-op for publishers that don't keep
    /// a persistent per-bridge registration.
    async fn deregister(&self, _inline_client_id: &str) {}
}

pub const BRIDGE_CLIENT_PREFIX: &str = "bridge-";

/// Generates the local inline client id for a bridge: a stable operator-
/// provided suffix if given, otherwise 8 random hex bytes.
fn inline_client_id(bridge: &Bridge) -> String {
    match &bridge.client_id {
        Some(suffix) if suffix.starts_with(BRIDGE_CLIENT_PREFIX) => suffix.clone(),
        Some(suffix) => format!("{BRIDGE_CLIENT_PREFIX}{suffix}"),
        None => format!(
            "{BRIDGE_CLIENT_PREFIX}{}",
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        ),
    }
}

struct RunningBridge {
    outbound_tx: mpsc::Sender<OutboundMessage>,
    bridge: Bridge,
    inline_client_id: String,
}

pub struct BridgeManager {
    bridges: RwLock<HashMap<String, RunningBridge>>,
    local_publisher: Arc<dyn LocalPublisher>,
}

impl BridgeManager {
    pub fn new(local_publisher: Arc<dyn LocalPublisher>) -> Self {
        Self {
            bridges: RwLock::new(HashMap::new()),
            local_publisher,
        }
    }

    /// Starts a bridge's client event loop and its inbound-forwarding task.
    /// Returns an error if a bridge with the same id is already running.
    pub fn start(self: &Arc<Self>, bridge: Bridge) -> Result<()> {
        if self.bridges.read().contains_key(&bridge.id) {
            return Err(Error::AlreadyRunning(bridge.id));
        }

        let inbound_topics: Vec<String> = bridge
            .topics
            .iter()
            .filter(|t| t.direction.forwards_inbound())
            .map(|t| t.remote_pattern.clone())
            .collect();

        let (inbound_tx, inbound_rx) = mpsc::channel(1024);
        let (outbound_tx, outbound_rx) = mpsc::channel(1024);

        let bridge_for_client = bridge.clone();
        match bridge.mqtt_version {
            MqttVersion::V3 => {
                tokio::spawn(run_v3(bridge_for_client, inbound_topics, inbound_tx, outbound_rx));
            }
            MqttVersion::V5 => {
                tokio::spawn(run_v5(bridge_for_client, inbound_topics, inbound_tx, outbound_rx));
            }
        }

        let inline_id = inline_client_id(&bridge);
        let manager = self.clone();
        let bridge_for_inbound = bridge.clone();
        let inline_id_for_inbound = inline_id.clone();
        tokio::spawn(manager.forward_inbound(bridge_for_inbound, inline_id_for_inbound, inbound_rx));

        info!(bridge = %bridge.id, name = %bridge.name, inline_client = %inline_id, "bridge: started");
        self.bridges.write().insert(
            bridge.id.clone(),
            RunningBridge {
                outbound_tx,
                bridge,
                inline_client_id: inline_id,
            },
        );
        Ok(())
    }

    pub async fn stop(&self, bridge_id: &str) -> Result<()> {
        let running = self
            .bridges
            .write()
            .remove(bridge_id)
            .ok_or_else(|| Error::UnknownBridge(bridge_id.to_string()))?;
        self.local_publisher.deregister(&running.inline_client_id).await;
        Ok(())
    }

    /// Stops every running bridge: disconnects its client (by dropping the
    /// outbound sender, which unwinds the client event loop) and
    /// deregisters its inline client from the local broker.
    pub async fn stop_all(&self) {
        let running: Vec<RunningBridge> = self.bridges.write().drain().map(|(_, v)| v).collect();
        for bridge in running {
            self.local_publisher.deregister(&bridge.inline_client_id).await;
        }
    }

    async fn forward_inbound(
        self: Arc<Self>,
        bridge: Bridge,
        inline_id: String,
        mut rx: mpsc::Receiver<InboundMessage>,
    ) {
        while let Some(msg) = rx.recv().await {
            for topic in bridge.topics.iter().filter(|t| t.direction.forwards_inbound()) {
                if !embermq_topic::matches(&msg.topic, &topic.remote_pattern) {
                    continue;
                }
                let local_topic =
                    embermq_topic::transform(&msg.topic, &topic.remote_pattern, &topic.local_pattern);
                self.local_publisher
                    .publish_local(&inline_id, &local_topic, msg.payload.clone(), msg.qos, msg.retain)
                    .await;
            }
        }
        warn!(bridge = %bridge.id, "bridge: inbound channel closed");
    }

    /// Called for every publish accepted on the local broker. Forwards it to
    /// every bridge with a matching outbound topic, unless the publish
    /// originated from a bridge's own inline client (identified by its
    /// `bridge-` client id prefix) — forwarding those back out would create
    /// an infinite relay loop between two bridged brokers.
    pub async fn handle_local_publish(&self, publish: &LocalPublish) {
        if publish.origin_client_id.starts_with(BRIDGE_CLIENT_PREFIX) {
            return;
        }

        let bridges = self.bridges.read();
        for running in bridges.values() {
            for topic in running.bridge.topics.iter().filter(|t| t.direction.forwards_outbound()) {
                if !embermq_topic::matches(&publish.topic, &topic.local_pattern) {
                    continue;
                }
                let remote_topic =
                    embermq_topic::transform(&publish.topic, &topic.local_pattern, &topic.remote_pattern);
                let out = OutboundMessage {
                    topic: remote_topic,
                    payload: publish.payload.clone(),
                    qos: topic.qos,
                    retain: publish.retain,
                };
                if running.outbound_tx.try_send(out).is_err() {
                    warn!(bridge = %running.bridge.id, "bridge: outbound channel full, dropping publish");
                }
            }
        }
    }
}
