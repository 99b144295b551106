//! Adapters that let the script engine and the bridge manager inject
//! packets into the broker without either of them depending on the other,
//! or on the broker's concrete type. Both funnel through `Broker::
//! inject_publish`, tagged with the reserved client id that lets the hook
//! pipeline recognize the injected packet on the way back in.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::broker::Broker;

/// Feeds `mqtt.publish` calls from the script engine into the broker under
/// the literal `"inline"` client id.
pub struct InlinePublishSink {
    broker: Arc<dyn Broker>,
}

impl InlinePublishSink {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl embermq_script::PublishSink for InlinePublishSink {
    async fn inject_publish(&self, topic: &str, payload: Vec<u8>, qos: u8, retain: bool) {
        self.broker
            .inject_publish(embermq_script::INLINE_CLIENT_ID, topic, payload, qos, retain)
            .await;
    }
}

/// Feeds bridge inbound messages into the broker under that bridge's
/// inline client id (always `bridge-`-prefixed).
pub struct BridgeLocalPublisher {
    broker: Arc<dyn Broker>,
}

impl BridgeLocalPublisher {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl embermq_bridge::LocalPublisher for BridgeLocalPublisher {
    async fn publish_local(
        &self,
        inline_client_id: &str,
        topic: &str,
        payload: Bytes,
        qos: u8,
        retain: bool,
    ) {
        self.broker
            .inject_publish(inline_client_id, topic, payload.to_vec(), qos, retain)
            .await;
    }
}
