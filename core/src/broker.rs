//! The collaborator interface this crate needs from the MQTT broker
//! library: injecting a publish as if some client had sent it. Everything
//! else (wire codec, session state machine, listener setup) is the
//! broker's own business and is never modeled here.

use async_trait::async_trait;

/// Implemented by whatever wires a real broker (e.g. an embedded `rumqttd`
/// instance) to this crate. `inject_publish` must re-enter the hook
/// pipeline exactly as a publish received from a real client would — that
/// re-entrance is what lets bridge inbound messages and script publishes
/// flow back through ACL/engine/bridge dispatch under their reserved
/// client ids.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn inject_publish(&self, client_id: &str, topic: &str, payload: Vec<u8>, qos: u8, retain: bool);
}
