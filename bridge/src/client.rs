//! Per-bridge MQTT client event loops, one for v3.1.1 and one for v5.
//!
//! Both variants run the same shape: connect, subscribe to the inbound
//! topics, and pump the event loop, forwarding inbound publishes to a
//! channel the manager reads, while reconnecting on error with a capped
//! backoff instead of retrying forever at a fixed delay.

use std::time::Duration;

use bytes::Bytes;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS as QosV3};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::types::Bridge;

/// A publish received from the remote broker, destined for the local broker.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: u8,
    pub retain: bool,
}

/// A publish to send to the remote broker.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: u8,
    pub retain: bool,
}

fn qos_from_u8(qos: u8) -> QosV3 {
    match qos {
        1 => QosV3::AtLeastOnce,
        2 => QosV3::ExactlyOnce,
        _ => QosV3::AtMostOnce,
    }
}

/// Runs an MQTT 3.1.1 bridge client until `outbound_rx` closes.
///
/// `inbound_topics` are the remote-side patterns the bridge subscribes to;
/// matching publishes are sent on `inbound_tx`. Messages received on
/// `outbound_rx` are published to the remote broker as-is.
pub async fn run_v3(
    bridge: Bridge,
    inbound_topics: Vec<String>,
    inbound_tx: mpsc::Sender<InboundMessage>,
    mut outbound_rx: mpsc::Receiver<OutboundMessage>,
) {
    let mut backoff = Backoff::new();

    'reconnect: loop {
        let client_id = bridge
            .client_id
            .clone()
            .unwrap_or_else(|| format!("bridge-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]));

        let mut opts = MqttOptions::new(client_id, &bridge.host, bridge.port);
        opts.set_keep_alive(Duration::from_secs(bridge.keepalive_s as u64));
        opts.set_clean_session(bridge.clean_session);
        if let (Some(user), Some(pass)) = (&bridge.username, &bridge.password) {
            opts.set_credentials(user, pass);
        }

        let (client, mut event_loop) = AsyncClient::new(opts, 256);

        for topic in &inbound_topics {
            if let Err(e) = client.subscribe(topic, QosV3::AtLeastOnce).await {
                error!(bridge = %bridge.id, error = %e, topic, "bridge v3: subscribe failed");
            }
        }

        loop {
            tokio::select! {
                outbound = outbound_rx.recv() => {
                    match outbound {
                        Some(msg) => {
                            if let Err(e) = client
                                .publish(&msg.topic, qos_from_u8(msg.qos), msg.retain, msg.payload.to_vec())
                                .await
                            {
                                warn!(bridge = %bridge.id, error = %e, "bridge v3: outbound publish failed");
                            }
                        }
                        None => break 'reconnect,
                    }
                }
                event = event_loop.poll() => {
                    match event {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            info!(bridge = %bridge.id, "bridge v3: connected");
                            backoff.reset();
                        }
                        Ok(Event::Incoming(Packet::Publish(p))) => {
                            let msg = InboundMessage {
                                topic: p.topic.clone(),
                                payload: Bytes::from(p.payload.to_vec()),
                                qos: p.qos as u8,
                                retain: p.retain,
                            };
                            debug!(bridge = %bridge.id, topic = %p.topic, "bridge v3: inbound publish");
                            if inbound_tx.send(msg).await.is_err() {
                                break 'reconnect;
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            let delay = backoff.next_delay();
                            warn!(bridge = %bridge.id, error = %e, delay_ms = delay.as_millis() as u64, "bridge v3: connection error, backing off");
                            tokio::time::sleep(delay).await;
                            continue 'reconnect;
                        }
                    }
                }
            }
        }
    }
}

/// Runs an MQTT 5.0 bridge client until `outbound_rx` closes, subscribing
/// with the `NoLocal` flag set so the remote broker never echoes back a
/// message this bridge itself just published there.
pub async fn run_v5(
    bridge: Bridge,
    inbound_topics: Vec<String>,
    inbound_tx: mpsc::Sender<InboundMessage>,
    mut outbound_rx: mpsc::Receiver<OutboundMessage>,
) {
    use rumqttc::v5::mqttbytes::v5::{Filter, PublishProperties};
    use rumqttc::v5::mqttbytes::QoS as QosV5;
    use rumqttc::v5::{AsyncClient as AsyncClientV5, Event as EventV5, Incoming, MqttOptions as MqttOptionsV5};

    let mut backoff = Backoff::new();

    'reconnect: loop {
        let client_id = bridge
            .client_id
            .clone()
            .unwrap_or_else(|| format!("bridge-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]));

        let mut opts = MqttOptionsV5::new(client_id, &bridge.host, bridge.port);
        opts.set_keep_alive(Duration::from_secs(bridge.keepalive_s as u64));
        opts.set_clean_start(bridge.clean_session);
        if let (Some(user), Some(pass)) = (&bridge.username, &bridge.password) {
            opts.set_credentials(user, pass);
        }

        let (client, mut event_loop) = AsyncClientV5::new(opts, 256);

        for topic in &inbound_topics {
            let mut filter = Filter::new(topic.clone(), QosV5::AtLeastOnce);
            filter.nolocal = true;
            if let Err(e) = client.subscribe_many(vec![filter]).await {
                error!(bridge = %bridge.id, error = %e, topic, "bridge v5: subscribe failed");
            }
        }

        loop {
            tokio::select! {
                outbound = outbound_rx.recv() => {
                    match outbound {
                        Some(msg) => {
                            let qos = match msg.qos {
                                1 => QosV5::AtLeastOnce,
                                2 => QosV5::ExactlyOnce,
                                _ => QosV5::AtMostOnce,
                            };
                            let props = PublishProperties::default();
                            if let Err(e) = client
                                .publish_with_properties(&msg.topic, qos, msg.retain, msg.payload.to_vec(), props)
                                .await
                            {
                                warn!(bridge = %bridge.id, error = %e, "bridge v5: outbound publish failed");
                            }
                        }
                        None => break 'reconnect,
                    }
                }
                event = event_loop.poll() => {
                    match event {
                        Ok(EventV5::Incoming(Incoming::ConnAck(_))) => {
                            info!(bridge = %bridge.id, "bridge v5: connected");
                            backoff.reset();
                        }
                        Ok(EventV5::Incoming(Incoming::Publish(p))) => {
                            let topic = String::from_utf8_lossy(&p.topic).to_string();
                            let msg = InboundMessage {
                                topic: topic.clone(),
                                payload: Bytes::from(p.payload.to_vec()),
                                qos: p.qos as u8,
                                retain: p.retain,
                            };
                            debug!(bridge = %bridge.id, topic, "bridge v5: inbound publish");
                            if inbound_tx.send(msg).await.is_err() {
                                break 'reconnect;
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            let delay = backoff.next_delay();
                            warn!(bridge = %bridge.id, error = %e, delay_ms = delay.as_millis() as u64, "bridge v5: connection error, backing off");
                            tokio::time::sleep(delay).await;
                            continue 'reconnect;
                        }
                    }
                }
            }
        }
    }
}
