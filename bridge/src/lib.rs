//! Inter-broker bridging: subscribes to a remote broker and republishes
//! matching traffic onto the local broker (and vice versa), with loop
//! prevention so two brokers bridged to each other don't relay the same
//! message back and forth forever.

mod backoff;
pub mod client;
mod error;
mod manager;
mod types;

pub use client::{InboundMessage, OutboundMessage};
pub use error::{Error, Result};
pub use manager::{BridgeManager, LocalPublish, LocalPublisher, BRIDGE_CLIENT_PREFIX};
pub use types::{Bridge, BridgeTopic, Direction, MqttVersion};
