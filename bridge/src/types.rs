//! Bridge and bridge topic data model.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MqttVersion {
    V3,
    V5,
}

/// Which way a bridge topic forwards traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Remote -> local.
    In,
    /// Local -> remote.
    Out,
    Both,
}

impl Direction {
    pub fn forwards_inbound(self) -> bool {
        matches!(self, Direction::In | Direction::Both)
    }

    pub fn forwards_outbound(self) -> bool {
        matches!(self, Direction::Out | Direction::Both)
    }
}

/// One topic mapping owned by a bridge.
///
/// Invariant: if `local_pattern` ends with `#`, `remote_pattern` either ends
/// with `#` or is a fixed prefix — behavior for any other combination of
/// wildcards is deliberately unspecified (see `embermq_topic::transform`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeTopic {
    pub local_pattern: String,
    pub remote_pattern: String,
    pub direction: Direction,
    pub qos: u8,
}

/// A configured connection to a remote MQTT broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bridge {
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: Option<String>,
    pub clean_session: bool,
    pub keepalive_s: u16,
    pub connect_timeout_s: u64,
    pub mqtt_version: MqttVersion,
    pub topics: Vec<BridgeTopic>,
}
