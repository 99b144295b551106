//! Script data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerType {
    OnPublish,
    OnConnect,
    OnDisconnect,
    OnSubscribe,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub trigger_type: TriggerType,
    /// Empty means "match any topic" (only meaningful for on_publish/on_subscribe).
    pub topic_filter: String,
    pub priority: i32,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    pub id: String,
    pub name: String,
    pub content: String,
    pub enabled: bool,
    pub timeout_s: Option<u64>,
    pub max_publishes: Option<u32>,
    pub triggers: Vec<Trigger>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptLog {
    pub script_id: String,
    pub trigger_type: TriggerType,
    pub level: LogLevel,
    pub message: String,
    pub context: serde_json::Map<String, Value>,
    pub execution_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// The event object exposed to scripts as `msg`/`event`. Field names
/// cross into JS as camelCase (`clientId`, `cleanSession`, ...) per the
/// documented host API, not Rust's snake_case.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptEvent {
    #[serde(rename = "type")]
    pub event_type: TriggerType,
    pub topic: String,
    pub payload: String,
    pub client_id: String,
    pub username: String,
    pub qos: u8,
    pub retain: bool,
    pub clean_session: bool,
    pub error: Option<String>,
}
