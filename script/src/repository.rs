//! Narrow repository interfaces consumed by the script subsystem: loading
//! enabled scripts for the cache, and persisting execution logs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{Script, ScriptLog};

#[async_trait]
pub trait ScriptRepository: Send + Sync {
    /// Returns every enabled script with its enabled triggers. Disabled
    /// scripts and disabled triggers are the caller's business to filter
    /// out here rather than at dispatch time, since the cache is rebuilt
    /// wholesale on every reload.
    async fn load_enabled_scripts(&self) -> Result<Vec<Script>>;
}

#[async_trait]
pub trait ScriptLogRepository: Send + Sync {
    async fn append(&self, log: ScriptLog) -> Result<()>;

    /// Bulk-deletes every log entry with `created_at < cutoff`. Retention
    /// window and schedule are an operator concern, so this is called from
    /// whatever periodic job the deployment wires up, not from the engine's
    /// hot dispatch path.
    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<()>;
}
