//! Repository surfaces this crate needs beyond what `embermq-auth` and
//! `embermq-script` already declare: loading configured bridges at
//! startup, and tracking which client id is currently linked to which
//! username for connect/disconnect bookkeeping.

use async_trait::async_trait;
use embermq_bridge::Bridge;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("repository error: {0}")]
    Repository(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[async_trait]
pub trait BridgeRepository: Send + Sync {
    async fn load_bridges(&self) -> Result<Vec<Bridge>>;
}

/// Tracks active device/client records. Upserted on connect, marked
/// inactive on disconnect; the actual CRUD store is an external
/// collaborator.
#[async_trait]
pub trait ClientRepository: Send + Sync {
    async fn upsert_active(&self, client_id: &str, username: &str) -> Result<()>;
    async fn mark_inactive(&self, client_id: &str) -> Result<()>;
}
