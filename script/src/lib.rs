//! Embedded JavaScript scripting engine: scripts fire on broker events
//! (publish/connect/disconnect/subscribe), may themselves publish, and
//! share per-script and global key/value state with TTL.
//!
//! # Example
//!
//! ```no_run
//! use embermq_script::{DirectStateStore, Engine, ScriptCache};
//! use std::sync::Arc;
//!
//! # async fn example(
//! #     repo: Arc<dyn embermq_script::ScriptRepository>,
//! #     log_repo: Arc<dyn embermq_script::ScriptLogRepository>,
//! #     sink: Arc<dyn embermq_script::PublishSink>,
//! #     kv: Arc<embermq_kv::MemoryStore>,
//! # ) {
//! let cache = Arc::new(ScriptCache::new(repo));
//! let store = Arc::new(DirectStateStore::new(kv));
//! let engine = Engine::new(cache, store, sink, log_repo);
//! engine.start().await.unwrap();
//! # }
//! ```

mod cache;
mod engine;
mod error;
mod fingerprint;
mod repository;
mod runtime;
mod state_store;
mod types;

pub use cache::{IndexedScript, ScriptCache};
pub use engine::{Engine, INLINE_CLIENT_ID};
pub use error::{Error, Result};
pub use fingerprint::FingerprintTable;
pub use repository::{ScriptLogRepository, ScriptRepository};
pub use runtime::{ExecutionDeps, ExecutionOutcome, PublishSink, Runtime, UserLogEntry};
pub use state_store::{DirectStateStore, Scope, StateRepository, StateStore, WritebackStateStore};
pub use types::{LogLevel, Script, ScriptEvent, ScriptLog, Trigger, TriggerType};
