//! Authentication and topic-level ACL enforcement, backed by a persistent
//! repository with a hot in-memory cache.
//!
//! # Example
//!
//! ```no_run
//! use embermq_auth::{AuthCache, AuthService};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example(repo: Arc<dyn embermq_auth::AuthRepository>) {
//! let cache = AuthCache::new(Duration::from_secs(300));
//! cache.spawn_sweeper();
//! let service = AuthService::new(cache, repo, true);
//! # let _ = service.authenticate("alice", "pw").await;
//! # }
//! ```

mod cache;
mod error;
mod repository;
mod service;
mod types;

pub use cache::AuthCache;
pub use error::{Error, Result};
pub use repository::AuthRepository;
pub use service::AuthService;
pub use types::{AclRule, Action, MqttCredential, Permission};
