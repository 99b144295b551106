//! Error types for state storage and script execution.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("kv store error: {0}")]
    Kv(#[from] embermq_kv::KVError),

    #[error("state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("script compile error: {0}")]
    Compile(String),

    #[error("script runtime error: {0}")]
    Runtime(String),

    #[error("script timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("publish quota of {0} exceeded")]
    QuotaExceeded(u32),

    #[error("invalid qos: {0}")]
    InvalidQos(i32),
}

pub type Result<T> = std::result::Result<T, Error>;
