//! Error types for the bridge runtime.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("mqtt v3 connection error: {0}")]
    ConnectionV3(#[from] rumqttc::ConnectionError),

    #[error("mqtt v5 connection error: {0}")]
    ConnectionV5(#[from] rumqttc::v5::ConnectionError),

    #[error("mqtt v3 client error: {0}")]
    ClientV3(#[from] rumqttc::ClientError),

    #[error("mqtt v5 client error: {0}")]
    ClientV5(#[from] rumqttc::v5::ClientError),

    #[error("unknown bridge: {0}")]
    UnknownBridge(String),

    #[error("bridge {0} already running")]
    AlreadyRunning(String),
}

pub type Result<T> = std::result::Result<T, Error>;
