use thiserror::Error;

use c2w_shm::ShmError;

/// Errors raised while setting up or driving the bridge.
///
/// Request handlers never return these across the shared-memory boundary; they are turned into
/// a `status = -1` response and logged.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Shm(#[from] ShmError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("transport is not open")]
    TransportNotOpen,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("control message could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    MissingEnv(&'static str),

    #[error("invalid value for env var {var}: {value:?}")]
    InvalidEnv { var: &'static str, value: String },
}
