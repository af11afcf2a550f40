use thiserror::Error;

#[derive(Debug, Error)]
pub enum WeaveError {
    /// The artifact id is unknown or its cache entry has expired.
    /// Callers cannot distinguish the two; both fall back to creating
    /// a fresh artifact.
    #[error("Artifact not found: {0}")]
    NotFound(String),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Sync error: {0}")]
    Sync(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, WeaveError>;
