use feedsift_core::ClassificationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("config error: {0}")]
    ConfigError(String),

    #[error("config parse error: {0}")]
    ConfigParseError(#[from] toml::de::Error),

    #[error("config write error: {0}")]
    ConfigWriteError(#[from] toml::ser::Error),

    #[error(transparent)]
    Classification(#[from] ClassificationError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
