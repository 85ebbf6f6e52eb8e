use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a content item could not be classified.
///
/// Carried inside fail-open verdicts, so it is `Clone` and serializable.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum ClassificationError {
    /// No credential configured for the classification API. Never retried.
    #[error("classification credential missing: {0}")]
    AuthError(String),

    #[error("classification transport failed: {0}")]
    TransportError(String),

    #[error("classification response unusable: {0}")]
    ParseError(String),
}

impl ClassificationError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ClassificationError::AuthError(_))
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ClassificationError::AuthError(_) => "auth",
            ClassificationError::TransportError(_) => "transport",
            ClassificationError::ParseError(_) => "parse",
        }
    }
}
