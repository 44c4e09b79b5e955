//! Error types and result handling for HemoStat

use thiserror::Error;

/// Result type alias for HemoStat operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for HemoStat operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("broker error: {0}")]
    Broker(String),

    #[error("container runtime error: {0}")]
    Runtime(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("notification error: {0}")]
    Notification(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("generic error: {0}")]
    Generic(#[from] anyhow::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Broker(_) | Error::Timeout(_) | Error::Notification(_)
        )
    }

    /// Get error category for metrics and log fields
    pub fn category(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "configuration",
            Error::Broker(_) => "broker",
            Error::Runtime(_) => "runtime",
            Error::Model(_) => "model",
            Error::Notification(_) => "notification",
            Error::MalformedPayload(_) => "payload",
            Error::Timeout(_) => "timeout",
            Error::Serialization(_) => "serialization",
            Error::Generic(_) => "generic",
            Error::Internal(_) => "internal",
        }
    }
}
