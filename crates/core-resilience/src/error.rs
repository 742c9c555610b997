//! Error types for the resilience primitives

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResilienceError {
    /// Admission gate rejected the request
    #[error("Rate limit exceeded, retry after the window slides")]
    RateLimitExceeded,

    /// A primitive was constructed with unusable parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ResilienceError {
    /// Rejections clear up on their own; bad parameters do not
    pub fn is_transient(&self) -> bool {
        matches!(self, ResilienceError::RateLimitExceeded)
    }
}
