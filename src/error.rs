//! Error types for the Turnstile pipeline.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::ratelimit::StoreError;
use crate::validate::ValidationErrors;

/// Main error type for Turnstile operations.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// The caller exhausted its admission window. Retryable after `reset_at`.
    #[error("Rate limit exceeded for {limiter}, retry after {reset_at}")]
    RateLimitExceeded {
        limiter: String,
        limit: u64,
        reset_at: DateTime<Utc>,
    },

    /// One or more fields failed schema validation. Inputs refused by a
    /// sanitizer (e.g. a `javascript:` URL) land here as violations on
    /// their field path.
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    /// The durable window store failed. Swallowed by the limiter.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything else
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TurnstileError {
    /// Stable machine-readable code surfaced to callers.
    pub fn code(&self) -> &'static str {
        match self {
            TurnstileError::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            TurnstileError::Validation(_) => "VALIDATION_FAILED",
            TurnstileError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            TurnstileError::Config(_) => "CONFIG_ERROR",
            TurnstileError::Io(_) => "IO_ERROR",
            TurnstileError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the caller can fix the request and resubmit.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            TurnstileError::RateLimitExceeded { .. } | TurnstileError::Validation(_)
        )
    }
}

impl From<ValidationErrors> for TurnstileError {
    fn from(errors: ValidationErrors) -> Self {
        TurnstileError::Validation(errors)
    }
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
