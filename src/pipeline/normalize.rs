//! Mapping of internal errors to client-safe responses.

use axum::http::header::{HeaderValue, RETRY_AFTER};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error};
use uuid::Uuid;

use crate::config::Environment;
use crate::error::TurnstileError;
use crate::sanitize::clean_text;
use crate::validate::Violation;

const GENERIC_MESSAGE: &str = "An unexpected error occurred";
const RATE_LIMIT_MESSAGE: &str = "Too many requests, please try again later";

/// JSON body of an error response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ErrorBody {
    #[serde(rename_all = "camelCase")]
    RateLimited {
        error: &'static str,
        message: &'static str,
        reset_time: DateTime<Utc>,
    },
    Invalid {
        error: &'static str,
        details: Vec<Violation>,
    },
    #[serde(rename_all = "camelCase")]
    Internal {
        error: &'static str,
        message: String,
        code: &'static str,
        request_id: Uuid,
    },
}

/// A status code and body ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl IntoResponse for NormalizedError {
    fn into_response(self) -> Response {
        let retry_after = match &self.body {
            ErrorBody::RateLimited { reset_time, .. } => {
                Some(retry_after_secs(*reset_time, Utc::now()))
            }
            _ => None,
        };

        let mut response = (self.status, Json(self.body)).into_response();
        if let Some(seconds) = retry_after {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(seconds));
        }
        response
    }
}

/// Whole seconds until `reset`, rounded up so a caller never retries early.
fn retry_after_secs(reset: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let millis = (reset - now).num_milliseconds().max(0);
    (millis + 999) / 1000
}

/// Turns any [`TurnstileError`] into a [`NormalizedError`].
///
/// Client errors keep their detail. Everything else becomes a 500 whose
/// message is redacted in production; the full error is always logged
/// against a request id that is also returned to the caller.
#[derive(Debug, Clone, Copy)]
pub struct ErrorNormalizer {
    environment: Environment,
}

impl ErrorNormalizer {
    pub fn new(environment: Environment) -> Self {
        Self { environment }
    }

    pub fn normalize(&self, err: &TurnstileError) -> NormalizedError {
        match err {
            TurnstileError::RateLimitExceeded { reset_at, .. } => NormalizedError {
                status: StatusCode::TOO_MANY_REQUESTS,
                body: ErrorBody::RateLimited {
                    error: "RateLimitExceeded",
                    message: RATE_LIMIT_MESSAGE,
                    reset_time: *reset_at,
                },
            },
            TurnstileError::Validation(errors) => {
                debug!(violations = errors.len(), "Request failed validation");
                invalid(errors.violations().to_vec())
            }
            _ => self.internal(err),
        }
    }

    fn internal(&self, err: &TurnstileError) -> NormalizedError {
        let request_id = Uuid::new_v4();
        error!(request_id = %request_id, code = err.code(), error = %err, "Request failed");

        let (message, code) = if self.environment.is_production() {
            (GENERIC_MESSAGE.to_string(), "INTERNAL_ERROR")
        } else {
            (clean_text(&err.to_string()), err.code())
        };

        NormalizedError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: ErrorBody::Internal {
                error: "InternalError",
                message,
                code,
                request_id,
            },
        }
    }

    pub fn into_response(&self, err: &TurnstileError) -> Response {
        self.normalize(err).into_response()
    }
}

fn invalid(details: Vec<Violation>) -> NormalizedError {
    NormalizedError {
        status: StatusCode::BAD_REQUEST,
        body: ErrorBody::Invalid {
            error: "ValidationFailed",
            details,
        },
    }
}
