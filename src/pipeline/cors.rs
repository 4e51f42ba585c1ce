//! Cross-origin policy.

use std::collections::HashSet;

use axum::http::header::{self, HeaderMap, HeaderValue};

use crate::config::{CorsConfig, Environment};

/// How a request's `Origin` relates to the allowlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginCheck {
    /// No `Origin` header; not a cross-origin request
    Absent,
    /// Allowlisted, or any origin in development
    Allowed(HeaderValue),
    Rejected,
}

/// Origin allowlist plus the preflight answer.
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    allowed_origins: HashSet<String>,
    environment: Environment,
    allow_methods: HeaderValue,
    allow_headers: HeaderValue,
    max_age: HeaderValue,
}

impl CorsPolicy {
    /// Build from configuration. Returns `None` when CORS handling is disabled.
    pub fn from_config(config: &CorsConfig, environment: Environment) -> Option<Self> {
        if !config.enabled {
            return None;
        }

        let allowed_origins = config
            .allowed_origins
            .iter()
            .map(|origin| normalize_origin(origin))
            .collect();

        Some(Self {
            allowed_origins,
            environment,
            allow_methods: joined(&config.allowed_methods),
            allow_headers: joined(&config.allowed_headers),
            max_age: HeaderValue::from(config.max_age_secs),
        })
    }

    /// Check a request origin against the allowlist.
    ///
    /// Outside production every well-formed origin is allowed.
    pub fn check(&self, origin: Option<&str>) -> OriginCheck {
        let Some(origin) = origin else {
            return OriginCheck::Absent;
        };

        let allowed = !self.environment.is_production()
            || self.allowed_origins.contains(&normalize_origin(origin));

        match HeaderValue::from_str(origin) {
            Ok(value) if allowed => OriginCheck::Allowed(value),
            _ => OriginCheck::Rejected,
        }
    }

    /// Set the headers for an actual (non-preflight) response.
    pub fn apply(&self, check: &OriginCheck, headers: &mut HeaderMap) {
        headers.append(header::VARY, HeaderValue::from_static("Origin"));
        if let OriginCheck::Allowed(origin) = check {
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }
    }

    /// Set the headers answering a preflight.
    ///
    /// The allowed methods and headers are listed unless the origin was
    /// rejected. A rejected origin still gets a response, just without any
    /// grant.
    pub fn apply_preflight(&self, check: &OriginCheck, headers: &mut HeaderMap) {
        self.apply(check, headers);
        if *check != OriginCheck::Rejected {
            headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, self.allow_methods.clone());
            headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, self.allow_headers.clone());
            headers.insert(header::ACCESS_CONTROL_MAX_AGE, self.max_age.clone());
        }
    }
}

/// Origins compare case-insensitively and without a trailing slash.
fn normalize_origin(origin: &str) -> String {
    origin.trim().trim_end_matches('/').to_ascii_lowercase()
}

fn joined(values: &[String]) -> HeaderValue {
    HeaderValue::from_str(&values.join(", ")).unwrap_or_else(|_| HeaderValue::from_static(""))
}
