//! Endpoint classes and their limiter configurations.
//!
//! Each class owns one immutable [`LimiterConfig`], built once from
//! configuration at startup and shared by reference with every pipeline.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use super::window::LimiterConfig;
use crate::config::{LimitRule, LimitersConfig};
use crate::error::{Result, TurnstileError};

/// The class of endpoint a call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointClass {
    /// General API endpoints
    Api,
    /// Login, signup, token refresh
    Auth,
    /// Endpoints that fan out to third-party APIs
    ExternalApi,
}

impl EndpointClass {
    /// The limiter name, used as the store key prefix.
    pub fn limiter_name(&self) -> &'static str {
        match self {
            EndpointClass::Api => "api",
            EndpointClass::Auth => "auth",
            EndpointClass::ExternalApi => "external_api",
        }
    }
}

/// One limiter configuration per endpoint class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimiterSet {
    api: LimiterConfig,
    auth: LimiterConfig,
    external_api: LimiterConfig,
}

impl LimiterSet {
    /// Build the set from configuration.
    pub fn from_config(config: &LimitersConfig) -> Result<Self> {
        let set = Self {
            api: build(EndpointClass::Api, &config.api)?,
            auth: build(EndpointClass::Auth, &config.auth)?,
            external_api: build(EndpointClass::ExternalApi, &config.external_api)?,
        };

        for class in [EndpointClass::Api, EndpointClass::Auth, EndpointClass::ExternalApi] {
            let limiter = set.get(class);
            info!(
                limiter = limiter.name(),
                max_requests = limiter.max_requests(),
                window_secs = limiter.window().as_secs(),
                "Limiter configured"
            );
        }

        Ok(set)
    }

    /// Get the configuration for an endpoint class.
    pub fn get(&self, class: EndpointClass) -> &LimiterConfig {
        match class {
            EndpointClass::Api => &self.api,
            EndpointClass::Auth => &self.auth,
            EndpointClass::ExternalApi => &self.external_api,
        }
    }
}

fn build(class: EndpointClass, rule: &LimitRule) -> Result<LimiterConfig> {
    LimiterConfig::new(
        class.limiter_name(),
        rule.max_requests,
        Duration::from_secs(rule.window_secs),
    )
    .ok_or_else(|| {
        TurnstileError::Config(format!(
            "limiter '{}' needs max_requests > 0 and window_secs > 0",
            class.limiter_name()
        ))
    })
}
