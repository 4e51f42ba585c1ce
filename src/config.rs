//! Configuration management for Turnstile.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, TurnstileError};

/// Prefix for environment variable overrides, e.g. `TURNSTILE__SERVER__LISTEN_ADDR`.
pub const ENV_PREFIX: &str = "TURNSTILE";

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Deployment environment; controls error redaction and CORS leniency
    #[serde(default)]
    pub environment: Environment,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Header, identity and CORS configuration
    #[serde(default)]
    pub security: SecurityConfig,
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Production,
    Development,
}

impl Environment {
    /// Whether internal error detail must be redacted.
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Environment::Production),
            "development" | "dev" => Ok(Environment::Development),
            other => Err(format!("unknown environment '{}'", other)),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Whole-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Largest accepted request body
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            request_timeout_secs: default_request_timeout(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Deadline for each store call before failing open, in milliseconds
    #[serde(default = "default_store_timeout")]
    pub store_timeout_ms: u64,

    /// Interval between expired-window sweeps in seconds
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Maximum records deleted per sweep
    #[serde(default = "default_cleanup_batch")]
    pub cleanup_batch_size: usize,

    /// Per endpoint-class limits
    #[serde(default)]
    pub limiters: LimitersConfig,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            store_timeout_ms: default_store_timeout(),
            cleanup_interval_secs: default_cleanup_interval(),
            cleanup_batch_size: default_cleanup_batch(),
            limiters: LimitersConfig::default(),
        }
    }
}

impl RateLimitingConfig {
    /// Get the store call deadline.
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Get the sweep interval.
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

fn default_store_timeout() -> u64 {
    250
}

fn default_cleanup_interval() -> u64 {
    300
}

fn default_cleanup_batch() -> usize {
    500
}

/// Limits for each endpoint class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitersConfig {
    /// General API endpoints
    #[serde(default = "default_api_limit")]
    pub api: LimitRule,

    /// Authentication endpoints
    #[serde(default = "default_auth_limit")]
    pub auth: LimitRule,

    /// Endpoints that call third-party APIs
    #[serde(default = "default_external_api_limit")]
    pub external_api: LimitRule,
}

impl Default for LimitersConfig {
    fn default() -> Self {
        Self {
            api: default_api_limit(),
            auth: default_auth_limit(),
            external_api: default_external_api_limit(),
        }
    }
}

fn default_api_limit() -> LimitRule {
    LimitRule {
        max_requests: 100,
        window_secs: 15 * 60,
    }
}

fn default_auth_limit() -> LimitRule {
    LimitRule {
        max_requests: 5,
        window_secs: 60,
    }
}

fn default_external_api_limit() -> LimitRule {
    LimitRule {
        max_requests: 30,
        window_secs: 60,
    }
}

/// A limit and its window length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitRule {
    /// Requests admitted per window
    pub max_requests: u64,
    /// Window length in seconds
    pub window_secs: u64,
}

/// Header, identity and CORS configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Honour the first `X-Forwarded-For` hop as the client address
    #[serde(default)]
    pub trusted_proxy_headers: bool,

    /// Header carrying the principal id set by the upstream auth layer
    #[serde(default = "default_principal_header")]
    pub principal_header: String,

    /// Cross-origin policy
    #[serde(default)]
    pub cors: CorsConfig,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            trusted_proxy_headers: false,
            principal_header: default_principal_header(),
            cors: CorsConfig::default(),
        }
    }
}

fn default_principal_header() -> String {
    "x-authenticated-user".to_string()
}

/// Cross-origin policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Enforce the origin allowlist and answer preflights
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Origins allowed to call the API
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    /// Methods advertised on preflight
    #[serde(default = "default_allowed_methods")]
    pub allowed_methods: Vec<String>,

    /// Request headers advertised on preflight
    #[serde(default = "default_allowed_headers")]
    pub allowed_headers: Vec<String>,

    /// Preflight cache lifetime in seconds
    #[serde(default = "default_max_age")]
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_origins: Vec::new(),
            allowed_methods: default_allowed_methods(),
            allowed_headers: default_allowed_headers(),
            max_age_secs: default_max_age(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_allowed_methods() -> Vec<String> {
    ["GET", "POST", "PUT", "DELETE", "OPTIONS"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_allowed_headers() -> Vec<String> {
    ["Content-Type", "Authorization"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_max_age() -> u64 {
    86400
}

impl TurnstileConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: TurnstileConfig = serde_yaml::from_str(&contents)
            .map_err(|e| TurnstileError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration by layering defaults, an optional YAML file and
    /// `TURNSTILE__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = config::Config::try_from(&TurnstileConfig::default())
            .map_err(|e| TurnstileError::Config(e.to_string()))?;

        let mut builder = config::Config::builder().add_source(defaults);

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }

        let config: TurnstileConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("security.cors.allowed_origins")
                    .with_list_parse_key("security.cors.allowed_methods")
                    .with_list_parse_key("security.cors.allowed_headers"),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| TurnstileError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Check invariants serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let limiters = &self.rate_limiting.limiters;
        for (name, rule) in [
            ("api", &limiters.api),
            ("auth", &limiters.auth),
            ("external_api", &limiters.external_api),
        ] {
            if rule.max_requests == 0 {
                return Err(TurnstileError::Config(format!(
                    "limiter '{}' must allow at least one request",
                    name
                )));
            }
            if rule.window_secs == 0 {
                return Err(TurnstileError::Config(format!(
                    "limiter '{}' must have a non-zero window",
                    name
                )));
            }
        }

        if self.rate_limiting.cleanup_batch_size == 0 {
            return Err(TurnstileError::Config(
                "cleanup_batch_size must be greater than zero".to_string(),
            ));
        }
        if self.rate_limiting.store_timeout_ms == 0 {
            return Err(TurnstileError::Config(
                "store_timeout_ms must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}
