//! The per-call security pipeline.
//!
//! Every call walks the same stages:
//!
//! ```text
//! Start → HeadersAttached → RateChecked → Sanitized → Validated → Dispatched
//! ```
//!
//! and may stop early as `RateLimited` (429), `ValidationFailed` (400) or
//! `InternalError` (500). Baseline headers are attached whatever the outcome.
//! The pipeline holds no per-call state between calls; the only shared
//! mutable state is the window store behind the [`RateLimiter`].

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::Request;
use axum::http::request::Parts;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::FutureExt;
use serde_json::{Map, Value};
use tracing::{debug, trace, warn};

use super::cors::{CorsPolicy, OriginCheck};
use super::headers::{apply_baseline, apply_rate_limit};
use super::identity::{GatewayIdentityResolver, IdentityResolver};
use super::normalize::ErrorNormalizer;
use crate::config::{Environment, TurnstileConfig};
use crate::error::{Result, TurnstileError};
use crate::ratelimit::{AdmissionKey, Decision, EndpointClass, LimiterSet, RateLimiter};
use crate::sanitize::sanitize;
use crate::validate::{validate_as, Payload, ValidationErrors};

/// Field reported when the request body itself cannot be used.
pub const BODY_FIELD: &str = "body";

/// Progress of a call through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Start,
    HeadersAttached,
    RateChecked,
    Sanitized,
    Validated,
    Dispatched,
}

/// How a call left the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The handler ran and produced a response
    Completed,
    /// CORS preflight answered without touching the limiter
    Preflight,
    RateLimited,
    ValidationFailed,
    InternalError,
}

impl Outcome {
    fn of(result: &Result<Response>) -> Self {
        match result {
            Ok(_) => Outcome::Completed,
            Err(TurnstileError::RateLimitExceeded { .. }) => Outcome::RateLimited,
            Err(err) if err.is_client_error() => Outcome::ValidationFailed,
            Err(_) => Outcome::InternalError,
        }
    }
}

/// Where an endpoint's payload comes from.
///
/// Only the selected source is decoded, sanitized and validated. The other
/// one is never read, and the handler only ever sees the validated payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadSource {
    /// JSON request body
    Body,
    /// URL query string
    Query,
}

/// Static description of an endpoint served through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub name: &'static str,
    pub class: EndpointClass,
    pub source: PayloadSource,
}

impl Endpoint {
    /// An endpoint taking a JSON body.
    pub const fn body(name: &'static str, class: EndpointClass) -> Self {
        Self {
            name,
            class,
            source: PayloadSource::Body,
        }
    }

    /// An endpoint taking query parameters.
    pub const fn query(name: &'static str, class: EndpointClass) -> Self {
        Self {
            name,
            class,
            source: PayloadSource::Query,
        }
    }
}

/// What the pipeline knows about one call while it runs.
#[derive(Debug)]
struct SecurityContext {
    endpoint: &'static str,
    key: AdmissionKey,
    origin: OriginCheck,
    stage: Stage,
    decision: Option<Decision>,
}

impl SecurityContext {
    fn new(endpoint: &'static str, key: AdmissionKey, origin: OriginCheck) -> Self {
        Self {
            endpoint,
            key,
            origin,
            stage: Stage::Start,
            decision: None,
        }
    }

    fn advance(&mut self, stage: Stage) {
        debug!(endpoint = self.endpoint, key = %self.key, stage = ?stage, "Pipeline stage");
        self.stage = stage;
    }
}

/// Admission control and input hardening in front of a handler.
pub struct SecurityPipeline {
    limiter: Arc<RateLimiter>,
    limits: LimiterSet,
    identity: Arc<dyn IdentityResolver>,
    normalizer: ErrorNormalizer,
    cors: Option<CorsPolicy>,
    max_body_bytes: usize,
}

impl SecurityPipeline {
    /// Create a pipeline without CORS enforcement.
    pub fn new(
        limiter: Arc<RateLimiter>,
        limits: LimiterSet,
        identity: Arc<dyn IdentityResolver>,
        environment: Environment,
    ) -> Self {
        Self {
            limiter,
            limits,
            identity,
            normalizer: ErrorNormalizer::new(environment),
            cors: None,
            max_body_bytes: crate::config::ServerConfig::default().max_body_bytes,
        }
    }

    /// Build the pipeline described by `config`.
    pub fn from_config(config: &TurnstileConfig, limiter: Arc<RateLimiter>) -> Result<Self> {
        let limits = LimiterSet::from_config(&config.rate_limiting.limiters)?;
        let identity = Arc::new(GatewayIdentityResolver::from_config(&config.security));

        let mut pipeline = Self::new(limiter, limits, identity, config.environment)
            .with_max_body_bytes(config.server.max_body_bytes);
        pipeline.cors = CorsPolicy::from_config(&config.security.cors, config.environment);
        Ok(pipeline)
    }

    /// Enforce an origin allowlist and answer preflights.
    pub fn with_cors(mut self, cors: CorsPolicy) -> Self {
        self.cors = Some(cors);
        self
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    /// Whether this is the CORS-enforcing variant.
    pub fn enforces_cors(&self) -> bool {
        self.cors.is_some()
    }

    /// Answer a CORS preflight: 200 with the baseline headers and, for an
    /// accepted origin, the allowed methods and headers.
    pub fn preflight(&self, parts: &Parts) -> Response {
        let identity = self.identity.resolve(parts);
        let origin = self.check_origin(identity.origin.as_deref());

        let mut response = StatusCode::OK.into_response();
        apply_baseline(response.headers_mut());
        if let Some(cors) = &self.cors {
            cors.apply_preflight(&origin, response.headers_mut());
        }
        debug!(outcome = ?Outcome::Preflight, "Preflight answered");
        response
    }

    /// Run `request` through every stage and, if it survives, hand the
    /// validated payload to `handler`.
    pub async fn serve<T, H, Fut, R>(&self, endpoint: &Endpoint, request: Request, handler: H) -> Response
    where
        T: Payload,
        H: FnOnce(T) -> Fut + Send,
        Fut: Future<Output = Result<R>> + Send,
        R: IntoResponse,
    {
        let (parts, body) = request.into_parts();

        if parts.method == Method::OPTIONS && self.enforces_cors() {
            return self.preflight(&parts);
        }

        let identity = self.identity.resolve(&parts);
        let origin = self.check_origin(identity.origin.as_deref());
        let mut ctx = SecurityContext::new(endpoint.name, identity.admission_key(), origin);
        ctx.advance(Stage::HeadersAttached);

        let result = self.run(&mut ctx, endpoint, parts, body, handler).await;
        let outcome = Outcome::of(&result);
        let response = match result {
            Ok(response) => response,
            Err(err) => self.normalizer.into_response(&err),
        };

        self.finish(&ctx, outcome, response)
    }

    async fn run<T, H, Fut, R>(
        &self,
        ctx: &mut SecurityContext,
        endpoint: &Endpoint,
        parts: Parts,
        body: Body,
        handler: H,
    ) -> Result<Response>
    where
        T: Payload,
        H: FnOnce(T) -> Fut + Send,
        Fut: Future<Output = Result<R>> + Send,
        R: IntoResponse,
    {
        let limiter = self.limits.get(endpoint.class);
        let decision = self.limiter.admit(limiter, &ctx.key).await;
        ctx.decision = Some(decision);
        if decision.limited {
            return Err(TurnstileError::RateLimitExceeded {
                limiter: limiter.name().to_string(),
                limit: decision.limit,
                reset_at: decision.reset_at,
            });
        }
        ctx.advance(Stage::RateChecked);

        let raw = match endpoint.source {
            PayloadSource::Body => read_json(body, self.max_body_bytes).await?,
            PayloadSource::Query => query_value(parts.uri.query()),
        };
        let payload = sanitize(raw);
        ctx.advance(Stage::Sanitized);

        let typed: T = validate_as(T::schema(), &payload)?;
        ctx.advance(Stage::Validated);

        let dispatched = AssertUnwindSafe(async move { handler(typed).await })
            .catch_unwind()
            .await;
        ctx.advance(Stage::Dispatched);

        match dispatched {
            Ok(result) => result.map(IntoResponse::into_response),
            Err(_) => Err(TurnstileError::Internal(format!(
                "handler for {} panicked",
                ctx.endpoint
            ))),
        }
    }

    fn check_origin(&self, origin: Option<&str>) -> OriginCheck {
        let Some(cors) = &self.cors else {
            return OriginCheck::Absent;
        };

        let check = cors.check(origin);
        if check == OriginCheck::Rejected {
            warn!(origin = origin.unwrap_or_default(), "Origin not allowed");
        }
        check
    }

    fn finish(&self, ctx: &SecurityContext, outcome: Outcome, mut response: Response) -> Response {
        let headers = response.headers_mut();
        apply_baseline(headers);
        if let Some(decision) = &ctx.decision {
            apply_rate_limit(headers, decision);
        }
        if let Some(cors) = &self.cors {
            cors.apply(&ctx.origin, headers);
        }

        trace!(
            endpoint = ctx.endpoint,
            key = %ctx.key,
            stage = ?ctx.stage,
            outcome = ?outcome,
            status = response.status().as_u16(),
            "Call finished"
        );
        response
    }
}

impl std::fmt::Debug for SecurityPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityPipeline")
            .field("limits", &self.limits)
            .field("cors", &self.cors)
            .field("max_body_bytes", &self.max_body_bytes)
            .finish_non_exhaustive()
    }
}

/// Read a JSON body. An empty body is an empty object.
async fn read_json(body: Body, limit: usize) -> Result<Value> {
    let bytes = to_bytes(body, limit).await.map_err(|_| {
        ValidationErrors::single(
            BODY_FIELD,
            format!("could not be read or exceeds {} bytes", limit),
        )
    })?;

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Map::new()));
    }

    serde_json::from_slice(&bytes)
        .map_err(|_| ValidationErrors::single(BODY_FIELD, "must be valid JSON").into())
}

/// Decode a query string into an object of strings. Repeated keys collect
/// into an array.
fn query_value(query: Option<&str>) -> Value {
    let mut fields = Map::new();
    for (key, value) in url::form_urlencoded::parse(query.unwrap_or_default().as_bytes()) {
        let value = Value::String(value.into_owned());
        match fields.get_mut(key.as_ref()) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                fields.insert(key.into_owned(), value);
            }
        }
    }
    Value::Object(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http;
    use crate::config::{CorsConfig, LimitersConfig, SecurityConfig};
    use crate::ratelimit::MemoryStore;
    use crate::validate::{ContentPayload, Identifier, Pagination};
    use axum::http::header;
    use axum::Json;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pipeline(environment: Environment) -> SecurityPipeline {
        let limiter = Arc::new(RateLimiter::new(Arc::new(MemoryStore::new())));
        let limits = LimiterSet::from_config(&LimitersConfig::default()).unwrap();
        let identity = Arc::new(GatewayIdentityResolver::from_config(&SecurityConfig::default()));
        SecurityPipeline::new(limiter, limits, identity, environment)
    }

    fn post(body: Value) -> Request {
        http::Request::builder()
            .method(Method::POST)
            .uri("/v1/posts")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    const CREATE: Endpoint = Endpoint::body("create_post", EndpointClass::Api);
    const LOGIN: Endpoint = Endpoint::body("login", EndpointClass::Auth);
    const LIST: Endpoint = Endpoint::query("list_posts", EndpointClass::Api);

    #[tokio::test]
    async fn test_dispatches_sanitized_payload() {
        let pipeline = pipeline(Environment::Production);
        let request = post(json!({
            "caption": "<b>Hello</b> \"world\"",
            "imageUrl": "https://cdn.example.com/a.png",
            "extra": "dropped",
        }));

        let response = pipeline
            .serve(&CREATE, request, |payload: ContentPayload| async move {
                Ok(Json(payload))
            })
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "100");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "99");
        assert_eq!(response.headers()[header::X_FRAME_OPTIONS], "DENY");

        let body = json_body(response).await;
        assert_eq!(body["caption"], "Hello world");
        assert!(body.get("extra").is_none());
    }

    #[tokio::test]
    async fn test_rate_limited_skips_handler() {
        let pipeline = pipeline(Environment::Production);
        let calls = AtomicUsize::new(0);
        let calls = &calls;

        for _ in 0..5 {
            let response = pipeline
                .serve(&LOGIN, post(json!({"id": "abc"})), move |_: Identifier| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(StatusCode::NO_CONTENT)
                })
                .await;
            assert_eq!(response.status(), StatusCode::NO_CONTENT);
        }

        let response = pipeline
            .serve(&LOGIN, post(json!({"id": "abc"})), move |_: Identifier| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(StatusCode::NO_CONTENT)
            })
            .await;

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
        assert!(response.headers().contains_key(header::RETRY_AFTER));
        assert_eq!(response.headers()[header::X_CONTENT_TYPE_OPTIONS], "nosniff");

        let body = json_body(response).await;
        assert_eq!(body["error"], "RateLimitExceeded");
        assert!(body["resetTime"].is_string());
    }

    #[tokio::test]
    async fn test_invalid_json_is_a_body_violation() {
        let pipeline = pipeline(Environment::Production);
        let request = http::Request::builder()
            .method(Method::POST)
            .body(Body::from("{not json"))
            .unwrap();

        let response = pipeline
            .serve(&CREATE, request, |payload: ContentPayload| async move {
                Ok(Json(payload))
            })
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["details"][0]["field"], BODY_FIELD);
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let pipeline = pipeline(Environment::Production).with_max_body_bytes(16);
        let request = post(json!({"caption": "x".repeat(64), "imageUrl": "https://a.example"}));

        let response = pipeline
            .serve(&CREATE, request, |payload: ContentPayload| async move {
                Ok(Json(payload))
            })
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["details"][0]["field"], BODY_FIELD);
    }

    #[tokio::test]
    async fn test_query_payload_coerced() {
        let pipeline = pipeline(Environment::Production);
        let request = http::Request::builder()
            .uri("/v1/posts?limit=50&cursor=%3Cb%3Eabc%3C%2Fb%3E")
            .body(Body::empty())
            .unwrap();

        let response = pipeline
            .serve(&LIST, request, |page: Pagination| async move {
                assert_eq!(page.limit, 50);
                assert_eq!(page.cursor.as_deref(), Some("abc"));
                Ok(StatusCode::OK)
            })
            .await;

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_body_endpoint_ignores_query() {
        let pipeline = pipeline(Environment::Production);
        let request = http::Request::builder()
            .method(Method::POST)
            .uri("/v1/posts?imageUrl=javascript:alert(1)&caption=%3Cscript")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({ "imageUrl": "https://cdn.example.com/a.png" }).to_string(),
            ))
            .unwrap();

        let response = pipeline
            .serve(&CREATE, request, |payload: ContentPayload| async move {
                Ok(Json(payload))
            })
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body, json!({ "imageUrl": "https://cdn.example.com/a.png" }));
    }

    #[tokio::test]
    async fn test_handler_error_redacted() {
        let pipeline = pipeline(Environment::Production);

        let response = pipeline
            .serve(&LIST, Request::new(Body::empty()), |_: Pagination| async {
                Err::<StatusCode, _>(TurnstileError::Internal("secret detail".to_string()))
            })
            .await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()[header::X_FRAME_OPTIONS], "DENY");
        let body = json_body(response).await;
        assert_eq!(body["code"], "INTERNAL_ERROR");
        assert!(!body.to_string().contains("secret"));
        assert!(body["requestId"].is_string());
    }

    #[tokio::test]
    async fn test_handler_panic_contained() {
        let pipeline = pipeline(Environment::Development);

        let response = pipeline
            .serve(&LIST, Request::new(Body::empty()), |_: Pagination| async {
                if true {
                    panic!("downstream exploded");
                }
                Ok(StatusCode::OK)
            })
            .await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert_eq!(body["message"], "Internal error: handler for list_posts panicked");
    }

    #[tokio::test]
    async fn test_preflight_short_circuits() {
        let config = CorsConfig {
            allowed_origins: vec!["https://app.example.com".to_string()],
            ..CorsConfig::default()
        };
        let cors = CorsPolicy::from_config(&config, Environment::Production).unwrap();
        let pipeline = pipeline(Environment::Production).with_cors(cors);
        let request = http::Request::builder()
            .method(Method::OPTIONS)
            .header(header::ORIGIN, "https://app.example.com")
            .body(Body::empty())
            .unwrap();

        let response = pipeline
            .serve(&LOGIN, request, |_: Identifier| async {
                Ok(StatusCode::NO_CONTENT)
            })
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://app.example.com"
        );
        assert!(!response.headers().contains_key("x-ratelimit-limit"));
    }

    #[test]
    fn test_query_value_repeated_keys() {
        let value = query_value(Some("platforms=instagram&platforms=tiktok&name=a+b"));
        assert_eq!(
            value,
            json!({"platforms": ["instagram", "tiktok"], "name": "a b"})
        );
        assert_eq!(query_value(None), json!({}));
    }

    #[test]
    fn test_stage_order() {
        assert!(Stage::Start < Stage::HeadersAttached);
        assert!(Stage::Validated < Stage::Dispatched);
    }
}
