//! HTTP server hosting the security pipeline.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::{Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use super::headers::apply_baseline;
use super::security::{Endpoint, SecurityPipeline};
use crate::config::TurnstileConfig;
use crate::error::Result;
use crate::ratelimit::{EndpointClass, RateLimiter, WindowStore};
use crate::validate::{
    AccountGroup, ContentPayload, Identifier, MediaUpload, Pagination, Payload, ProxySettings,
    SchedulePost,
};

const REFRESH_SESSION: Endpoint = Endpoint::body("refresh_session", EndpointClass::Auth);
const LIST_POSTS: Endpoint = Endpoint::query("list_posts", EndpointClass::Api);
const CREATE_POST: Endpoint = Endpoint::body("create_post", EndpointClass::Api);
const SCHEDULE_POST: Endpoint = Endpoint::body("schedule_post", EndpointClass::Api);
const CREATE_GROUP: Endpoint = Endpoint::body("create_group", EndpointClass::Api);
const UPDATE_PROXY: Endpoint = Endpoint::body("update_proxy", EndpointClass::Api);
const UPLOAD_MEDIA: Endpoint = Endpoint::body("upload_media", EndpointClass::ExternalApi);

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<SecurityPipeline>,
}

/// HTTP server for the pipeline.
pub struct HttpServer {
    config: TurnstileConfig,
    router: Router,
    limiter: Arc<RateLimiter>,
}

impl HttpServer {
    /// Create a server whose limiter keeps its windows in `store`.
    pub fn new(config: TurnstileConfig, store: Arc<dyn WindowStore>) -> Result<Self> {
        let limiter = Arc::new(
            RateLimiter::new(store).with_store_timeout(config.rate_limiting.store_timeout()),
        );
        let pipeline = SecurityPipeline::from_config(&config, limiter.clone())?;

        let state = AppState {
            pipeline: Arc::new(pipeline),
        };
        let router = build_router(state, Duration::from_secs(config.server.request_timeout_secs));

        Ok(Self {
            config,
            router,
            limiter,
        })
    }

    /// Get a handle to the router, e.g. to drive it in-process.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Bind the configured address and serve until `signal` resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.config.server.listen_addr).await?;
        self.run(listener, signal).await
    }

    /// Serve on an existing listener until `signal` resolves.
    pub async fn run<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        info!(
            address = %addr,
            environment = ?self.config.environment,
            "HTTP server starting"
        );

        let sweeper = spawn_sweeper(
            self.limiter.clone(),
            self.config.rate_limiting.cleanup_interval(),
            self.config.rate_limiting.cleanup_batch_size,
        );

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .await;
        sweeper.abort();
        served?;

        info!("HTTP server stopped");
        Ok(())
    }
}

/// Build the router with every demo endpoint and the middleware stack.
#[allow(deprecated)]
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/auth/refresh", post(refresh_session))
        .route("/v1/posts", get(list_posts).post(create_post))
        .route("/v1/schedules", post(schedule_post))
        .route("/v1/groups", post(create_group))
        .route("/v1/proxy", put(update_proxy))
        .route("/v1/media", post(upload_media))
        .layer(middleware::from_fn_with_state(state.clone(), answer_preflight))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::map_response(harden))
                .layer(TimeoutLayer::new(request_timeout)),
        )
}

/// Run the expired-window sweep every `every`.
pub fn spawn_sweeper(limiter: Arc<RateLimiter>, every: Duration, batch_size: usize) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if let Err(e) = limiter.cleanup(batch_size).await {
                error!(error = %e, "Rate limit window sweep failed");
            }
        }
    })
}

/// Preflights never reach method routing, so every path answers them.
async fn answer_preflight(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS && state.pipeline.enforces_cors() {
        let (parts, _) = request.into_parts();
        return state.pipeline.preflight(&parts);
    }
    next.run(request).await
}

/// Baseline headers on responses produced outside the pipeline (404, 405, timeouts).
async fn harden(mut response: Response) -> Response {
    apply_baseline(response.headers_mut());
    response
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Validate, then hand the payload back to the caller as the created resource.
async fn echo<T>(state: &AppState, endpoint: &Endpoint, status: StatusCode, request: Request) -> Response
where
    T: Payload + Serialize,
{
    state
        .pipeline
        .serve(endpoint, request, move |payload: T| async move {
            Ok((status, Json(json!({ "id": Uuid::new_v4(), "data": payload }))))
        })
        .await
}

async fn refresh_session(State(state): State<AppState>, request: Request) -> Response {
    echo::<Identifier>(&state, &REFRESH_SESSION, StatusCode::OK, request).await
}

async fn list_posts(State(state): State<AppState>, request: Request) -> Response {
    state
        .pipeline
        .serve(&LIST_POSTS, request, |page: Pagination| async move {
            Ok(Json(json!({
                "items": [],
                "limit": page.limit,
                "cursor": page.cursor,
            })))
        })
        .await
}

async fn create_post(State(state): State<AppState>, request: Request) -> Response {
    echo::<ContentPayload>(&state, &CREATE_POST, StatusCode::CREATED, request).await
}

async fn schedule_post(State(state): State<AppState>, request: Request) -> Response {
    echo::<SchedulePost>(&state, &SCHEDULE_POST, StatusCode::CREATED, request).await
}

async fn create_group(State(state): State<AppState>, request: Request) -> Response {
    echo::<AccountGroup>(&state, &CREATE_GROUP, StatusCode::CREATED, request).await
}

async fn update_proxy(State(state): State<AppState>, request: Request) -> Response {
    echo::<ProxySettings>(&state, &UPDATE_PROXY, StatusCode::OK, request).await
}

async fn upload_media(State(state): State<AppState>, request: Request) -> Response {
    echo::<MediaUpload>(&state, &UPLOAD_MEDIA, StatusCode::CREATED, request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http;
    use crate::ratelimit::{AdmissionKey, MemoryStore, StoreKey, WindowRecord};
    use axum::body::Body;
    use chrono::Utc;
    use tower::ServiceExt;

    fn server() -> HttpServer {
        HttpServer::new(TurnstileConfig::default(), Arc::new(MemoryStore::new())).unwrap()
    }

    #[tokio::test]
    async fn test_healthz() {
        let response = server()
            .router()
            .oneshot(http::Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    }

    #[tokio::test]
    async fn test_unknown_route_still_hardened() {
        let response = server()
            .router()
            .oneshot(http::Request::get("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()["x-frame-options"], "DENY");
    }

    #[tokio::test]
    async fn test_sweeper_removes_expired_windows() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let key = StoreKey::new("api", &AdmissionKey::resolve(Some("alice"), None));
        let stale = WindowRecord {
            count: 3,
            window_end: now - chrono::Duration::seconds(1),
        };
        store
            .create_if_absent(&key, stale, now - chrono::Duration::seconds(10))
            .await
            .unwrap();
        assert_eq!(store.len(), 1);

        let limiter = Arc::new(RateLimiter::new(store.clone()));
        let sweeper = spawn_sweeper(limiter, Duration::from_millis(20), 100);
        tokio::time::sleep(Duration::from_millis(150)).await;
        sweeper.abort();

        assert!(store.is_empty());
    }
}
