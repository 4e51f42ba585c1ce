//! The HTTP-facing security pipeline and the server that hosts it.

mod cors;
mod headers;
mod identity;
mod normalize;
mod security;
mod server;

pub use cors::{CorsPolicy, OriginCheck};
pub use headers::{
    apply_baseline, apply_rate_limit, BASELINE, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING,
    X_RATELIMIT_RESET,
};
pub use identity::{AuthenticatedPrincipal, GatewayIdentityResolver, Identity, IdentityResolver};
pub use normalize::{ErrorBody, ErrorNormalizer, NormalizedError};
pub use security::{Endpoint, Outcome, PayloadSource, SecurityPipeline, Stage, BODY_FIELD};
pub use server::{build_router, spawn_sweeper, AppState, HttpServer};
