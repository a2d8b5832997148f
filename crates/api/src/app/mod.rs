//! HTTP application wiring (Axum router + request pipeline).
//!
//! - `services.rs`: composition root (stores, policy engine, auth and user services)
//! - `routes/`: HTTP handlers
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: the error kind set and the envelope stage

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Extension, Router,
    http::{HeaderValue, Method, header},
    middleware::{from_fn, from_fn_with_state},
    routing::get,
};
use tower::ServiceBuilder;
use tower_http::{catch_panic::CatchPanicLayer, cors::{AllowOrigin, CorsLayer}, trace::TraceLayer};
use tracing::warn;

use rolegate_infra::config::AppConfig;

use crate::authz::policy_middleware;
use crate::middleware::{self, AuthState};
use crate::rate_limit::{RateLimiter, rate_limit};

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::{AppServices, StartupError, build_services, build_services_with};

/// Build the full HTTP router (public entrypoint used by `main.rs` and tests).
pub fn build_app(config: &AppConfig, services: Arc<AppServices>) -> Router {
    let auth_state = AuthState {
        tokens: services.tokens.clone(),
    };

    // Credential stage runs before the policy stage: the last route_layer is outermost.
    let protected = routes::users_router()
        .route_layer(from_fn_with_state(services.policy.clone(), policy_middleware))
        .route_layer(from_fn_with_state(auth_state, middleware::auth_middleware));

    let period = config.ratelimiter.period().unwrap_or(Duration::from_secs(60));
    let limiter = Arc::new(RateLimiter::new(period, config.ratelimiter.limit));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::public_router())
        .merge(protected)
        .fallback(routes::system::not_found)
        .layer(Extension(services))
        .layer(
            ServiceBuilder::new()
                .layer(cors_layer(&config.server.allowed_origins))
                .map_response(|res: axum::response::Response<_>| res.map(axum::body::Body::new))
                .layer(TraceLayer::new_for_http())
                .layer(from_fn(middleware::request_id))
                .layer(CatchPanicLayer::custom(errors::panic_response))
                .layer(from_fn(errors::error_envelope))
                .layer(from_fn_with_state(config.server.request_timeout(), middleware::deadline))
                .layer(from_fn_with_state(limiter, rate_limit)),
        )
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT]);

    // Credentials cannot be combined with a wildcard origin.
    if origins.iter().any(|o| o.trim() == "*") {
        return base.allow_origin(AllowOrigin::any());
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin.trim()) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    base.allow_origin(AllowOrigin::list(origins)).allow_credentials(true)
}
