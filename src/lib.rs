use axum::{extract::DefaultBodyLimit, middleware as axum_middleware, Router};
use std::sync::Arc;
use tower_http::compression::{predicate::SizeAbove, CompressionLayer};
use tower_http::trace::TraceLayer;

pub mod api;
pub mod cache;
pub mod cache_key;
pub mod cache_ttl;
pub mod middleware;
pub mod monitoring;
pub mod observability;
pub mod security;
pub mod services;
pub mod state;

use api::create_api_router;
use monitoring::monitoring_router;
use observability::metrics_middleware;
use security::{get_cors_layer, security_headers_middleware};
use state::AppState;

pub fn create_app_router(app_state: Arc<AppState>) -> Router {
    let cors = get_cors_layer(&app_state.config.app.cors_origins);

    Router::new()
        .merge(monitoring_router())
        .merge(create_api_router(app_state.clone()))
        .with_state(app_state)
        .layer(axum_middleware::from_fn(metrics_middleware))
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(
            CompressionLayer::new()
                .gzip(true)
                .compress_when(SizeAbove::new(1024)),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(axum_middleware::from_fn(security_headers_middleware))
}
