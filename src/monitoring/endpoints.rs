use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

use crate::cache::CacheStats;
use crate::state::AppState;

/// Health and metrics endpoints, no authentication.
pub fn monitoring_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/detailed", get(detailed_health_check))
        .route("/metrics", get(crate::observability::metrics_handler))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyHealth {
    pub backend: &'static str,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u128>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedHealth {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub database: DependencyHealth,
    pub rate_limiter: DependencyHealth,
    pub query_cache: CacheStats,
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "service": "daznode_api"
    }))
}

async fn detailed_health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let database = check_database(&state).await;
    let rate_limiter = check_redis(&state).await;

    let overall = if database.status == "healthy" && rate_limiter.status == "healthy" {
        "healthy"
    } else {
        "degraded"
    };

    info!(overall_status = %overall, "Health check completed");

    let status_code = if overall == "healthy" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let health = DetailedHealth {
        status: overall,
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        database,
        rate_limiter,
        query_cache: state.nodes.cache().get_stats(),
    };

    (status_code, Json(health))
}

async fn check_database(state: &AppState) -> DependencyHealth {
    let Some(pool) = &state.db_pool else {
        return DependencyHealth {
            backend: "memory",
            status: "healthy",
            response_time_ms: None,
            error: None,
        };
    };

    let start = Instant::now();
    match sqlx::query("SELECT 1").execute(pool).await {
        Ok(_) => DependencyHealth {
            backend: "postgres",
            status: "healthy",
            response_time_ms: Some(start.elapsed().as_millis()),
            error: None,
        },
        Err(e) => {
            error!("Database health check failed: {}", e);
            DependencyHealth {
                backend: "postgres",
                status: "unhealthy",
                response_time_ms: Some(start.elapsed().as_millis()),
                error: Some(e.to_string()),
            }
        }
    }
}

async fn check_redis(state: &AppState) -> DependencyHealth {
    let Some(pool) = &state.redis_pool else {
        return DependencyHealth {
            backend: state.rate_limit_backend,
            status: "healthy",
            response_time_ms: None,
            error: None,
        };
    };

    let start = Instant::now();
    let result: Result<String, String> = async {
        let mut conn = pool.get().await.map_err(|e| e.to_string())?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| e.to_string())
    }
    .await;

    match result {
        Ok(_) => DependencyHealth {
            backend: state.rate_limit_backend,
            status: "healthy",
            response_time_ms: Some(start.elapsed().as_millis()),
            error: None,
        },
        Err(e) => {
            error!("Redis health check failed: {}", e);
            DependencyHealth {
                backend: state.rate_limit_backend,
                status: "unhealthy",
                response_time_ms: Some(start.elapsed().as_millis()),
                error: Some(e),
            }
        }
    }
}
