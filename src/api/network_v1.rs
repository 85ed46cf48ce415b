// ============================================================================
// NETWORK QUERY ENDPOINTS - cached Lightning graph reads
// ============================================================================

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use shared::{AppError, Result};
use std::sync::Arc;
use tracing::info;

use crate::api::templates::network_templates::{
    CacheClearedResponse, NodeListResponse, PeersQuery, TopNodesQuery,
};
use crate::cache::CacheStats;
use crate::middleware::CurrentUser;
use crate::security::validation::is_valid_pubkey;
use crate::services::NetworkNode;
use crate::state::AppState;

fn checked_pubkey(pubkey: &str) -> Result<&str> {
    if is_valid_pubkey(pubkey) {
        Ok(pubkey)
    } else {
        Err(AppError::validation("Clé publique invalide"))
    }
}

pub async fn get_node(
    State(state): State<Arc<AppState>>,
    Path(pubkey): Path<String>,
) -> Result<Json<NetworkNode>> {
    let node = state.nodes.node(checked_pubkey(&pubkey)?).await?;
    Ok(Json(node))
}

pub async fn get_top_nodes(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TopNodesQuery>,
) -> Result<Json<NodeListResponse>> {
    let nodes = state.nodes.top_nodes(query.order, query.limit).await?;
    Ok(Json(nodes.into()))
}

pub async fn get_peers_of_peers(
    State(state): State<Arc<AppState>>,
    Path(pubkey): Path<String>,
    Query(query): Query<PeersQuery>,
) -> Result<Json<NodeListResponse>> {
    let nodes = state
        .nodes
        .peers_of_peers(checked_pubkey(&pubkey)?, query.limit)
        .await?;
    Ok(Json(nodes.into()))
}

pub async fn get_cache_stats(State(state): State<Arc<AppState>>) -> Json<CacheStats> {
    Json(state.nodes.cache().get_stats())
}

pub async fn clear_cache(
    State(state): State<Arc<AppState>>,
    axum::Extension(user): axum::Extension<CurrentUser>,
) -> Json<CacheClearedResponse> {
    state.nodes.cache().clear_cache();
    info!(user_id = %user.user_id, "🧹 Query cache cleared on request");
    Json(CacheClearedResponse {
        success: true,
        stats: state.nodes.cache().get_stats(),
    })
}

pub fn create_network_v1_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/network/nodes/top", get(get_top_nodes))
        .route("/api/network/nodes/:pubkey", get(get_node))
        .route("/api/network/nodes/:pubkey/peers-of-peers", get(get_peers_of_peers))
}

/// Cache administration, behind the session middleware.
pub fn create_cache_admin_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/network/cache/stats", get(get_cache_stats))
        .route("/api/network/cache/clear", post(clear_cache))
}
