pub mod common;
pub mod network_v1;
pub mod otp_v1;
pub mod templates;

use axum::{middleware::from_fn_with_state, Router};
use std::sync::Arc;

use crate::middleware::extract_current_user;
use crate::state::AppState;

pub fn create_api_router(app_state: Arc<AppState>) -> Router<Arc<AppState>> {
    // Session-protected routes
    let protected = Router::new()
        .merge(otp_v1::create_session_router())
        .merge(network_v1::create_cache_admin_router())
        .route_layer(from_fn_with_state(app_state, extract_current_user));

    Router::new()
        .merge(otp_v1::create_otp_v1_router())
        .merge(network_v1::create_network_v1_router())
        .merge(protected)
}
