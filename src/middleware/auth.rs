use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use shared::{AppError, SessionClaims};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::state::AppState;

/// Current user data extracted from the session token
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user_id: Uuid,
    pub email: String,
    pub claims: SessionClaims,
}

/// Validate the bearer token and attach `CurrentUser` to the request.
pub async fn extract_current_user(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .ok_or_else(|| {
            warn!("Missing Authorization header");
            AppError::authentication("Authentification requise")
        })?;

    let token = state.auth.extract_token_from_header(auth_header)?;
    let claims = state.auth.validate_token(token)?;

    let user_id = claims.sub.parse::<Uuid>().map_err(|_| {
        warn!("Invalid user id in JWT sub field: {}", claims.sub);
        AppError::authentication("Jeton invalide")
    })?;

    info!(user_id = %user_id, email = %claims.email, "🔐 JWT authentication successful");

    request.extensions_mut().insert(CurrentUser {
        user_id,
        email: claims.email.clone(),
        claims,
    });

    Ok(next.run(request).await)
}
