// ============================================================================
// OTP AUTHENTICATION ENDPOINTS
// ============================================================================

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::{get, post},
    Extension, Json, Router,
};
use std::sync::Arc;
use tracing::{info, warn};
use validator::Validate;

use crate::api::common::ApiFailure;
use crate::api::templates::otp_templates::{
    SendCodeRequest, SendCodeResponse, SessionResponse, VerifiedUser, VerifyCodeRequest,
    VerifyCodeResponse,
};
use crate::middleware::CurrentUser;
use crate::services::VerifyCodeInput;
use crate::state::AppState;

/// Request a code by email
pub async fn send_code(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SendCodeRequest>, JsonRejection>,
) -> Result<Json<SendCodeResponse>, ApiFailure> {
    let request_id = uuid::Uuid::new_v4();
    let Json(req) = payload.map_err(ApiFailure::from_json_rejection)?;
    let req = req.normalized();

    info!(request_id = %request_id, email = %req.email, "Send OTP code");

    if req.email.is_empty() {
        return Err(ApiFailure::bad_request("Email requis"));
    }
    if let Err(errors) = req.validate() {
        warn!(request_id = %request_id, "Validation error: {}", errors);
        return Err(ApiFailure::from_validation(&errors));
    }

    let expose_details = !state.config.is_production();
    state
        .otp
        .send_code(&req.email)
        .await
        .map_err(|e| ApiFailure::from_otp_error(e, expose_details))?;

    Ok(Json(SendCodeResponse {
        success: true,
        message: "Code envoyé par email".to_string(),
        expires_in: state.otp.policy().code_ttl.num_seconds(),
    }))
}

/// Exchange a code for a session token
pub async fn verify_code(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<VerifyCodeRequest>, JsonRejection>,
) -> Result<Json<VerifyCodeResponse>, ApiFailure> {
    let request_id = uuid::Uuid::new_v4();
    let Json(req) = payload.map_err(ApiFailure::from_json_rejection)?;
    let req = req.normalized();

    info!(request_id = %request_id, email = %req.email, "Verify OTP code");

    if req.email.is_empty() || req.code.is_empty() {
        return Err(ApiFailure::bad_request("Email et code requis"));
    }
    if let Err(errors) = req.validate() {
        warn!(request_id = %request_id, "Validation error: {}", errors);
        return Err(ApiFailure::from_validation(&errors));
    }

    let expose_details = !state.config.is_production();
    let session = state
        .otp
        .verify_code(VerifyCodeInput {
            email: &req.email,
            code: &req.code,
            name: req.name.as_deref(),
            pubkey: req.pubkey.as_deref(),
        })
        .await
        .map_err(|e| ApiFailure::from_otp_error(e, expose_details))?;

    Ok(Json(VerifyCodeResponse {
        success: true,
        token: session.token.token,
        expires_at: session.token.expires_at,
        user: VerifiedUser::from_profile(&session.profile, session.is_new_user),
        conversion_info: session.conversion,
    }))
}

/// Claims of the current session
pub async fn me(Extension(user): Extension<CurrentUser>) -> Json<SessionResponse> {
    Json(SessionResponse {
        user_id: user.user_id,
        email: user.email,
        name: user.claims.name,
        verified: user.claims.verified,
        auth_method: user.claims.auth_method,
        expires_at: user.claims.exp,
    })
}

/// Public OTP routes. Both prefixes share the handlers.
pub fn create_otp_v1_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/otp/send-code", post(send_code))
        .route("/api/otp/verify-code", post(verify_code))
        .route("/api/auth/send-code", post(send_code))
        .route("/api/auth/verify-code", post(verify_code))
}

/// Routes behind the session middleware.
pub fn create_session_router() -> Router<Arc<AppState>> {
    Router::new().route("/api/auth/me", get(me))
}
