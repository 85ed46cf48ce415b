use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, warn};
use validator::ValidationErrors;

use crate::services::OtpError;

/// Error body of the OTP endpoints: `{error, resetTime?, details?}`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug)]
pub struct ApiFailure {
    pub status: StatusCode,
    pub body: ApiErrorBody,
}

impl ApiFailure {
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            body: ApiErrorBody {
                error: error.into(),
                reset_time: None,
                details: None,
            },
        }
    }

    pub fn bad_request(error: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error)
    }

    /// Map a flow error to its response. `details` carries the underlying
    /// cause only when `expose_details` is set.
    pub fn from_otp_error(err: OtpError, expose_details: bool) -> Self {
        match err {
            OtpError::Validation(message) => Self::bad_request(message),
            OtpError::RateLimited { reset_time } => Self {
                status: StatusCode::TOO_MANY_REQUESTS,
                body: ApiErrorBody {
                    error: "Trop de tentatives. Veuillez réessayer plus tard.".to_string(),
                    reset_time: Some(reset_time),
                    details: None,
                },
            },
            OtpError::InvalidCode => Self::new(StatusCode::UNAUTHORIZED, "Code invalide ou expiré"),
            OtpError::Delivery(e) => {
                error!("OTP delivery failed: {}", e);
                Self::internal("Erreur lors de l'envoi du code", e.to_string(), expose_details)
            }
            OtpError::Internal(e) => {
                error!("OTP flow internal error: {}", e);
                Self::internal("Erreur interne du serveur", e.to_string(), expose_details)
            }
        }
    }

    fn internal(message: &str, cause: String, expose_details: bool) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: ApiErrorBody {
                error: message.to_string(),
                reset_time: None,
                details: expose_details.then_some(cause),
            },
        }
    }

    pub fn from_json_rejection(rejection: JsonRejection) -> Self {
        warn!("Rejected request body: {}", rejection.body_text());
        Self::bad_request("Requête invalide")
    }

    pub fn from_validation(errors: &ValidationErrors) -> Self {
        Self::bad_request(first_validation_message(errors))
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// First message in field-name order, so responses are deterministic.
pub fn first_validation_message(errors: &ValidationErrors) -> String {
    let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
    fields.sort_by(|a, b| a.0.cmp(&b.0));

    fields
        .into_iter()
        .flat_map(|(_, errs)| errs.iter())
        .find_map(|e| e.message.as_ref().map(|m| m.to_string()))
        .unwrap_or_else(|| "Requête invalide".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::MailerError;
    use shared::AppError;

    #[test]
    fn rate_limit_carries_reset_time() {
        let reset = Utc::now();
        let failure = ApiFailure::from_otp_error(OtpError::RateLimited { reset_time: reset }, false);
        assert_eq!(failure.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(failure.body.reset_time, Some(reset));
    }

    #[test]
    fn invalid_code_is_vague() {
        let failure = ApiFailure::from_otp_error(OtpError::InvalidCode, true);
        assert_eq!(failure.status, StatusCode::UNAUTHORIZED);
        assert_eq!(failure.body.error, "Code invalide ou expiré");
        assert!(failure.body.details.is_none());
    }

    #[test]
    fn details_only_when_exposed() {
        let hidden = ApiFailure::from_otp_error(OtpError::Internal(AppError::internal("pool timeout")), false);
        assert_eq!(hidden.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(hidden.body.details.is_none());

        let shown = ApiFailure::from_otp_error(
            OtpError::Delivery(MailerError::Transport("connection refused".into())),
            true,
        );
        assert!(shown.body.details.unwrap().contains("connection refused"));
    }
}
