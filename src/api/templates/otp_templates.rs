use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::security::validation::{normalize_email, validate_otp_code, validate_pubkey};
use crate::services::{ConversionInfo, UserProfile};

// ============================================================================
// REQUEST MODELS
// ============================================================================

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SendCodeRequest {
    #[serde(default)]
    #[validate(email(message = "Email invalide"))]
    pub email: String,
}

impl SendCodeRequest {
    pub fn normalized(self) -> Self {
        Self {
            email: normalize_email(&self.email),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct VerifyCodeRequest {
    #[serde(default)]
    #[validate(email(message = "Email invalide"))]
    pub email: String,

    #[serde(default)]
    #[validate(custom(function = "validate_otp_code"))]
    pub code: String,

    #[validate(length(max = 100, message = "Nom trop long"))]
    pub name: Option<String>,

    #[validate(custom(function = "validate_pubkey"))]
    pub pubkey: Option<String>,
}

impl VerifyCodeRequest {
    pub fn normalized(self) -> Self {
        Self {
            email: normalize_email(&self.email),
            code: self.code.trim().to_string(),
            name: self.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
            pubkey: self.pubkey.map(|p| p.trim().to_string()).filter(|p| !p.is_empty()),
        }
    }
}

// ============================================================================
// RESPONSE MODELS
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendCodeResponse {
    pub success: bool,
    pub message: String,
    /// Seconds until the code expires
    pub expires_in: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedUser {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub first_name: String,
    pub last_name: String,
    pub pubkey: Option<String>,
    pub t4g_tokens: i32,
    pub auth_method: String,
    pub verified: bool,
    pub is_new_user: bool,
}

impl VerifiedUser {
    pub fn from_profile(profile: &UserProfile, is_new_user: bool) -> Self {
        Self {
            id: profile.id,
            email: profile.email.clone(),
            name: profile.display_name(),
            first_name: profile.first_name.clone(),
            last_name: profile.last_name.clone(),
            pubkey: profile.pubkey.clone(),
            t4g_tokens: profile.t4g_tokens,
            auth_method: profile.auth_method.clone(),
            verified: true,
            is_new_user,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyCodeResponse {
    pub success: bool,
    pub token: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub user: VerifiedUser,
    pub conversion_info: ConversionInfo,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub user_id: Uuid,
    pub email: String,
    pub name: String,
    pub verified: bool,
    pub auth_method: String,
    pub expires_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_request_is_normalized_before_validation() {
        let req = SendCodeRequest {
            email: "  Alice@Example.com ".into(),
        }
        .normalized();
        assert_eq!(req.email, "alice@example.com");
        assert!(req.validate().is_ok());
    }

    #[test]
    fn verify_request_rejects_bad_code_and_pubkey() {
        let req = VerifyCodeRequest {
            email: "bob@example.com".into(),
            code: "12ab56".into(),
            name: None,
            pubkey: Some("not-a-key".into()),
        };
        let errors = req.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("code"));
        assert!(fields.contains_key("pubkey"));
        assert!(!fields.contains_key("email"));
    }

    #[test]
    fn blank_optional_fields_become_none() {
        let req = VerifyCodeRequest {
            email: "bob@example.com".into(),
            code: " 123456 ".into(),
            name: Some("   ".into()),
            pubkey: Some("".into()),
        }
        .normalized();
        assert_eq!(req.code, "123456");
        assert!(req.name.is_none());
        assert!(req.pubkey.is_none());
        assert!(req.validate().is_ok());
    }
}
