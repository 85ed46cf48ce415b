use serde::Serialize;

use crate::services::profile_store::CONVERSION_STATUS_OTP_USER;

/// Logins before an OTP-only user is invited to create a permanent account.
pub const ACCOUNT_PROMPT_AFTER_LOGINS: i32 = 3;

/// Advisory hint returned with a successful verification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionInfo {
    pub is_new_user: bool,
    pub login_count: i32,
    pub suggest_account_creation: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ConversionInfo {
    pub fn analyze(is_new_user: bool, login_count: i32, conversion_status: &str) -> Self {
        if is_new_user {
            return Self {
                is_new_user,
                login_count,
                suggest_account_creation: false,
                message: Some("Bienvenue sur DazNode ! Votre accès a été créé avec votre email.".to_string()),
            };
        }

        let suggest = conversion_status == CONVERSION_STATUS_OTP_USER
            && login_count >= ACCOUNT_PROMPT_AFTER_LOGINS;

        Self {
            is_new_user,
            login_count,
            suggest_account_creation: suggest,
            message: suggest.then(|| {
                format!(
                    "Vous vous êtes connecté {} fois. Voulez-vous créer un compte permanent ?",
                    login_count
                )
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_user_is_welcomed() {
        let info = ConversionInfo::analyze(true, 1, "otp_user");
        assert!(info.is_new_user);
        assert!(!info.suggest_account_creation);
        assert!(info.message.unwrap().starts_with("Bienvenue"));
    }

    #[test]
    fn frequent_otp_user_is_prompted() {
        assert!(!ConversionInfo::analyze(false, 2, "otp_user").suggest_account_creation);

        let info = ConversionInfo::analyze(false, 3, "otp_user");
        assert!(info.suggest_account_creation);
        assert!(info.message.unwrap().contains("3 fois"));
    }

    #[test]
    fn converted_user_is_left_alone() {
        let info = ConversionInfo::analyze(false, 12, "converted");
        assert!(!info.suggest_account_creation);
        assert!(info.message.is_none());
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(ConversionInfo::analyze(false, 1, "otp_user")).unwrap();
        assert_eq!(json["isNewUser"], false);
        assert_eq!(json["loginCount"], 1);
        assert!(json.get("message").is_none());
    }
}
