//! Session token issuance and validation

use crate::{config::AuthConfig, error::AppError, Result};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

pub const JWT_ALGORITHM: Algorithm = Algorithm::HS256;

/// Authentication method recorded in OTP-issued tokens.
pub const AUTH_METHOD_OTP: &str = "otp";

#[derive(Clone)]
pub struct AuthService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    session_ttl: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionClaims {
    pub sub: String, // Subject (profile id)
    pub email: String,
    pub name: String,
    pub verified: bool,
    pub auth_method: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
}

/// Identity a session token is issued for.
#[derive(Debug, Clone)]
pub struct SessionSubject<'a> {
    pub user_id: &'a str,
    pub email: &'a str,
    pub name: &'a str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AuthService {
    pub fn new(config: &AuthConfig) -> Result<Self> {
        if config.jwt_secret.is_empty() {
            return Err(AppError::configuration("JWT secret must not be empty"));
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            session_ttl: Duration::seconds(config.session_token_ttl_seconds as i64),
        })
    }

    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    /// Sign a verified OTP session for `subject`.
    pub fn issue_session_token(&self, subject: &SessionSubject<'_>) -> Result<SessionToken> {
        let now = Utc::now();
        let expires_at = now + self.session_ttl;

        let claims = SessionClaims {
            sub: subject.user_id.to_string(),
            email: subject.email.to_string(),
            name: subject.name.to_string(),
            verified: true,
            auth_method: AUTH_METHOD_OTP.to_string(),
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
            jti: uuid::Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::new(JWT_ALGORITHM), &claims, &self.encoding_key)
            .map_err(|e| AppError::internal(format!("Failed to sign session token: {}", e)))?;

        Ok(SessionToken { token, expires_at })
    }

    /// Validate and decode a token
    pub fn validate_token(&self, token: &str) -> Result<SessionClaims> {
        let validation = Validation::new(JWT_ALGORITHM);

        let token_data = decode::<SessionClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    AppError::authentication("Session expirée")
                }
                _ => AppError::authentication("Jeton invalide"),
            })?;

        Ok(token_data.claims)
    }

    /// Extract token from Authorization header
    pub fn extract_token_from_header<'a>(&self, auth_header: &'a str) -> Result<&'a str> {
        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::authentication("En-tête Authorization invalide"))?
            .trim();

        if token.is_empty() {
            return Err(AppError::authentication("Jeton manquant"));
        }

        Ok(token)
    }
}
