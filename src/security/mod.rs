// Security middleware and input validation helpers
use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue, Method},
    middleware::Next,
    response::Response,
};
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::warn;

/// Security headers middleware
pub async fn security_headers_middleware(request: Request, next: Next) -> Response {
    let sensitive = request.uri().path().contains("/auth/") || request.uri().path().contains("/otp/");
    let mut response = next.run(request).await;

    let headers = response.headers_mut();

    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("DENY"),
    );
    headers.insert(
        HeaderName::from_static("strict-transport-security"),
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        HeaderName::from_static("content-security-policy"),
        HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'"),
    );

    // Tokens and codes must never sit in a shared cache
    if sensitive {
        headers.insert(
            HeaderName::from_static("cache-control"),
            HeaderValue::from_static("no-store, no-cache, must-revalidate, private"),
        );
    }

    response
}

/// CORS for the web front-end. An empty origin list allows any origin
/// without credentials (local development and tests).
pub fn get_cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
        ])
        .max_age(Duration::from_secs(3600));

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    if parsed.is_empty() {
        base.allow_origin(Any)
    } else {
        base.allow_origin(AllowOrigin::list(parsed)).allow_credentials(true)
    }
}

/// Input validation utilities
pub mod validation {
    use regex::Regex;
    use std::borrow::Cow;
    use std::sync::OnceLock;
    use validator::ValidationError;

    static PUBKEY_REGEX: OnceLock<Regex> = OnceLock::new();
    static OTP_CODE_REGEX: OnceLock<Regex> = OnceLock::new();

    /// Emails are compared trimmed and lower-cased everywhere.
    pub fn normalize_email(email: &str) -> String {
        email.trim().to_lowercase()
    }

    /// Compressed secp256k1 public key, hex encoded.
    pub fn is_valid_pubkey(pubkey: &str) -> bool {
        let regex = PUBKEY_REGEX.get_or_init(|| Regex::new(r"^(02|03)[0-9a-fA-F]{64}$").unwrap());
        regex.is_match(pubkey)
    }

    pub fn is_valid_otp_code(code: &str) -> bool {
        let regex = OTP_CODE_REGEX.get_or_init(|| Regex::new(r"^[0-9]{6}$").unwrap());
        regex.is_match(code)
    }

    fn error(code: &'static str, message: &'static str) -> ValidationError {
        let mut err = ValidationError::new(code);
        err.message = Some(Cow::Borrowed(message));
        err
    }

    pub fn validate_otp_code(code: &str) -> Result<(), ValidationError> {
        if is_valid_otp_code(code) {
            Ok(())
        } else {
            Err(error("otp_code", "Le code doit contenir 6 chiffres"))
        }
    }

    pub fn validate_pubkey(pubkey: &str) -> Result<(), ValidationError> {
        if is_valid_pubkey(pubkey) {
            Ok(())
        } else {
            Err(error("pubkey", "Clé publique invalide"))
        }
    }

}
