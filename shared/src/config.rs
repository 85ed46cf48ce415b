//! Configuration management for the DazNode API

use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub auth: AuthConfig,
    pub otp: OtpConfig,
    pub cache: CacheConfig,
    pub email: EmailConfig,
    pub app: AppConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// `None` selects the in-memory stores.
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// `None` keeps rate-limit windows in process memory.
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub session_token_ttl_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpConfig {
    pub code_ttl_seconds: u64,
    pub send_max_attempts: u32,
    pub send_window_seconds: u64,
    pub verify_max_attempts: u32,
    pub verify_window_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub ttl_seconds: u64,
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub from_address: String,
    pub from_name: String,
    pub smtp_server: Option<String>,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub resend_api_key: Option<String>,
    pub resend_api_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: String,
    pub log_level: String,
    pub port: u16,
    /// Browser origins allowed by CORS. Empty allows any origin.
    pub cors_origins: Vec<String>,
}

fn optional_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Config {
            database: DatabaseConfig {
                url: optional_var("DATABASE_URL"),
                max_connections: var_or("DATABASE_MAX_CONNECTIONS", "10").parse()?,
                acquire_timeout_seconds: var_or("DATABASE_ACQUIRE_TIMEOUT_SECONDS", "30").parse()?,
            },
            redis: RedisConfig {
                url: optional_var("REDIS_URL"),
            },
            auth: AuthConfig {
                jwt_secret: env::var("JWT_SECRET")
                    .map_err(|_| anyhow::anyhow!("JWT_SECRET must be set"))?,
                session_token_ttl_seconds: var_or("JWT_SESSION_TTL_SECONDS", "86400").parse()?,
            },
            otp: OtpConfig {
                code_ttl_seconds: var_or("OTP_CODE_TTL_SECONDS", "900").parse()?,
                send_max_attempts: var_or("OTP_SEND_MAX_ATTEMPTS", "5").parse()?,
                send_window_seconds: var_or("OTP_SEND_WINDOW_SECONDS", "900").parse()?,
                verify_max_attempts: var_or("OTP_VERIFY_MAX_ATTEMPTS", "10").parse()?,
                verify_window_seconds: var_or("OTP_VERIFY_WINDOW_SECONDS", "900").parse()?,
            },
            cache: CacheConfig {
                ttl_seconds: var_or("QUERY_CACHE_TTL_SECONDS", "300").parse()?,
                capacity: var_or("QUERY_CACHE_CAPACITY", "1000").parse()?,
            },
            email: EmailConfig {
                from_address: var_or("EMAIL_FROM_ADDRESS", "noreply@daznode.com"),
                from_name: var_or("EMAIL_FROM_NAME", "DazNode"),
                smtp_server: optional_var("SMTP_SERVER"),
                smtp_username: optional_var("SMTP_USERNAME"),
                smtp_password: optional_var("SMTP_PASSWORD"),
                resend_api_key: optional_var("RESEND_API_KEY"),
                resend_api_url: var_or("RESEND_API_URL", "https://api.resend.com"),
            },
            app: AppConfig {
                environment: var_or("ENVIRONMENT", "development"),
                log_level: var_or("RUST_LOG", "info"),
                port: var_or("PORT", "8000").parse()?,
                cors_origins: var_or("CORS_ALLOWED_ORIGINS", "https://daznode.com,https://www.daznode.com")
                    .split(',')
                    .map(|origin| origin.trim().to_string())
                    .filter(|origin| !origin.is_empty())
                    .collect(),
            },
        })
    }

    /// Configuration with in-memory backends, used by tests and local runs.
    pub fn in_memory(jwt_secret: impl Into<String>) -> Self {
        Config {
            database: DatabaseConfig {
                url: None,
                max_connections: 1,
                acquire_timeout_seconds: 5,
            },
            redis: RedisConfig { url: None },
            auth: AuthConfig {
                jwt_secret: jwt_secret.into(),
                session_token_ttl_seconds: 86_400,
            },
            otp: OtpConfig {
                code_ttl_seconds: 900,
                send_max_attempts: 5,
                send_window_seconds: 900,
                verify_max_attempts: 10,
                verify_window_seconds: 900,
            },
            cache: CacheConfig {
                ttl_seconds: 300,
                capacity: 1_000,
            },
            email: EmailConfig {
                from_address: "noreply@daznode.com".to_string(),
                from_name: "DazNode".to_string(),
                smtp_server: None,
                smtp_username: None,
                smtp_password: None,
                resend_api_key: None,
                resend_api_url: "https://api.resend.com".to_string(),
            },
            app: AppConfig {
                environment: "test".to_string(),
                log_level: "info".to_string(),
                port: 0,
                cors_origins: Vec::new(),
            },
        }
    }

    pub fn is_production(&self) -> bool {
        self.app.environment == "production"
    }

    pub fn is_development(&self) -> bool {
        self.app.environment == "development"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_config_uses_default_budgets() {
        let config = Config::in_memory("secret");
        assert!(config.database.url.is_none());
        assert_eq!(config.otp.code_ttl_seconds, 900);
        assert_eq!(config.otp.verify_max_attempts, 10);
        assert_eq!(config.cache.ttl_seconds, 300);
        assert!(!config.is_production());
    }
}
