// ============================================================================
// PROFILE STORE - Accounts created by the OTP flow
// ============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use shared::{AppError, Result};
use sqlx::PgPool;
use uuid::Uuid;

pub const AUTH_METHOD_OTP: &str = shared::auth::AUTH_METHOD_OTP;
pub const CONVERSION_STATUS_OTP_USER: &str = "otp_user";
pub const DEFAULT_T4G_TOKENS: i32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub pubkey: Option<String>,
    pub t4g_tokens: i32,
    pub auth_method: String,
    pub conversion_status: String,
    pub login_count: i32,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone)]
pub struct NewProfile {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub pubkey: Option<String>,
}

impl NewProfile {
    /// Profile for a first OTP login. Without a name, one is derived from
    /// the email local part.
    pub fn for_otp_login(email: &str, name: Option<&str>, pubkey: Option<&str>) -> Self {
        let (first_name, last_name) = split_display_name(name, email);
        Self {
            email: email.to_string(),
            first_name,
            last_name,
            pubkey: pubkey.map(str::to_string),
        }
    }
}

/// First token is the first name, the rest is the last name.
pub fn split_display_name(name: Option<&str>, email: &str) -> (String, String) {
    let provided = name.map(str::trim).filter(|n| !n.is_empty());

    let tokens: Vec<String> = match provided {
        Some(name) => name.split_whitespace().map(str::to_string).collect(),
        None => email
            .split('@')
            .next()
            .unwrap_or_default()
            .split(['.', '_', '-', '+'])
            .filter(|part| !part.is_empty())
            .map(capitalize)
            .collect(),
    };

    match tokens.split_first() {
        Some((first, rest)) => (first.clone(), rest.join(" ")),
        None => (email.to_string(), String::new()),
    }
}

fn capitalize(part: &str) -> String {
    let mut chars = part.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserProfile>>;

    /// Insert a new profile. A duplicate email yields `AppError::Conflict`.
    async fn create(&self, profile: &NewProfile) -> Result<UserProfile>;

    /// Bump the login counter and stamp `last_login_at`. Returns the new count.
    async fn record_login(&self, id: Uuid) -> Result<i32>;
}

// ============================================================================
// POSTGRES
// ============================================================================

pub struct ProfileQueries;

impl ProfileQueries {
    pub const FIND_BY_EMAIL: &'static str = r#"
        SELECT id, email, first_name, last_name, pubkey, t4g_tokens, auth_method,
               conversion_status, login_count, last_login_at, created_at
        FROM profiles
        WHERE email = $1
    "#;

    pub const INSERT: &'static str = r#"
        INSERT INTO profiles (id, email, first_name, last_name, pubkey, t4g_tokens,
                              auth_method, conversion_status, login_count, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0, NOW())
        RETURNING id, email, first_name, last_name, pubkey, t4g_tokens, auth_method,
                  conversion_status, login_count, last_login_at, created_at
    "#;

    pub const RECORD_LOGIN: &'static str = r#"
        UPDATE profiles
        SET login_count = login_count + 1, last_login_at = NOW()
        WHERE id = $1
        RETURNING login_count
    "#;
}

pub struct PgProfileStore {
    pool: PgPool,
}

impl PgProfileStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProfileStore for PgProfileStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserProfile>> {
        let profile = sqlx::query_as::<_, UserProfile>(ProfileQueries::FIND_BY_EMAIL)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(profile)
    }

    async fn create(&self, profile: &NewProfile) -> Result<UserProfile> {
        let created = sqlx::query_as::<_, UserProfile>(ProfileQueries::INSERT)
            .bind(Uuid::new_v4())
            .bind(&profile.email)
            .bind(&profile.first_name)
            .bind(&profile.last_name)
            .bind(&profile.pubkey)
            .bind(DEFAULT_T4G_TOKENS)
            .bind(AUTH_METHOD_OTP)
            .bind(CONVERSION_STATUS_OTP_USER)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    AppError::conflict(format!("Profil déjà existant pour {}", profile.email))
                }
                _ => AppError::Database(e),
            })?;
        Ok(created)
    }

    async fn record_login(&self, id: Uuid) -> Result<i32> {
        let count: i32 = sqlx::query_scalar(ProfileQueries::RECORD_LOGIN)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found("Profil"))?;
        Ok(count)
    }
}

// ============================================================================
// IN-MEMORY
// ============================================================================

#[derive(Default)]
pub struct InMemoryProfileStore {
    profiles: DashMap<String, UserProfile>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserProfile>> {
        Ok(self.profiles.get(email).map(|p| p.clone()))
    }

    async fn create(&self, profile: &NewProfile) -> Result<UserProfile> {
        use dashmap::mapref::entry::Entry;

        match self.profiles.entry(profile.email.clone()) {
            Entry::Occupied(_) => Err(AppError::conflict(format!(
                "Profil déjà existant pour {}",
                profile.email
            ))),
            Entry::Vacant(slot) => {
                let created = UserProfile {
                    id: Uuid::new_v4(),
                    email: profile.email.clone(),
                    first_name: profile.first_name.clone(),
                    last_name: profile.last_name.clone(),
                    pubkey: profile.pubkey.clone(),
                    t4g_tokens: DEFAULT_T4G_TOKENS,
                    auth_method: AUTH_METHOD_OTP.to_string(),
                    conversion_status: CONVERSION_STATUS_OTP_USER.to_string(),
                    login_count: 0,
                    last_login_at: None,
                    created_at: Utc::now(),
                };
                slot.insert(created.clone());
                Ok(created)
            }
        }
    }

    async fn record_login(&self, id: Uuid) -> Result<i32> {
        let mut profile = self
            .profiles
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| AppError::not_found("Profil"))?;
        profile.login_count += 1;
        profile.last_login_at = Some(Utc::now());
        Ok(profile.login_count)
    }
}
