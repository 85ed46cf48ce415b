// ============================================================================
// OTP STORE
// ============================================================================
// One row per email. Issuing a code overwrites the previous one in a single
// upsert, and consuming a code is a single conditional update, so only the
// latest code can ever verify and it can verify once.
// ============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use shared::Result;
use sqlx::PgPool;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct OtpRecord {
    pub email: String,
    pub code: String,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
}

impl OtpRecord {
    /// Fresh unused code for `email`, valid for `ttl`.
    pub fn issue(email: &str, code: &str, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            email: email.to_string(),
            code: code.to_string(),
            expires_at: now + ttl,
            used: false,
            attempts: 0,
            created_at: now,
        }
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.used && self.expires_at > now
    }
}

#[async_trait]
pub trait OtpStore: Send + Sync {
    /// Remove every expired code, whatever the email. Returns rows removed.
    async fn delete_expired(&self) -> Result<u64>;

    /// Store `record` as the only code for its email.
    async fn upsert(&self, record: &OtpRecord) -> Result<()>;

    /// Mark the code used if it matches, is unused and unexpired.
    async fn consume(&self, email: &str, code: &str) -> Result<Option<OtpRecord>>;
}

// ============================================================================
// POSTGRES
// ============================================================================

pub struct OtpQueries;

impl OtpQueries {
    pub const DELETE_EXPIRED: &'static str = r#"
        DELETE FROM otp_codes WHERE expires_at < NOW()
    "#;

    pub const UPSERT: &'static str = r#"
        INSERT INTO otp_codes (email, code, expires_at, used, attempts, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (email) DO UPDATE
        SET code = EXCLUDED.code,
            expires_at = EXCLUDED.expires_at,
            used = EXCLUDED.used,
            attempts = EXCLUDED.attempts,
            created_at = EXCLUDED.created_at
    "#;

    pub const CONSUME: &'static str = r#"
        UPDATE otp_codes
        SET used = TRUE
        WHERE email = $1 AND code = $2 AND used = FALSE AND expires_at > NOW()
        RETURNING email, code, expires_at, used, attempts, created_at
    "#;
}

pub struct PgOtpStore {
    pool: PgPool,
}

impl PgOtpStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OtpStore for PgOtpStore {
    async fn delete_expired(&self) -> Result<u64> {
        let result = sqlx::query(OtpQueries::DELETE_EXPIRED)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn upsert(&self, record: &OtpRecord) -> Result<()> {
        sqlx::query(OtpQueries::UPSERT)
            .bind(&record.email)
            .bind(&record.code)
            .bind(record.expires_at)
            .bind(record.used)
            .bind(record.attempts)
            .bind(record.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn consume(&self, email: &str, code: &str) -> Result<Option<OtpRecord>> {
        let record = sqlx::query_as::<_, OtpRecord>(OtpQueries::CONSUME)
            .bind(email)
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }
}

// ============================================================================
// IN-MEMORY
// ============================================================================

#[derive(Default)]
pub struct InMemoryOtpStore {
    records: DashMap<String, OtpRecord>,
}

impl InMemoryOtpStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current record for `email`, used or not.
    pub fn get(&self, email: &str) -> Option<OtpRecord> {
        self.records.get(email).map(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl OtpStore for InMemoryOtpStore {
    async fn delete_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let before = self.records.len();
        self.records.retain(|_, record| record.expires_at >= now);
        Ok((before - self.records.len()) as u64)
    }

    async fn upsert(&self, record: &OtpRecord) -> Result<()> {
        self.records.insert(record.email.clone(), record.clone());
        Ok(())
    }

    async fn consume(&self, email: &str, code: &str) -> Result<Option<OtpRecord>> {
        let now = Utc::now();
        let Some(mut record) = self.records.get_mut(email) else {
            return Ok(None);
        };

        if record.code != code || !record.is_valid_at(now) {
            return Ok(None);
        }

        record.used = true;
        Ok(Some(record.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expired(email: &str, code: &str) -> OtpRecord {
        let mut record = OtpRecord::issue(email, code, Duration::minutes(15));
        record.expires_at = Utc::now() - Duration::minutes(1);
        record
    }

    #[tokio::test]
    async fn code_is_single_use() {
        let store = InMemoryOtpStore::new();
        store
            .upsert(&OtpRecord::issue("a@example.com", "123456", Duration::minutes(15)))
            .await
            .unwrap();

        let first = store.consume("a@example.com", "123456").await.unwrap();
        assert!(first.map(|r| r.used).unwrap_or(false));
        assert!(store.consume("a@example.com", "123456").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn wrong_code_leaves_record_untouched() {
        let store = InMemoryOtpStore::new();
        let record = OtpRecord::issue("a@example.com", "123456", Duration::minutes(15));
        store.upsert(&record).await.unwrap();

        assert!(store.consume("a@example.com", "654321").await.unwrap().is_none());
        assert_eq!(store.get("a@example.com"), Some(record));
    }

    #[tokio::test]
    async fn expired_code_never_verifies() {
        let store = InMemoryOtpStore::new();
        store.upsert(&expired("a@example.com", "123456")).await.unwrap();

        assert!(store.consume("a@example.com", "123456").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_replaces_previous_code() {
        let store = InMemoryOtpStore::new();
        store
            .upsert(&OtpRecord::issue("a@example.com", "111111", Duration::minutes(15)))
            .await
            .unwrap();
        store
            .upsert(&OtpRecord::issue("a@example.com", "222222", Duration::minutes(15)))
            .await
            .unwrap();

        assert_eq!(store.len(), 1);
        assert!(store.consume("a@example.com", "111111").await.unwrap().is_none());
        assert!(store.consume("a@example.com", "222222").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn housekeeping_removes_only_expired_codes() {
        let store = InMemoryOtpStore::new();
        store.upsert(&expired("old@example.com", "111111")).await.unwrap();
        store.upsert(&expired("older@example.com", "222222")).await.unwrap();
        store
            .upsert(&OtpRecord::issue("new@example.com", "333333", Duration::minutes(15)))
            .await
            .unwrap();

        assert_eq!(store.delete_expired().await.unwrap(), 2);
        assert_eq!(store.len(), 1);
        assert!(store.get("new@example.com").is_some());
    }

    #[test]
    fn issued_record_expires_after_ttl() {
        let record = OtpRecord::issue("a@example.com", "123456", Duration::minutes(15));
        assert!(!record.used);
        assert_eq!(record.attempts, 0);
        assert_eq!(record.expires_at - record.created_at, Duration::minutes(15));
        assert!(record.is_valid_at(Utc::now()));
        assert!(!record.is_valid_at(record.expires_at));
    }
}
