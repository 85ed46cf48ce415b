// ============================================================================
// OTP AUTH SERVICE - send-code / verify-code state machine
// ============================================================================
// NO_CODE -> CODE_SENT   send_code: rate limit, housekeeping, upsert, email
// CODE_SENT -> VERIFIED  verify_code: rate limit, atomic consume, profile,
//                        session token
// ============================================================================

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use shared::config::OtpConfig;
use shared::{AppError, AuthService, SessionSubject, SessionToken};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::cache_ttl::otp_code_ttl;
use crate::observability::{record_otp_send, record_otp_verification};
use crate::services::conversion::ConversionInfo;
use crate::services::email_service::{MailerError, OtpMailer};
use crate::services::otp_store::{OtpRecord, OtpStore};
use crate::services::profile_store::{NewProfile, ProfileStore, UserProfile};
use crate::services::rate_limiter_service::{
    send_code_identifier, verify_code_identifier, RateLimitConfig, RateLimiter,
};

#[derive(Debug, thiserror::Error)]
pub enum OtpError {
    #[error("{0}")]
    Validation(String),

    #[error("rate limit exceeded until {reset_time}")]
    RateLimited { reset_time: DateTime<Utc> },

    #[error("Code invalide ou expiré")]
    InvalidCode,

    #[error("email delivery failed: {0}")]
    Delivery(#[from] MailerError),

    #[error(transparent)]
    Internal(#[from] AppError),
}

#[derive(Debug, Clone, Copy)]
pub struct OtpPolicy {
    pub code_ttl: Duration,
    pub send_limit: RateLimitConfig,
    pub verify_limit: RateLimitConfig,
}

impl Default for OtpPolicy {
    fn default() -> Self {
        Self {
            code_ttl: otp_code_ttl(),
            send_limit: RateLimitConfig::SEND_CODE,
            verify_limit: RateLimitConfig::VERIFY_CODE,
        }
    }
}

impl OtpPolicy {
    pub fn from_config(config: &OtpConfig) -> Self {
        Self {
            code_ttl: Duration::seconds(config.code_ttl_seconds as i64),
            send_limit: RateLimitConfig::new(config.send_max_attempts, config.send_window_seconds),
            verify_limit: RateLimitConfig::new(config.verify_max_attempts, config.verify_window_seconds),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CodeSent {
    pub email: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct VerifyCodeInput<'a> {
    pub email: &'a str,
    pub code: &'a str,
    pub name: Option<&'a str>,
    pub pubkey: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct VerifiedSession {
    pub token: SessionToken,
    pub profile: UserProfile,
    pub is_new_user: bool,
    pub conversion: ConversionInfo,
}

/// Uniform over [100000, 999999].
pub fn generate_code() -> String {
    rand::thread_rng().gen_range(100_000..=999_999).to_string()
}

pub struct OtpAuthService {
    codes: Arc<dyn OtpStore>,
    profiles: Arc<dyn ProfileStore>,
    mailer: Arc<dyn OtpMailer>,
    rate_limiter: Arc<RateLimiter>,
    auth: AuthService,
    policy: OtpPolicy,
}

impl OtpAuthService {
    pub fn new(
        codes: Arc<dyn OtpStore>,
        profiles: Arc<dyn ProfileStore>,
        mailer: Arc<dyn OtpMailer>,
        rate_limiter: Arc<RateLimiter>,
        auth: AuthService,
        policy: OtpPolicy,
    ) -> Self {
        Self {
            codes,
            profiles,
            mailer,
            rate_limiter,
            auth,
            policy,
        }
    }

    pub fn policy(&self) -> &OtpPolicy {
        &self.policy
    }

    /// Issue a fresh code for `email` (already normalized) and mail it.
    pub async fn send_code(&self, email: &str) -> Result<CodeSent, OtpError> {
        let decision = self
            .rate_limiter
            .check_rate_limit(&send_code_identifier(email), self.policy.send_limit)
            .await;
        if !decision.allowed {
            record_otp_send("rate_limited");
            return Err(OtpError::RateLimited {
                reset_time: decision.reset_time,
            });
        }

        let purged = self.codes.delete_expired().await.map_err(|e| {
            error!(email = %email, "Failed to purge expired OTP codes: {}", e);
            e
        })?;
        debug!(purged, "expired OTP codes removed");

        let code = generate_code();
        let record = OtpRecord::issue(email, &code, self.policy.code_ttl);
        self.codes.upsert(&record).await.map_err(|e| {
            error!(email = %email, "Failed to store OTP code: {}", e);
            e
        })?;

        if let Err(e) = self
            .mailer
            .send_code(email, &code, self.policy.code_ttl.num_minutes())
            .await
        {
            error!(email = %email, mailer = self.mailer.name(), "Failed to send OTP email: {}", e);
            record_otp_send("delivery_failed");
            return Err(OtpError::Delivery(e));
        }

        record_otp_send("sent");
        info!(email = %email, mailer = self.mailer.name(), "📧 OTP code sent");

        Ok(CodeSent {
            email: record.email,
            expires_at: record.expires_at,
        })
    }

    /// Consume the code and open a session. Wrong, used and expired codes
    /// all fail the same way.
    pub async fn verify_code(&self, input: VerifyCodeInput<'_>) -> Result<VerifiedSession, OtpError> {
        let email = input.email;

        let decision = self
            .rate_limiter
            .check_rate_limit(&verify_code_identifier(email), self.policy.verify_limit)
            .await;
        if !decision.allowed {
            record_otp_verification("rate_limited");
            return Err(OtpError::RateLimited {
                reset_time: decision.reset_time,
            });
        }

        let consumed = self.codes.consume(email, input.code).await.map_err(|e| {
            error!(email = %email, "Failed to consume OTP code: {}", e);
            e
        })?;
        if consumed.is_none() {
            warn!(email = %email, "🚫 OTP verification rejected");
            record_otp_verification("rejected");
            return Err(OtpError::InvalidCode);
        }

        let (profile, is_new_user) = self.find_or_create_profile(&input).await?;

        let login_count = match self.profiles.record_login(profile.id).await {
            Ok(count) => count,
            Err(e) => {
                warn!(email = %email, "Login bookkeeping failed: {}", e);
                profile.login_count
            }
        };

        let user_id = profile.id.to_string();
        let name = profile.display_name();
        let token = self.auth.issue_session_token(&SessionSubject {
            user_id: &user_id,
            email: &profile.email,
            name: &name,
        })?;

        let conversion = ConversionInfo::analyze(is_new_user, login_count, &profile.conversion_status);

        record_otp_verification("verified");
        info!(email = %email, user_id = %user_id, is_new_user, "✅ OTP verified");

        Ok(VerifiedSession {
            token,
            profile: UserProfile {
                login_count,
                ..profile
            },
            is_new_user,
            conversion,
        })
    }

    async fn find_or_create_profile(
        &self,
        input: &VerifyCodeInput<'_>,
    ) -> Result<(UserProfile, bool), OtpError> {
        if let Some(existing) = self.profiles.find_by_email(input.email).await? {
            return Ok((existing, false));
        }

        let new_profile = NewProfile::for_otp_login(input.email, input.name, input.pubkey);
        match self.profiles.create(&new_profile).await {
            Ok(created) => {
                info!(email = %input.email, "👤 Profile created from OTP login");
                Ok((created, true))
            }
            // Concurrent first login created it first.
            Err(AppError::Conflict { .. }) => {
                let existing = self
                    .profiles
                    .find_by_email(input.email)
                    .await?
                    .ok_or_else(|| AppError::internal("Profil introuvable après conflit"))?;
                Ok((existing, false))
            }
            Err(e) => {
                error!(email = %input.email, "Failed to create profile: {}", e);
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::otp_store::InMemoryOtpStore;
    use crate::services::profile_store::InMemoryProfileStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    impl RecordingMailer {
        fn last_code(&self) -> Option<String> {
            self.sent.lock().last().map(|(_, code)| code.clone())
        }
    }

    #[async_trait]
    impl OtpMailer for RecordingMailer {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn send_code(&self, email: &str, code: &str, _expires: i64) -> Result<(), MailerError> {
            if self.fail {
                return Err(MailerError::Transport("connection refused".into()));
            }
            self.sent.lock().push((email.to_string(), code.to_string()));
            Ok(())
        }
    }

    /// Another request creates the profile between our lookup and insert.
    #[derive(Default)]
    struct RacingProfileStore {
        inner: InMemoryProfileStore,
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl ProfileStore for RacingProfileStore {
        async fn find_by_email(&self, email: &str) -> shared::Result<Option<UserProfile>> {
            if self.lookups.fetch_add(1, Ordering::SeqCst) == 0 {
                return Ok(None);
            }
            self.inner.find_by_email(email).await
        }

        async fn create(&self, profile: &NewProfile) -> shared::Result<UserProfile> {
            self.inner.create(profile).await?;
            Err(AppError::conflict("Profil déjà existant"))
        }

        async fn record_login(&self, id: uuid::Uuid) -> shared::Result<i32> {
            self.inner.record_login(id).await
        }
    }

    struct Harness {
        service: OtpAuthService,
        codes: Arc<InMemoryOtpStore>,
        profiles: Arc<InMemoryProfileStore>,
        mailer: Arc<RecordingMailer>,
    }

    fn harness_with(mailer: RecordingMailer, policy: OtpPolicy) -> Harness {
        let codes = Arc::new(InMemoryOtpStore::new());
        let profiles = Arc::new(InMemoryProfileStore::new());
        let mailer = Arc::new(mailer);
        let auth = AuthService::new(&shared::Config::in_memory("otp-test-secret").auth).unwrap();
        let service = OtpAuthService::new(
            codes.clone(),
            profiles.clone(),
            mailer.clone(),
            Arc::new(RateLimiter::in_memory()),
            auth,
            policy,
        );
        Harness {
            service,
            codes,
            profiles,
            mailer,
        }
    }

    fn harness() -> Harness {
        harness_with(RecordingMailer::default(), OtpPolicy::default())
    }

    fn input<'a>(email: &'a str, code: &'a str) -> VerifyCodeInput<'a> {
        VerifyCodeInput {
            email,
            code,
            name: None,
            pubkey: None,
        }
    }

    #[test]
    fn generated_codes_are_six_digits() {
        for _ in 0..1_000 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            let value: u32 = code.parse().unwrap();
            assert!((100_000..=999_999).contains(&value));
        }
    }

    #[tokio::test]
    async fn send_stores_and_mails_the_same_code() {
        let h = harness();
        let sent = h.service.send_code("alice@example.com").await.unwrap();

        let stored = h.codes.get("alice@example.com").unwrap();
        assert_eq!(Some(stored.code.clone()), h.mailer.last_code());
        assert_eq!(stored.expires_at, sent.expires_at);
        assert!(!stored.used);
    }

    #[tokio::test]
    async fn delivery_failure_keeps_the_stored_code() {
        let h = harness_with(
            RecordingMailer {
                fail: true,
                ..Default::default()
            },
            OtpPolicy::default(),
        );

        let err = h.service.send_code("alice@example.com").await.unwrap_err();
        assert!(matches!(err, OtpError::Delivery(_)));
        assert!(h.codes.get("alice@example.com").is_some());
    }

    #[tokio::test]
    async fn first_verification_creates_profile() {
        let h = harness();
        h.service.send_code("jean.dupont@example.com").await.unwrap();
        let code = h.mailer.last_code().unwrap();

        let session = h
            .service
            .verify_code(input("jean.dupont@example.com", &code))
            .await
            .unwrap();

        assert!(session.is_new_user);
        assert_eq!(session.profile.first_name, "Jean");
        assert_eq!(session.profile.last_name, "Dupont");
        assert_eq!(session.profile.t4g_tokens, 1);
        assert_eq!(session.profile.login_count, 1);
        assert_eq!(h.profiles.len(), 1);
        assert!(session.conversion.is_new_user);
    }

    #[tokio::test]
    async fn returning_user_is_not_new() {
        let h = harness();
        for round in 0..3 {
            h.service.send_code("bob@example.com").await.unwrap();
            let code = h.mailer.last_code().unwrap();
            let session = h.service.verify_code(input("bob@example.com", &code)).await.unwrap();
            assert_eq!(session.is_new_user, round == 0);
            assert_eq!(session.profile.login_count, round + 1);
        }
        assert_eq!(h.profiles.len(), 1);
    }

    #[tokio::test]
    async fn third_login_prompts_account_creation() {
        let h = harness();
        let mut last = None;
        for _ in 0..3 {
            h.service.send_code("carol@example.com").await.unwrap();
            let code = h.mailer.last_code().unwrap();
            last = Some(h.service.verify_code(input("carol@example.com", &code)).await.unwrap());
        }
        assert!(last.unwrap().conversion.suggest_account_creation);
    }

    #[tokio::test]
    async fn concurrent_first_login_reuses_the_winning_profile() {
        let profiles = Arc::new(RacingProfileStore::default());
        let mailer = Arc::new(RecordingMailer::default());
        let auth = AuthService::new(&shared::Config::in_memory("otp-test-secret").auth).unwrap();
        let service = OtpAuthService::new(
            Arc::new(InMemoryOtpStore::new()),
            profiles.clone(),
            mailer.clone(),
            Arc::new(RateLimiter::in_memory()),
            auth.clone(),
            OtpPolicy::default(),
        );

        service.send_code("gina@example.com").await.unwrap();
        let code = mailer.last_code().unwrap();
        let session = service
            .verify_code(input("gina@example.com", &code))
            .await
            .unwrap();

        assert!(!session.is_new_user);
        assert_eq!(profiles.lookups.load(Ordering::SeqCst), 2);
        assert_eq!(profiles.inner.len(), 1);
        assert_eq!(session.profile.login_count, 1);

        let claims = auth.validate_token(&session.token.token).unwrap();
        assert_eq!(claims.sub, session.profile.id.to_string());
        assert_eq!(claims.email, "gina@example.com");
    }

    #[tokio::test]
    async fn wrong_code_is_rejected_without_side_effects() {
        let h = harness();
        h.service.send_code("dave@example.com").await.unwrap();
        let before = h.codes.get("dave@example.com");

        let err = h
            .service
            .verify_code(input("dave@example.com", "000000"))
            .await
            .unwrap_err();

        assert!(matches!(err, OtpError::InvalidCode));
        assert_eq!(h.codes.get("dave@example.com"), before);
        assert!(h.profiles.is_empty());
    }

    #[tokio::test]
    async fn verify_budget_is_enforced_before_lookup() {
        let policy = OtpPolicy {
            verify_limit: RateLimitConfig::new(2, 900),
            ..OtpPolicy::default()
        };
        let h = harness_with(RecordingMailer::default(), policy);
        h.service.send_code("eve@example.com").await.unwrap();
        let code = h.mailer.last_code().unwrap();

        for _ in 0..2 {
            let err = h.service.verify_code(input("eve@example.com", "000000")).await.unwrap_err();
            assert!(matches!(err, OtpError::InvalidCode));
        }

        let err = h.service.verify_code(input("eve@example.com", &code)).await.unwrap_err();
        assert!(matches!(err, OtpError::RateLimited { .. }));
        assert!(!h.codes.get("eve@example.com").unwrap().used);
    }

    #[tokio::test]
    async fn send_budget_is_enforced() {
        let policy = OtpPolicy {
            send_limit: RateLimitConfig::new(1, 900),
            ..OtpPolicy::default()
        };
        let h = harness_with(RecordingMailer::default(), policy);

        h.service.send_code("frank@example.com").await.unwrap();
        let err = h.service.send_code("frank@example.com").await.unwrap_err();
        assert!(matches!(err, OtpError::RateLimited { .. }));
        assert_eq!(h.mailer.sent.lock().len(), 1);
    }

    #[test]
    fn policy_follows_configuration() {
        let mut config = shared::Config::in_memory("s").otp;
        config.verify_max_attempts = 3;
        config.code_ttl_seconds = 600;
        let policy = OtpPolicy::from_config(&config);
        assert_eq!(policy.verify_limit.max_attempts, 3);
        assert_eq!(policy.code_ttl, Duration::minutes(10));
    }
}
