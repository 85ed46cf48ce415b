use shared::{AuthService, Config};
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::cache::QueryCache;
use crate::services::{
    mailer_from_config, InMemoryNodeStore, InMemoryOtpStore, InMemoryProfileStore, NodeQueryService,
    NodeStore, OtpAuthService, OtpMailer, OtpPolicy, OtpStore, PgNodeStore, PgOtpStore,
    PgProfileStore, ProfileStore, RateLimiter,
};

/// Schema under `migrations/`, embedded at build time.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Bring the database schema up to date. Already applied migrations are
/// skipped.
pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    MIGRATOR
        .run(pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run database migrations: {}", e))?;
    info!("🗄️ Database migrations applied ({} known)", MIGRATOR.migrations.len());
    Ok(())
}

/// Storage, delivery and limiter implementations the service runs on.
pub struct Backends {
    pub otp_store: Arc<dyn OtpStore>,
    pub profiles: Arc<dyn ProfileStore>,
    pub nodes: Arc<dyn NodeStore>,
    pub mailer: Arc<dyn OtpMailer>,
    pub rate_limiter: Arc<RateLimiter>,
    pub db_pool: Option<PgPool>,
    pub redis_pool: Option<deadpool_redis::Pool>,
}

impl Backends {
    /// Process-local backends, nothing external required.
    pub fn in_memory(mailer: Arc<dyn OtpMailer>) -> Self {
        Self {
            otp_store: Arc::new(InMemoryOtpStore::new()),
            profiles: Arc::new(InMemoryProfileStore::new()),
            nodes: Arc::new(InMemoryNodeStore::new()),
            mailer,
            rate_limiter: Arc::new(RateLimiter::in_memory()),
            db_pool: None,
            redis_pool: None,
        }
    }
}

/// Shared application state, injected into every handler.
pub struct AppState {
    pub config: Arc<Config>,
    pub auth: AuthService,
    pub otp: Arc<OtpAuthService>,
    pub nodes: Arc<NodeQueryService>,
    pub db_pool: Option<PgPool>,
    pub redis_pool: Option<deadpool_redis::Pool>,
    pub rate_limit_backend: &'static str,
    pub started_at: Instant,
}

impl AppState {
    pub fn with_backends(config: Config, backends: Backends) -> shared::Result<Self> {
        let auth = AuthService::new(&config.auth)?;

        let cache = Arc::new(QueryCache::new(
            Duration::from_secs(config.cache.ttl_seconds),
            config.cache.capacity,
        ));

        let otp = OtpAuthService::new(
            backends.otp_store,
            backends.profiles,
            backends.mailer,
            backends.rate_limiter.clone(),
            auth.clone(),
            OtpPolicy::from_config(&config.otp),
        );

        Ok(Self {
            config: Arc::new(config),
            auth,
            otp: Arc::new(otp),
            nodes: Arc::new(NodeQueryService::new(backends.nodes, cache)),
            db_pool: backends.db_pool,
            redis_pool: backends.redis_pool,
            rate_limit_backend: backends.rate_limiter.backend_name(),
            started_at: Instant::now(),
        })
    }

    /// Connect the configured backends. Missing `DATABASE_URL` or
    /// `REDIS_URL` falls back to the in-memory implementation.
    pub async fn from_config(config: Config) -> anyhow::Result<Self> {
        let mailer = mailer_from_config(&config.email, config.is_development());
        let mut backends = Backends::in_memory(mailer);

        match &config.database.url {
            Some(url) => {
                let pool = PgPoolOptions::new()
                    .max_connections(config.database.max_connections)
                    .acquire_timeout(Duration::from_secs(config.database.acquire_timeout_seconds))
                    .connect(url)
                    .await
                    .map_err(|e| anyhow::anyhow!("Failed to connect to PostgreSQL: {}", e))?;
                info!("🗄️ PostgreSQL pool ready ({} max connections)", config.database.max_connections);
                run_migrations(&pool).await?;

                backends.otp_store = Arc::new(PgOtpStore::new(pool.clone()));
                backends.profiles = Arc::new(PgProfileStore::new(pool.clone()));
                backends.nodes = Arc::new(PgNodeStore::new(pool.clone()));
                backends.db_pool = Some(pool);
            }
            None => warn!("⚠️ DATABASE_URL not set, OTP codes, profiles and nodes are kept in memory"),
        }

        match &config.redis.url {
            Some(url) => {
                let pool = deadpool_redis::Config::from_url(url)
                    .create_pool(Some(deadpool_redis::Runtime::Tokio1))
                    .map_err(|e| anyhow::anyhow!("Failed to create Redis pool: {}", e))?;
                info!("🔴 Redis pool ready, rate limits shared between instances");

                backends.rate_limiter = Arc::new(RateLimiter::with_redis(pool.clone()));
                backends.redis_pool = Some(pool);
            }
            None => warn!("⚠️ REDIS_URL not set, rate limits are process-local"),
        }

        Ok(Self::with_backends(config, backends)?)
    }
}
