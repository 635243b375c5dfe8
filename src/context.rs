/// Application context and dependency injection
use crate::{
    account::AccountManager,
    audit::SecurityEventLog,
    clock::{SharedClock, SystemClock},
    config::{LockoutStoreKind, ServerConfig},
    db,
    error::{PortalError, PortalResult},
    owners::{OwnerRepository, OwnerResolver},
    rate_limit::{AttemptStore, LockoutTracker, MemoryAttemptStore, RequestRateLimiter, SqlAttemptStore},
    session::SessionManager,
    vehicles::{VehicleAuthorizer, VehicleRepository},
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub clock: SharedClock,
    pub account_manager: Arc<AccountManager>,
    pub session_manager: Arc<SessionManager>,
    pub lockout: Arc<LockoutTracker>,
    // Owners & vehicles
    pub owners: Arc<OwnerRepository>,
    pub owner_resolver: Arc<OwnerResolver>,
    pub vehicles: Arc<VehicleRepository>,
    pub authorizer: Arc<VehicleAuthorizer>,
    // Security event log
    pub events: Arc<SecurityEventLog>,
    // Request-rate limiter
    pub rate_limiter: Arc<RequestRateLimiter>,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> PortalResult<Self> {
        // Validate configuration
        config.validate()?;

        // Create data directory if it doesn't exist
        Self::ensure_directories(&config).await?;

        // Initialize database
        let pool = db::create_pool(&config.storage.database, db::DatabaseOptions::default()).await?;
        db::run_migrations(&pool).await?;
        db::test_connection(&pool).await?;

        let context = Self::with_pool(config, pool, Arc::new(SystemClock));
        context.bootstrap_admin().await?;

        Ok(context)
    }

    /// Wire services over an existing pool
    pub fn with_pool(config: ServerConfig, pool: SqlitePool, clock: SharedClock) -> Self {
        let store: Arc<dyn AttemptStore> = match config.lockout.store {
            LockoutStoreKind::Memory => {
                tracing::warn!("Lockout counters are process-local; they reset on restart");
                Arc::new(MemoryAttemptStore::new())
            }
            LockoutStoreKind::Shared => Arc::new(SqlAttemptStore::new(pool.clone())),
        };
        let lockout = Arc::new(LockoutTracker::new(store, clock.clone(), &config.lockout));

        let account_manager = Arc::new(AccountManager::new(
            pool.clone(),
            clock.clone(),
            lockout.clone(),
        ));
        let events = Arc::new(SecurityEventLog::new(pool.clone(), clock.clone()));
        let session_manager = Arc::new(SessionManager::new(
            pool.clone(),
            clock.clone(),
            events.clone(),
            account_manager.clone(),
            &config.authentication,
        ));

        let owners = Arc::new(OwnerRepository::new(pool.clone(), clock.clone()));
        let owner_resolver = Arc::new(OwnerResolver::new(pool.clone()));
        let vehicles = Arc::new(VehicleRepository::new(pool.clone(), clock.clone()));
        let authorizer = Arc::new(VehicleAuthorizer::new(vehicles.clone()));

        let rate_limiter = Arc::new(RequestRateLimiter::new(&config.rate_limit));

        Self {
            config: Arc::new(config),
            db: pool,
            clock,
            account_manager,
            session_manager,
            lockout,
            owners,
            owner_resolver,
            vehicles,
            authorizer,
            events,
            rate_limiter,
        }
    }

    /// Create the configured admin account when it is missing
    async fn bootstrap_admin(&self) -> PortalResult<()> {
        if let Some(admin) = &self.config.authentication.bootstrap_admin {
            self.account_manager
                .ensure_admin(&admin.username, &admin.password, &admin.full_name, &admin.email)
                .await?;
        }
        Ok(())
    }

    /// Ensure required directories exist
    async fn ensure_directories(config: &ServerConfig) -> PortalResult<()> {
        let dir = &config.storage.data_directory;
        if !dir.exists() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                PortalError::Internal(format!("Failed to create directory {:?}: {}", dir, e))
            })?;
        }

        if let Some(parent) = config.storage.database.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        Ok(())
    }

    /// Today's date for registration status
    pub fn today(&self) -> chrono::NaiveDate {
        self.clock.now().date_naive()
    }

    /// Get service URL
    pub fn service_url(&self) -> String {
        format!(
            "http://{}:{}",
            self.config.service.hostname, self.config.service.port
        )
    }
}
