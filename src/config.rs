/// Configuration management for the vehicle portal
use crate::error::{PortalError, PortalResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 1800;
pub const DEFAULT_MAX_LOGIN_ATTEMPTS: u32 = 5;
pub const DEFAULT_LOCKOUT_DURATION_SECS: u64 = 900;
pub const DEFAULT_REMEMBER_ME_DAYS: u64 = 30;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub authentication: AuthConfig,
    pub lockout: LockoutConfig,
    pub rate_limit: RateLimitConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    /// Take the client address from `X-Forwarded-For`; only behind a reverse proxy
    pub trust_forwarded_for: bool,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    pub database: PathBuf,
}

/// Authentication and session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Idle time after which a session expires (sliding)
    pub session_timeout_secs: u64,
    /// Lifetime of a "remember me" token
    pub remember_me_days: u64,
    /// Mark cookies `Secure` (disable only for local http development)
    pub secure_cookies: bool,
    /// Admin account created on startup when it does not exist yet
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapAdmin {
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub full_name: String,
    pub email: String,
}

/// Where failed-login counters live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockoutStoreKind {
    /// Process-local map; lockout only holds for this server instance
    Memory,
    /// `login_attempt` table; lockout holds across clients and instances
    Shared,
}

impl LockoutStoreKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockoutStoreKind::Memory => "memory",
            LockoutStoreKind::Shared => "shared",
        }
    }

    pub fn parse(s: &str) -> PortalResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(LockoutStoreKind::Memory),
            "shared" | "database" => Ok(LockoutStoreKind::Shared),
            other => Err(PortalError::Validation(format!(
                "Invalid lockout store: {}",
                other
            ))),
        }
    }
}

/// Login lockout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockoutConfig {
    pub max_attempts: u32,
    pub lockout_duration_secs: u64,
    pub store: LockoutStoreKind,
}

/// Request rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Requests per second for requests carrying a session cookie
    pub authenticated_rps: u32,
    /// Requests per second for anonymous requests
    pub unauthenticated_rps: u32,
    pub burst_size: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let data_directory = PathBuf::from("./data");
        Self {
            service: ServiceConfig {
                hostname: "localhost".to_string(),
                port: 8080,
                trust_forwarded_for: false,
            },
            storage: StorageConfig {
                database: data_directory.join("portal.sqlite"),
                data_directory,
            },
            authentication: AuthConfig {
                session_timeout_secs: DEFAULT_SESSION_TIMEOUT_SECS,
                remember_me_days: DEFAULT_REMEMBER_ME_DAYS,
                secure_cookies: true,
                bootstrap_admin: None,
            },
            lockout: LockoutConfig {
                max_attempts: DEFAULT_MAX_LOGIN_ATTEMPTS,
                lockout_duration_secs: DEFAULT_LOCKOUT_DURATION_SECS,
                store: LockoutStoreKind::Shared,
            },
            rate_limit: RateLimitConfig {
                enabled: true,
                authenticated_rps: 50,
                unauthenticated_rps: 10,
                burst_size: 50,
            },
            logging: LoggingConfig {
                level: "debug".to_string(),
                json: false,
            },
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> PortalResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("PORTAL_HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let port = env::var("PORTAL_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| PortalError::Validation("Invalid port number".to_string()))?;

        let trust_forwarded_for = env::var("PORTAL_TRUST_FORWARDED_FOR")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);

        let data_directory: PathBuf = env::var("PORTAL_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let database = env::var("PORTAL_DATABASE_LOCATION")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("portal.sqlite"));

        let session_timeout_secs = env::var("PORTAL_SESSION_TIMEOUT")
            .unwrap_or_else(|_| DEFAULT_SESSION_TIMEOUT_SECS.to_string())
            .parse()
            .unwrap_or(DEFAULT_SESSION_TIMEOUT_SECS);
        let remember_me_days = env::var("PORTAL_REMEMBER_ME_DAYS")
            .unwrap_or_else(|_| DEFAULT_REMEMBER_ME_DAYS.to_string())
            .parse()
            .unwrap_or(DEFAULT_REMEMBER_ME_DAYS);
        let secure_cookies = env::var("PORTAL_SECURE_COOKIES")
            .unwrap_or_else(|_| "true".to_string())
            .parse()
            .unwrap_or(true);

        // Bootstrap admin only when both username and password are given
        let bootstrap_admin = match (
            env::var("PORTAL_ADMIN_USERNAME"),
            env::var("PORTAL_ADMIN_PASSWORD"),
        ) {
            (Ok(username), Ok(password)) => Some(BootstrapAdmin {
                full_name: env::var("PORTAL_ADMIN_FULL_NAME")
                    .unwrap_or_else(|_| "Administrator".to_string()),
                email: env::var("PORTAL_ADMIN_EMAIL")
                    .unwrap_or_else(|_| format!("{}@{}", username, hostname)),
                username,
                password,
            }),
            _ => None,
        };

        let max_attempts = env::var("PORTAL_LOCKOUT_MAX_ATTEMPTS")
            .unwrap_or_else(|_| DEFAULT_MAX_LOGIN_ATTEMPTS.to_string())
            .parse()
            .unwrap_or(DEFAULT_MAX_LOGIN_ATTEMPTS);
        let lockout_duration_secs = env::var("PORTAL_LOCKOUT_DURATION")
            .unwrap_or_else(|_| DEFAULT_LOCKOUT_DURATION_SECS.to_string())
            .parse()
            .unwrap_or(DEFAULT_LOCKOUT_DURATION_SECS);
        let store = LockoutStoreKind::parse(
            &env::var("PORTAL_LOCKOUT_STORE").unwrap_or_else(|_| "shared".to_string()),
        )?;

        let rate_limit_enabled = env::var("PORTAL_RATE_LIMITS_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse()
            .unwrap_or(true);
        let authenticated_rps = env::var("PORTAL_RATE_LIMIT_AUTHENTICATED_RPS")
            .unwrap_or_else(|_| "50".to_string())
            .parse()
            .unwrap_or(50);
        let unauthenticated_rps = env::var("PORTAL_RATE_LIMIT_UNAUTHENTICATED_RPS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);
        let burst_size = env::var("PORTAL_RATE_LIMIT_BURST")
            .unwrap_or_else(|_| "50".to_string())
            .parse()
            .unwrap_or(50);

        let log_level = env::var("PORTAL_LOG_LEVEL").unwrap_or_else(|_| "debug".to_string());
        let log_json = env::var("PORTAL_LOG_FORMAT")
            .map(|format| format.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                trust_forwarded_for,
            },
            storage: StorageConfig {
                data_directory,
                database,
            },
            authentication: AuthConfig {
                session_timeout_secs,
                remember_me_days,
                secure_cookies,
                bootstrap_admin,
            },
            lockout: LockoutConfig {
                max_attempts,
                lockout_duration_secs,
                store,
            },
            rate_limit: RateLimitConfig {
                enabled: rate_limit_enabled,
                authenticated_rps,
                unauthenticated_rps,
                burst_size,
            },
            logging: LoggingConfig {
                level: log_level,
                json: log_json,
            },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> PortalResult<()> {
        if self.service.hostname.is_empty() {
            return Err(PortalError::Validation("Hostname cannot be empty".to_string()));
        }

        if self.authentication.session_timeout_secs == 0 {
            return Err(PortalError::Validation(
                "Session timeout must be greater than zero".to_string(),
            ));
        }

        if self.lockout.max_attempts == 0 || self.lockout.lockout_duration_secs == 0 {
            return Err(PortalError::Validation(
                "Lockout attempts and duration must be greater than zero".to_string(),
            ));
        }

        if let Some(admin) = &self.authentication.bootstrap_admin {
            if admin.password.len() < 8 {
                return Err(PortalError::Validation(
                    "Bootstrap admin password must be at least 8 characters".to_string(),
                ));
            }
        }

        Ok(())
    }
}
