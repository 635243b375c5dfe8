use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info};

use crate::metrics;

pub mod tasks;

/// Job scheduler for background tasks
pub struct JobScheduler {
    context: Arc<crate::context::AppContext>,
}

impl JobScheduler {
    pub fn new(context: Arc<crate::context::AppContext>) -> Self {
        Self { context }
    }

    /// Start all background jobs
    pub fn start(self: Arc<Self>) {
        info!("Starting background job scheduler");

        // Spawn cleanup tasks
        tokio::spawn(Self::expired_session_cleanup_job(Arc::clone(&self)));
        tokio::spawn(Self::login_attempt_cleanup_job(Arc::clone(&self)));

        // Spawn monitoring tasks
        tokio::spawn(Self::health_check_job(Arc::clone(&self)));

        info!("Background jobs started");
    }

    /// Cleanup idle sessions and expired remember-me tokens (runs every 5 minutes)
    async fn expired_session_cleanup_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(300));

        loop {
            interval.tick().await;
            debug!("Running expired session cleanup");

            match tasks::cleanup_expired_sessions(&scheduler.context).await {
                Ok(count) => {
                    metrics::record_background_job("session_cleanup", "success");
                    if count > 0 {
                        info!("Cleaned up {} expired sessions and remember-me tokens", count);
                    }
                }
                Err(e) => {
                    metrics::record_background_job("session_cleanup", "failure");
                    error!("Failed to cleanup expired sessions: {}", e);
                }
            }
        }
    }

    /// Drop login-attempt counters older than the lockout window (runs every 15 minutes)
    async fn login_attempt_cleanup_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(900));

        loop {
            interval.tick().await;
            debug!("Running stale login attempt cleanup");

            match tasks::purge_stale_login_attempts(&scheduler.context).await {
                Ok(count) => {
                    metrics::record_background_job("login_attempt_cleanup", "success");
                    if count > 0 {
                        info!("Purged {} stale login attempt counters", count);
                    }
                }
                Err(e) => {
                    metrics::record_background_job("login_attempt_cleanup", "failure");
                    error!("Failed to purge stale login attempts: {}", e);
                }
            }
        }
    }

    /// Health check job (runs every 5 minutes)
    async fn health_check_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(300));

        loop {
            interval.tick().await;

            match tasks::health_check(&scheduler.context).await {
                Ok(_) => metrics::record_background_job("health_check", "success"),
                Err(e) => {
                    metrics::record_background_job("health_check", "failure");
                    error!("Health check failed: {}", e);
                }
            }
        }
    }
}
