/// Rate Limiting System
///
/// Two independent mechanisms live here:
/// - a request-rate limiter applied to every request as middleware
/// - the login lockout tracker that counts failed logins per identifier
pub mod lockout;
pub mod store;

pub use lockout::{LockoutDecision, LockoutTracker};
pub use store::{AttemptState, AttemptStore, MemoryAttemptStore, SqlAttemptStore};

use crate::{
    api::auth::SESSION_COOKIE,
    config::RateLimitConfig,
    error::{PortalError, PortalResult},
};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorLimiter,
};
use std::{num::NonZeroU32, sync::Arc, time::Duration};

/// Request-rate limiter with separate quotas for anonymous and signed-in traffic
#[derive(Clone)]
pub struct RequestRateLimiter {
    enabled: bool,
    authenticated: Arc<GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    unauthenticated: Arc<GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl RequestRateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let fallback = NonZeroU32::MIN;

        let auth_quota = Quota::per_second(NonZeroU32::new(config.authenticated_rps).unwrap_or(fallback))
            .allow_burst(NonZeroU32::new(config.burst_size).unwrap_or(fallback));

        let unauth_quota =
            Quota::per_second(NonZeroU32::new(config.unauthenticated_rps).unwrap_or(fallback))
                .allow_burst(NonZeroU32::new(config.burst_size / 5).unwrap_or(fallback));

        Self {
            enabled: config.enabled,
            authenticated: Arc::new(GovernorLimiter::direct(auth_quota)),
            unauthenticated: Arc::new(GovernorLimiter::direct(unauth_quota)),
        }
    }

    /// Check rate limit for a request carrying a session cookie
    pub fn check_authenticated(&self) -> PortalResult<()> {
        if !self.enabled {
            return Ok(());
        }
        self.authenticated
            .check()
            .map_err(|_| PortalError::RateLimitExceeded {
                retry_after: Duration::from_secs(1),
            })
    }

    /// Check rate limit for an anonymous request
    pub fn check_unauthenticated(&self) -> PortalResult<()> {
        if !self.enabled {
            return Ok(());
        }
        self.unauthenticated
            .check()
            .map_err(|_| PortalError::RateLimitExceeded {
                retry_after: Duration::from_secs(1),
            })
    }
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(ctx): State<crate::context::AppContext>,
    request: Request,
    next: Next,
) -> Result<Response, PortalError> {
    let has_session = CookieJar::from_headers(request.headers())
        .get(SESSION_COOKIE)
        .is_some();

    if has_session {
        ctx.rate_limiter.check_authenticated()?;
    } else {
        ctx.rate_limiter.check_unauthenticated()?;
    }

    Ok(next.run(request).await)
}
