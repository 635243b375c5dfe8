/// Background task implementations
use crate::{context::AppContext, error::PortalResult};

/// Cleanup idle sessions and expired remember-me tokens
pub async fn cleanup_expired_sessions(ctx: &AppContext) -> PortalResult<u64> {
    let (sessions_deleted, remember_tokens_deleted) =
        ctx.session_manager.cleanup_expired().await?;

    Ok(sessions_deleted + remember_tokens_deleted)
}

/// Drop failed-login counters that can no longer affect a lockout decision
pub async fn purge_stale_login_attempts(ctx: &AppContext) -> PortalResult<u64> {
    ctx.lockout.purge_stale().await
}

/// Health check - verify the data store answers
pub async fn health_check(ctx: &AppContext) -> PortalResult<()> {
    sqlx::query("SELECT 1").fetch_one(&ctx.db).await?;
    Ok(())
}
