/// Session authority
///
/// A session moves Anonymous -> Authenticated -> (Expired | LoggedOut).
/// Expiry is lazy: a session idle for longer than the timeout is destroyed
/// the next time it is presented. Remember-me tokens let a client start a
/// fresh session after expiry and are rotated on every use.
pub mod token;

use crate::{
    account::{Account, AccountManager},
    audit::{SecurityEvent, SecurityEventKind, SecurityEventLog},
    clock::SharedClock,
    config::AuthConfig,
    db::models::{RememberToken, SessionRecord},
    error::PortalResult,
    metrics,
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info};

pub use token::{generate_token, token_digest};

const SESSION_COLUMNS: &str = "id, account_id, role, created_at, last_activity, created_ip, created_user_agent, last_ip, last_user_agent";

/// Network identity of the caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Tokens handed to the client after a successful login or resume
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub record: SessionRecord,
    pub remember_token: Option<String>,
}

/// Result of presenting a session token
#[derive(Debug, Clone)]
pub enum SessionStatus {
    Active(SessionRecord),
    Expired,
    Unknown,
}

/// Authenticated request state, passed explicitly to handlers
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session: SessionRecord,
    pub account: Account,
    pub token: String,
}

pub struct SessionManager {
    db: SqlitePool,
    clock: SharedClock,
    events: Arc<SecurityEventLog>,
    accounts: Arc<AccountManager>,
    timeout: Duration,
    remember_ttl: Duration,
}

impl SessionManager {
    pub fn new(
        db: SqlitePool,
        clock: SharedClock,
        events: Arc<SecurityEventLog>,
        accounts: Arc<AccountManager>,
        config: &AuthConfig,
    ) -> Self {
        Self {
            db,
            clock,
            events,
            accounts,
            timeout: Duration::seconds(config.session_timeout_secs as i64),
            remember_ttl: Duration::days(config.remember_me_days as i64),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn remember_ttl(&self) -> Duration {
        self.remember_ttl
    }

    /// Start a session for `account`, destroying whatever session the
    /// client presented before logging in.
    pub async fn start_session(
        &self,
        account: &Account,
        previous_token: Option<&str>,
        client: &ClientInfo,
        remember: bool,
    ) -> PortalResult<IssuedSession> {
        if let Some(previous) = previous_token {
            self.delete_session(&token_digest(previous)).await?;
        }

        let token = generate_token();
        let now = self.clock.now();
        let record = SessionRecord {
            id: token_digest(&token),
            account_id: account.id,
            role: account.role,
            created_at: now,
            last_activity: now,
            created_ip: client.ip.clone(),
            created_user_agent: client.user_agent.clone(),
            last_ip: client.ip.clone(),
            last_user_agent: client.user_agent.clone(),
        };

        sqlx::query(
            r#"
            INSERT INTO session (id, account_id, role, created_at, last_activity,
                                 created_ip, created_user_agent, last_ip, last_user_agent)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&record.id)
        .bind(record.account_id)
        .bind(record.role.as_str())
        .bind(record.created_at)
        .bind(record.last_activity)
        .bind(&record.created_ip)
        .bind(&record.created_user_agent)
        .bind(&record.last_ip)
        .bind(&record.last_user_agent)
        .execute(&self.db)
        .await?;

        let remember_token = if remember {
            Some(self.issue_remember_token(account.id).await?)
        } else {
            None
        };

        metrics::record_session_event("started");
        info!(account_id = account.id, remember, "session started");

        Ok(IssuedSession {
            token,
            record,
            remember_token,
        })
    }

    /// Validate a presented token and slide its idle deadline
    pub async fn touch_session(
        &self,
        token: &str,
        client: &ClientInfo,
    ) -> PortalResult<SessionStatus> {
        let id = token_digest(token);
        let Some(mut record) = self.get_session(&id).await? else {
            return Ok(SessionStatus::Unknown);
        };

        let now = self.clock.now();
        if now - record.last_activity > self.timeout {
            self.delete_session(&id).await?;
            self.events
                .record(
                    SecurityEvent::new(SecurityEventKind::SessionExpired)
                        .account(record.account_id)
                        .session(&id)
                        .client(client.ip.as_deref(), client.user_agent.as_deref()),
                )
                .await?;
            metrics::record_session_event("expired");
            return Ok(SessionStatus::Expired);
        }

        let drifted_from_creation =
            client.ip != record.created_ip || client.user_agent != record.created_user_agent;
        let changed_since_last =
            client.ip != record.last_ip || client.user_agent != record.last_user_agent;
        if drifted_from_creation && changed_since_last {
            self.events
                .record(
                    SecurityEvent::new(SecurityEventKind::SessionDrift)
                        .account(record.account_id)
                        .session(&id)
                        .client(client.ip.as_deref(), client.user_agent.as_deref())
                        .details(format!(
                            "created from ip={:?} ua={:?}",
                            record.created_ip, record.created_user_agent
                        )),
                )
                .await?;
        }

        sqlx::query(
            "UPDATE session SET last_activity = ?1, last_ip = ?2, last_user_agent = ?3 WHERE id = ?4",
        )
        .bind(now)
        .bind(&client.ip)
        .bind(&client.user_agent)
        .bind(&id)
        .execute(&self.db)
        .await?;

        record.last_activity = now;
        record.last_ip = client.ip.clone();
        record.last_user_agent = client.user_agent.clone();

        Ok(SessionStatus::Active(record))
    }

    /// Log out: drop the session and every remember-me token of its account
    pub async fn end_session(&self, token: &str, client: &ClientInfo) -> PortalResult<bool> {
        let id = token_digest(token);
        let Some(record) = self.get_session(&id).await? else {
            return Ok(false);
        };

        self.delete_session(&id).await?;
        sqlx::query("DELETE FROM remember_token WHERE account_id = ?1")
            .bind(record.account_id)
            .execute(&self.db)
            .await?;

        self.events
            .record(
                SecurityEvent::new(SecurityEventKind::Logout)
                    .account(record.account_id)
                    .session(&id)
                    .client(client.ip.as_deref(), client.user_agent.as_deref()),
            )
            .await?;
        metrics::record_session_event("logout");

        Ok(true)
    }

    /// Exchange a remember-me token for a new session.
    ///
    /// The presented token is consumed and a replacement is issued with the
    /// new session. Returns `None` for unknown or expired tokens.
    pub async fn resume(
        &self,
        remember_token: &str,
        previous_token: Option<&str>,
        client: &ClientInfo,
    ) -> PortalResult<Option<(Account, IssuedSession)>> {
        let digest = token_digest(remember_token);
        let stored = sqlx::query_as::<_, RememberToken>(
            "SELECT id, account_id, created_at, expires_at FROM remember_token WHERE id = ?1",
        )
        .bind(&digest)
        .fetch_optional(&self.db)
        .await?;

        let Some(stored) = stored else {
            debug!("unknown remember-me token presented");
            return Ok(None);
        };

        sqlx::query("DELETE FROM remember_token WHERE id = ?1")
            .bind(&digest)
            .execute(&self.db)
            .await?;

        if stored.expires_at <= self.clock.now() {
            debug!(account_id = stored.account_id, "expired remember-me token presented");
            return Ok(None);
        }

        let account = self.accounts.get_account(stored.account_id).await?;
        let issued = self
            .start_session(&account, previous_token, client, true)
            .await?;

        self.events
            .record(
                SecurityEvent::new(SecurityEventKind::SessionResumed)
                    .account(account.id)
                    .session(&issued.record.id)
                    .client(client.ip.as_deref(), client.user_agent.as_deref()),
            )
            .await?;
        metrics::record_session_event("resumed");

        Ok(Some((account, issued)))
    }

    /// Remove idle sessions and expired remember-me tokens
    pub async fn cleanup_expired(&self) -> PortalResult<(u64, u64)> {
        let now = self.clock.now();
        let cutoff = now - self.timeout;

        // Compared in Rust: stored timestamps are text and may differ in precision
        let sessions: Vec<(String, DateTime<Utc>)> =
            sqlx::query_as("SELECT id, last_activity FROM session")
                .fetch_all(&self.db)
                .await?;
        let mut removed_sessions = 0;
        for (id, last_activity) in sessions {
            if last_activity < cutoff {
                self.delete_session(&id).await?;
                removed_sessions += 1;
            }
        }

        let tokens: Vec<(String, DateTime<Utc>)> =
            sqlx::query_as("SELECT id, expires_at FROM remember_token")
                .fetch_all(&self.db)
                .await?;
        let mut removed_tokens = 0;
        for (id, expires_at) in tokens {
            if expires_at <= now {
                sqlx::query("DELETE FROM remember_token WHERE id = ?1")
                    .bind(&id)
                    .execute(&self.db)
                    .await?;
                removed_tokens += 1;
            }
        }

        Ok((removed_sessions, removed_tokens))
    }

    pub async fn count_active(&self) -> PortalResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM session")
            .fetch_one(&self.db)
            .await?;
        Ok(count)
    }

    async fn issue_remember_token(&self, account_id: i64) -> PortalResult<String> {
        let token = generate_token();
        let now = self.clock.now();

        sqlx::query(
            "INSERT INTO remember_token (id, account_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(token_digest(&token))
        .bind(account_id)
        .bind(now)
        .bind(now + self.remember_ttl)
        .execute(&self.db)
        .await?;

        Ok(token)
    }

    async fn get_session(&self, id: &str) -> PortalResult<Option<SessionRecord>> {
        let query = format!("SELECT {} FROM session WHERE id = ?1", SESSION_COLUMNS);
        let record = sqlx::query_as::<_, SessionRecord>(&query)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(record)
    }

    async fn delete_session(&self, id: &str) -> PortalResult<()> {
        sqlx::query("DELETE FROM session WHERE id = ?1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        account::{NewAccount, Role},
        clock::ManualClock,
        config::ServerConfig,
        db,
        rate_limit::{LockoutTracker, MemoryAttemptStore},
    };

    struct Fixture {
        clock: ManualClock,
        sessions: SessionManager,
        events: Arc<SecurityEventLog>,
        account: Account,
    }

    async fn fixture() -> Fixture {
        let config = ServerConfig::default();
        let pool = db::test_pool().await;
        let clock = ManualClock::new();
        let shared: SharedClock = Arc::new(clock.clone());
        let lockout = Arc::new(LockoutTracker::new(
            Arc::new(MemoryAttemptStore::new()),
            shared.clone(),
            &config.lockout,
        ));
        let accounts = Arc::new(AccountManager::new(pool.clone(), shared.clone(), lockout));
        let events = Arc::new(SecurityEventLog::new(pool.clone(), shared.clone()));
        let sessions = SessionManager::new(
            pool,
            shared,
            events.clone(),
            accounts.clone(),
            &config.authentication,
        );

        let account = accounts
            .create_account(NewAccount {
                username: "jane".to_string(),
                password: "s3cret-pass".to_string(),
                role: Role::User,
                full_name: "Jane Doe".to_string(),
                email: Some("jane@example.com".to_string()),
                national_id: None,
            })
            .await
            .unwrap();

        Fixture {
            clock,
            sessions,
            events,
            account,
        }
    }

    fn client(ip: &str) -> ClientInfo {
        ClientInfo {
            ip: Some(ip.to_string()),
            user_agent: Some("Mozilla/5.0".to_string()),
        }
    }

    #[tokio::test]
    async fn test_start_then_touch_keeps_session() {
        let f = fixture().await;
        let issued = f
            .sessions
            .start_session(&f.account, None, &client("10.0.0.1"), false)
            .await
            .unwrap();
        assert!(issued.remember_token.is_none());

        f.clock.advance(Duration::seconds(1700));
        match f.sessions.touch_session(&issued.token, &client("10.0.0.1")).await.unwrap() {
            SessionStatus::Active(record) => {
                assert_eq!(record.account_id, f.account.id);
                assert_eq!(record.role, Role::User);
            }
            other => panic!("expected active session, got {:?}", other),
        }

        // The touch slid the deadline, so another 1700s is still inside it
        f.clock.advance(Duration::seconds(1700));
        assert!(matches!(
            f.sessions.touch_session(&issued.token, &client("10.0.0.1")).await.unwrap(),
            SessionStatus::Active(_)
        ));
    }

    #[tokio::test]
    async fn test_touch_after_timeout_expires() {
        let f = fixture().await;
        let issued = f
            .sessions
            .start_session(&f.account, None, &client("10.0.0.1"), false)
            .await
            .unwrap();

        f.clock.advance(Duration::seconds(1801));
        assert!(matches!(
            f.sessions.touch_session(&issued.token, &client("10.0.0.1")).await.unwrap(),
            SessionStatus::Expired
        ));
        // Destroyed, so presenting it again is unknown
        assert!(matches!(
            f.sessions.touch_session(&issued.token, &client("10.0.0.1")).await.unwrap(),
            SessionStatus::Unknown
        ));
    }

    #[tokio::test]
    async fn test_login_replaces_previous_session() {
        let f = fixture().await;
        let first = f
            .sessions
            .start_session(&f.account, None, &client("10.0.0.1"), false)
            .await
            .unwrap();
        let second = f
            .sessions
            .start_session(&f.account, Some(&first.token), &client("10.0.0.1"), false)
            .await
            .unwrap();

        assert_ne!(first.token, second.token);
        assert!(matches!(
            f.sessions.touch_session(&first.token, &client("10.0.0.1")).await.unwrap(),
            SessionStatus::Unknown
        ));
    }

    #[tokio::test]
    async fn test_drift_is_recorded_once_and_session_survives() {
        let f = fixture().await;
        let issued = f
            .sessions
            .start_session(&f.account, None, &client("10.0.0.1"), false)
            .await
            .unwrap();

        for _ in 0..3 {
            assert!(matches!(
                f.sessions.touch_session(&issued.token, &client("192.168.1.9")).await.unwrap(),
                SessionStatus::Active(_)
            ));
        }

        let drift = f
            .events
            .for_account(f.account.id, SecurityEventKind::SessionDrift)
            .await
            .unwrap();
        assert_eq!(drift.len(), 1);
        assert_eq!(drift[0].ip.as_deref(), Some("192.168.1.9"));
    }

    #[tokio::test]
    async fn test_logout_revokes_remember_tokens() {
        let f = fixture().await;
        let issued = f
            .sessions
            .start_session(&f.account, None, &client("10.0.0.1"), true)
            .await
            .unwrap();
        let remember = issued.remember_token.clone().unwrap();

        assert!(f.sessions.end_session(&issued.token, &client("10.0.0.1")).await.unwrap());
        assert!(!f.sessions.end_session(&issued.token, &client("10.0.0.1")).await.unwrap());
        assert!(f
            .sessions
            .resume(&remember, None, &client("10.0.0.1"))
            .await
            .unwrap()
            .is_none());

        let logouts = f
            .events
            .for_account(f.account.id, SecurityEventKind::Logout)
            .await
            .unwrap();
        assert_eq!(logouts.len(), 1);
    }

    #[tokio::test]
    async fn test_resume_rotates_remember_token() {
        let f = fixture().await;
        let issued = f
            .sessions
            .start_session(&f.account, None, &client("10.0.0.1"), true)
            .await
            .unwrap();
        let remember = issued.remember_token.unwrap();

        f.clock.advance(Duration::hours(2));
        assert!(matches!(
            f.sessions.touch_session(&issued.token, &client("10.0.0.1")).await.unwrap(),
            SessionStatus::Expired
        ));

        let (account, resumed) = f
            .sessions
            .resume(&remember, None, &client("10.0.0.1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(account.id, f.account.id);
        let rotated = resumed.remember_token.unwrap();
        assert_ne!(rotated, remember);

        // The consumed token cannot be replayed
        assert!(f
            .sessions
            .resume(&remember, None, &client("10.0.0.1"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let f = fixture().await;
        f.sessions
            .start_session(&f.account, None, &client("10.0.0.1"), true)
            .await
            .unwrap();
        assert_eq!(f.sessions.count_active().await.unwrap(), 1);

        f.clock.advance(Duration::days(31));
        assert_eq!(f.sessions.cleanup_expired().await.unwrap(), (1, 1));
        assert_eq!(f.sessions.count_active().await.unwrap(), 0);
    }
}
