/// Security event log
///
/// Login outcomes, lockouts, logouts and session anomalies are persisted to
/// `security_event` and mirrored to the tracing output.
use crate::{
    clock::SharedClock,
    db::models::SecurityEventRecord,
    error::PortalResult,
    metrics,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    LoginSucceeded,
    LoginFailed,
    LoginWrongChannel,
    LockedOut,
    Logout,
    SessionExpired,
    SessionDrift,
    SessionResumed,
    PasswordChanged,
}

impl SecurityEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventKind::LoginSucceeded => "login_succeeded",
            SecurityEventKind::LoginFailed => "login_failed",
            SecurityEventKind::LoginWrongChannel => "login_wrong_channel",
            SecurityEventKind::LockedOut => "locked_out",
            SecurityEventKind::Logout => "logout",
            SecurityEventKind::SessionExpired => "session_expired",
            SecurityEventKind::SessionDrift => "session_drift",
            SecurityEventKind::SessionResumed => "session_resumed",
            SecurityEventKind::PasswordChanged => "password_changed",
        }
    }
}

/// Event about to be recorded
#[derive(Debug, Clone)]
pub struct SecurityEvent {
    pub kind: SecurityEventKind,
    pub account_id: Option<i64>,
    pub session_id: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub details: Option<String>,
}

impl SecurityEvent {
    pub fn new(kind: SecurityEventKind) -> Self {
        Self {
            kind,
            account_id: None,
            session_id: None,
            ip: None,
            user_agent: None,
            details: None,
        }
    }

    pub fn account(mut self, account_id: i64) -> Self {
        self.account_id = Some(account_id);
        self
    }

    pub fn session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    pub fn client(mut self, ip: Option<&str>, user_agent: Option<&str>) -> Self {
        self.ip = ip.map(str::to_string);
        self.user_agent = user_agent.map(str::to_string);
        self
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Writes and reads security events
pub struct SecurityEventLog {
    db: SqlitePool,
    clock: SharedClock,
}

impl SecurityEventLog {
    pub fn new(db: SqlitePool, clock: SharedClock) -> Self {
        Self { db, clock }
    }

    /// Record an event
    pub async fn record(&self, event: SecurityEvent) -> PortalResult<()> {
        tracing::info!(
            kind = event.kind.as_str(),
            account_id = ?event.account_id,
            ip = ?event.ip,
            details = ?event.details,
            "security event"
        );
        metrics::record_security_event(event.kind.as_str());

        sqlx::query(
            r#"
            INSERT INTO security_event (kind, account_id, session_id, ip, user_agent, details, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(event.kind.as_str())
        .bind(event.account_id)
        .bind(&event.session_id)
        .bind(&event.ip)
        .bind(&event.user_agent)
        .bind(&event.details)
        .bind(self.clock.now())
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Most recent events first
    pub async fn recent(&self, limit: i64, offset: i64) -> PortalResult<Vec<SecurityEventRecord>> {
        let events = sqlx::query_as::<_, SecurityEventRecord>(
            r#"
            SELECT id, kind, account_id, session_id, ip, user_agent, details, created_at
            FROM security_event
            ORDER BY id DESC
            LIMIT ?1 OFFSET ?2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;

        Ok(events)
    }

    /// Events of one kind for one account, most recent first
    pub async fn for_account(
        &self,
        account_id: i64,
        kind: SecurityEventKind,
    ) -> PortalResult<Vec<SecurityEventRecord>> {
        let events = sqlx::query_as::<_, SecurityEventRecord>(
            r#"
            SELECT id, kind, account_id, session_id, ip, user_agent, details, created_at
            FROM security_event
            WHERE account_id = ?1 AND kind = ?2
            ORDER BY id DESC
            "#,
        )
        .bind(account_id)
        .bind(kind.as_str())
        .fetch_all(&self.db)
        .await?;

        Ok(events)
    }
}
