/// Storage backends for failed-login counters
use crate::{
    db::models::LoginAttemptRow,
    error::PortalResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Counter state for one identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptState {
    pub count: u32,
    pub last_attempt_at: DateTime<Utc>,
    pub lockout_until: Option<DateTime<Utc>>,
}

/// Key-value store for attempt counters, keyed by identifier digest
#[async_trait]
pub trait AttemptStore: Send + Sync {
    async fn load(&self, key: &str) -> PortalResult<Option<AttemptState>>;
    async fn save(&self, key: &str, state: &AttemptState) -> PortalResult<()>;
    async fn remove(&self, key: &str) -> PortalResult<()>;
    /// Drop counters whose last attempt is before `cutoff`; returns how many
    async fn remove_stale(&self, cutoff: DateTime<Utc>) -> PortalResult<u64>;
}

/// Process-local store. Counters vanish on restart and are not shared
/// between server instances.
#[derive(Default)]
pub struct MemoryAttemptStore {
    entries: Mutex<HashMap<String, AttemptState>>,
}

impl MemoryAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AttemptStore for MemoryAttemptStore {
    async fn load(&self, key: &str) -> PortalResult<Option<AttemptState>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn save(&self, key: &str, state: &AttemptState) -> PortalResult<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), state.clone());
        Ok(())
    }

    async fn remove(&self, key: &str) -> PortalResult<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn remove_stale(&self, cutoff: DateTime<Utc>) -> PortalResult<u64> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, state| state.last_attempt_at >= cutoff);
        Ok((before - entries.len()) as u64)
    }
}

/// Store backed by the `login_attempt` table
pub struct SqlAttemptStore {
    db: SqlitePool,
}

impl SqlAttemptStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AttemptStore for SqlAttemptStore {
    async fn load(&self, key: &str) -> PortalResult<Option<AttemptState>> {
        let row = sqlx::query_as::<_, LoginAttemptRow>(
            r#"
            SELECT identifier_hash, count, last_attempt_at, lockout_until
            FROM login_attempt
            WHERE identifier_hash = ?1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(|row| AttemptState {
            count: u32::try_from(row.count).unwrap_or(u32::MAX),
            last_attempt_at: row.last_attempt_at,
            lockout_until: row.lockout_until,
        }))
    }

    async fn save(&self, key: &str, state: &AttemptState) -> PortalResult<()> {
        sqlx::query(
            r#"
            INSERT INTO login_attempt (identifier_hash, count, last_attempt_at, lockout_until)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (identifier_hash) DO UPDATE SET
                count = excluded.count,
                last_attempt_at = excluded.last_attempt_at,
                lockout_until = excluded.lockout_until
            "#,
        )
        .bind(key)
        .bind(i64::from(state.count))
        .bind(state.last_attempt_at)
        .bind(state.lockout_until)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn remove(&self, key: &str) -> PortalResult<()> {
        sqlx::query("DELETE FROM login_attempt WHERE identifier_hash = ?1")
            .bind(key)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn remove_stale(&self, cutoff: DateTime<Utc>) -> PortalResult<u64> {
        // Compared in Rust: stored timestamps are text and may differ in precision
        let rows: Vec<(String, DateTime<Utc>)> =
            sqlx::query_as("SELECT identifier_hash, last_attempt_at FROM login_attempt")
                .fetch_all(&self.db)
                .await?;

        let mut removed = 0;
        for (key, last_attempt_at) in rows {
            if last_attempt_at < cutoff {
                self.remove(&key).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
