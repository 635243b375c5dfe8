/// Failed-login lockout tracker
///
/// Counts failures per identifier (the submitted username). Reaching the
/// attempt limit locks the identifier for the lockout duration; a counter
/// whose last failure is older than that duration counts as zero.
use super::store::{AttemptState, AttemptStore};
use crate::{clock::SharedClock, config::LockoutConfig, error::PortalResult, metrics};
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of a lockout check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockoutDecision {
    Allowed,
    Denied { retry_after_secs: u64 },
}

pub struct LockoutTracker {
    store: Arc<dyn AttemptStore>,
    clock: SharedClock,
    max_attempts: u32,
    lockout_duration: Duration,
}

/// Store key for an identifier: SHA-256 of the trimmed, lowercased value
pub fn identifier_key(identifier: &str) -> String {
    let normalized = identifier.trim().to_lowercase();
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

/// Whole seconds until `until`, rounded up and never below one
fn seconds_until(until: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (until - now).num_milliseconds().max(0) as u64;
    millis.div_ceil(1000).max(1)
}

impl LockoutTracker {
    pub fn new(store: Arc<dyn AttemptStore>, clock: SharedClock, config: &LockoutConfig) -> Self {
        Self {
            store,
            clock,
            max_attempts: config.max_attempts,
            lockout_duration: Duration::seconds(config.lockout_duration_secs as i64),
        }
    }

    pub fn lockout_duration(&self) -> Duration {
        self.lockout_duration
    }

    fn is_stale(&self, state: &AttemptState, now: DateTime<Utc>) -> bool {
        now - state.last_attempt_at > self.lockout_duration
    }

    /// Decide whether a login attempt for `identifier` may proceed
    pub async fn check(&self, identifier: &str) -> PortalResult<LockoutDecision> {
        let key = identifier_key(identifier);
        let Some(state) = self.store.load(&key).await? else {
            return Ok(LockoutDecision::Allowed);
        };
        let now = self.clock.now();

        if let Some(until) = state.lockout_until {
            if until > now {
                return Ok(LockoutDecision::Denied {
                    retry_after_secs: seconds_until(until, now),
                });
            }
        }

        if self.is_stale(&state, now) {
            return Ok(LockoutDecision::Allowed);
        }

        if state.count >= self.max_attempts {
            return Ok(LockoutDecision::Denied {
                retry_after_secs: seconds_until(state.last_attempt_at + self.lockout_duration, now),
            });
        }

        Ok(LockoutDecision::Allowed)
    }

    /// Count a failed attempt, starting a lockout when the limit is reached
    pub async fn record_failure(&self, identifier: &str) -> PortalResult<AttemptState> {
        let key = identifier_key(identifier);
        let now = self.clock.now();

        let mut state = match self.store.load(&key).await? {
            Some(state) if !self.is_stale(&state, now) => state,
            _ => AttemptState {
                count: 0,
                last_attempt_at: now,
                lockout_until: None,
            },
        };

        // An elapsed lockout starts a fresh window
        if state.lockout_until.is_some_and(|until| until <= now) {
            state.count = 0;
            state.lockout_until = None;
        }

        state.count = state.count.saturating_add(1);
        state.last_attempt_at = now;

        if state.count >= self.max_attempts && state.lockout_until.is_none() {
            state.lockout_until = Some(now + self.lockout_duration);
            metrics::record_lockout();
            warn!(
                attempts = state.count,
                lockout_secs = self.lockout_duration.num_seconds(),
                "identifier locked out after repeated failures"
            );
        } else {
            debug!(attempts = state.count, "failed login recorded");
        }

        self.store.save(&key, &state).await?;
        Ok(state)
    }

    /// Forget all failures for `identifier`
    pub async fn clear(&self, identifier: &str) -> PortalResult<()> {
        self.store.remove(&identifier_key(identifier)).await
    }

    /// Remove counters that can no longer affect a decision
    pub async fn purge_stale(&self) -> PortalResult<u64> {
        let cutoff = self.clock.now() - self.lockout_duration;
        self.store.remove_stale(cutoff).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        config::{LockoutConfig, LockoutStoreKind},
        db,
        rate_limit::store::{MemoryAttemptStore, SqlAttemptStore},
    };

    fn config() -> LockoutConfig {
        LockoutConfig {
            max_attempts: 5,
            lockout_duration_secs: 900,
            store: LockoutStoreKind::Memory,
        }
    }

    fn tracker(clock: &ManualClock) -> LockoutTracker {
        LockoutTracker::new(
            Arc::new(MemoryAttemptStore::new()),
            Arc::new(clock.clone()),
            &config(),
        )
    }

    #[test]
    fn test_identifier_key_normalizes() {
        assert_eq!(identifier_key(" Bob "), identifier_key("bob"));
        assert_ne!(identifier_key("bob"), identifier_key("alice"));
        assert_eq!(identifier_key("bob").len(), 64);
    }

    #[tokio::test]
    async fn test_sixth_attempt_denied_then_allowed_after_window() {
        let clock = ManualClock::new();
        let tracker = tracker(&clock);

        for _ in 0..5 {
            assert_eq!(tracker.check("bob").await.unwrap(), LockoutDecision::Allowed);
            tracker.record_failure("bob").await.unwrap();
        }

        match tracker.check("bob").await.unwrap() {
            LockoutDecision::Denied { retry_after_secs } => {
                assert!(retry_after_secs > 0);
                assert_eq!(retry_after_secs, 900);
            }
            LockoutDecision::Allowed => panic!("sixth attempt should be denied"),
        }

        clock.advance(Duration::seconds(300));
        match tracker.check("bob").await.unwrap() {
            LockoutDecision::Denied { retry_after_secs } => assert_eq!(retry_after_secs, 600),
            LockoutDecision::Allowed => panic!("still inside the lockout window"),
        }

        clock.advance(Duration::seconds(601));
        assert_eq!(tracker.check("bob").await.unwrap(), LockoutDecision::Allowed);
    }

    #[tokio::test]
    async fn test_fewer_failures_than_limit_allowed() {
        let clock = ManualClock::new();
        let tracker = tracker(&clock);

        for _ in 0..4 {
            tracker.record_failure("carol").await.unwrap();
        }
        assert_eq!(tracker.check("carol").await.unwrap(), LockoutDecision::Allowed);
        assert_eq!(tracker.check("dave").await.unwrap(), LockoutDecision::Allowed);
    }

    #[tokio::test]
    async fn test_stale_counter_resets() {
        let clock = ManualClock::new();
        let tracker = tracker(&clock);

        for _ in 0..4 {
            tracker.record_failure("erin").await.unwrap();
        }
        clock.advance(Duration::seconds(901));

        let state = tracker.record_failure("erin").await.unwrap();
        assert_eq!(state.count, 1);
        assert!(state.lockout_until.is_none());
    }

    #[tokio::test]
    async fn test_clear_removes_lockout() {
        let clock = ManualClock::new();
        let tracker = tracker(&clock);

        for _ in 0..5 {
            tracker.record_failure("frank").await.unwrap();
        }
        assert!(matches!(
            tracker.check("frank").await.unwrap(),
            LockoutDecision::Denied { .. }
        ));

        tracker.clear("FRANK").await.unwrap();
        assert_eq!(tracker.check("frank").await.unwrap(), LockoutDecision::Allowed);
    }

    #[tokio::test]
    async fn test_shared_store_lockout_and_purge() {
        let clock = ManualClock::new();
        let pool = db::test_pool().await;
        let tracker = LockoutTracker::new(
            Arc::new(SqlAttemptStore::new(pool.clone())),
            Arc::new(clock.clone()),
            &config(),
        );

        for _ in 0..5 {
            tracker.record_failure("bob").await.unwrap();
        }
        assert!(matches!(
            tracker.check("bob").await.unwrap(),
            LockoutDecision::Denied { .. }
        ));

        // A second tracker over the same table sees the same lockout
        let other = LockoutTracker::new(
            Arc::new(SqlAttemptStore::new(pool)),
            Arc::new(clock.clone()),
            &config(),
        );
        assert!(matches!(
            other.check("bob").await.unwrap(),
            LockoutDecision::Denied { .. }
        ));

        clock.advance(Duration::seconds(901));
        assert_eq!(tracker.check("bob").await.unwrap(), LockoutDecision::Allowed);
        assert_eq!(tracker.purge_stale().await.unwrap(), 1);
    }
}
