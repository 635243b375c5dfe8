/// Account manager: registration, credential verification, password changes
use crate::{
    account::{password, Account, Channel, LoginOutcome, LoginRejection, NewAccount, Role},
    clock::SharedClock,
    error::{PortalError, PortalResult},
    rate_limit::LockoutTracker,
};
use sqlx::SqlitePool;
use std::sync::Arc;
use validator::ValidateEmail;
use tracing::{debug, info, warn};

const ACCOUNT_COLUMNS: &str = "id, username, password_hash, role, full_name, email, national_id, created_at, last_login_at";

/// Account manager service
pub struct AccountManager {
    db: SqlitePool,
    clock: SharedClock,
    lockout: Arc<LockoutTracker>,
}

impl AccountManager {
    /// Create a new account manager
    pub fn new(db: SqlitePool, clock: SharedClock, lockout: Arc<LockoutTracker>) -> Self {
        Self { db, clock, lockout }
    }

    /// Create a new account
    pub async fn create_account(&self, new: NewAccount) -> PortalResult<Account> {
        let username = new.username.trim().to_string();
        self.validate_username(&username)?;

        let email = new
            .email
            .map(|email| email.trim().to_string())
            .unwrap_or_default();
        if !email.is_empty() {
            self.check_email(&email)?;
        }
        let national_id = new
            .national_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());

        if self.username_exists(&username).await? {
            return Err(PortalError::Conflict(format!(
                "Username {} already taken",
                username
            )));
        }

        if !email.is_empty() && self.email_exists(&email).await? {
            return Err(PortalError::Conflict("Email already registered".to_string()));
        }

        let password_hash = password::hash_password(&new.password)?;
        let now = self.clock.now();

        let result = sqlx::query(
            "INSERT INTO account (username, password_hash, role, full_name, email, national_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&username)
        .bind(&password_hash)
        .bind(new.role.as_str())
        .bind(new.full_name.trim())
        .bind(&email)
        .bind(&national_id)
        .bind(now)
        .execute(&self.db)
        .await?;

        info!(username = %username, role = new.role.as_str(), "account created");

        Ok(Account {
            id: result.last_insert_rowid(),
            username,
            password_hash,
            role: new.role,
            full_name: new.full_name.trim().to_string(),
            email,
            national_id,
            created_at: now,
            last_login_at: None,
        })
    }

    /// Verify credentials submitted through a login channel.
    ///
    /// Failures of either kind count towards the lockout for `username`;
    /// success clears it and refreshes the last-login timestamp.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        channel: Channel,
    ) -> PortalResult<LoginOutcome> {
        let account = match self.get_account_by_username(username.trim()).await? {
            Some(account) => account,
            None => {
                password::verify_dummy(password);
                self.lockout.record_failure(username).await?;
                debug!("login rejected: unknown username");
                return Ok(LoginOutcome::Rejected(LoginRejection::BadCredentials));
            }
        };

        if !password::verify_password(password, &account.password_hash)? {
            self.lockout.record_failure(username).await?;
            debug!(account_id = account.id, "login rejected: wrong password");
            return Ok(LoginOutcome::Rejected(LoginRejection::BadCredentials));
        }

        if account.role != channel.required_role() {
            self.lockout.record_failure(username).await?;
            warn!(
                account_id = account.id,
                role = account.role.as_str(),
                "login rejected: wrong channel for role"
            );
            return Ok(LoginOutcome::Rejected(LoginRejection::WrongChannel { channel }));
        }

        self.lockout.clear(username).await?;

        let now = self.clock.now();
        sqlx::query("UPDATE account SET last_login_at = ?1 WHERE id = ?2")
            .bind(now)
            .bind(account.id)
            .execute(&self.db)
            .await?;

        Ok(LoginOutcome::Authenticated(Account {
            last_login_at: Some(now),
            ..account
        }))
    }

    /// Change password after re-verifying the current one
    pub async fn change_password(
        &self,
        account: &Account,
        current_password: &str,
        new_password: &str,
    ) -> PortalResult<()> {
        // Re-read the hash; the caller's copy may predate another change
        let stored = self.get_account(account.id).await?;
        if !password::verify_password(current_password, &stored.password_hash)? {
            return Err(PortalError::Authentication(
                "Current password is incorrect".to_string(),
            ));
        }

        let password_hash = password::hash_password(new_password)?;
        sqlx::query("UPDATE account SET password_hash = ?1 WHERE id = ?2")
            .bind(&password_hash)
            .bind(account.id)
            .execute(&self.db)
            .await?;

        info!(account_id = account.id, "password changed");
        Ok(())
    }

    /// Get account by id
    pub async fn get_account(&self, id: i64) -> PortalResult<Account> {
        let query = format!("SELECT {} FROM account WHERE id = ?1", ACCOUNT_COLUMNS);
        sqlx::query_as::<_, Account>(&query)
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| PortalError::NotFound("Account not found".to_string()))
    }

    /// Get account by exact username
    pub async fn get_account_by_username(&self, username: &str) -> PortalResult<Option<Account>> {
        let query = format!("SELECT {} FROM account WHERE username = ?1", ACCOUNT_COLUMNS);
        let account = sqlx::query_as::<_, Account>(&query)
            .bind(username)
            .fetch_optional(&self.db)
            .await?;

        Ok(account)
    }

    /// Create the configured admin account if it does not exist yet
    pub async fn ensure_admin(
        &self,
        username: &str,
        password: &str,
        full_name: &str,
        email: &str,
    ) -> PortalResult<()> {
        if self.get_account_by_username(username).await?.is_some() {
            debug!(username, "bootstrap admin already present");
            return Ok(());
        }

        self.create_account(NewAccount {
            username: username.to_string(),
            password: password.to_string(),
            role: Role::Admin,
            full_name: full_name.to_string(),
            email: Some(email.to_string()),
            national_id: None,
        })
        .await?;

        info!(username, "bootstrap admin account created");
        Ok(())
    }

    /// Number of accounts with a role
    pub async fn count_by_role(&self, role: Role) -> PortalResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM account WHERE role = ?1")
            .bind(role.as_str())
            .fetch_one(&self.db)
            .await?;

        Ok(count)
    }

    async fn username_exists(&self, username: &str) -> PortalResult<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM account WHERE username = ?1")
            .bind(username)
            .fetch_one(&self.db)
            .await?;

        Ok(count > 0)
    }

    async fn email_exists(&self, email: &str) -> PortalResult<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM account WHERE lower(email) = lower(?1)")
                .bind(email)
                .fetch_one(&self.db)
                .await?;

        Ok(count > 0)
    }

    /// Letters, digits, dot, dash and underscore; 3 to 32 characters
    fn validate_username(&self, username: &str) -> PortalResult<()> {
        if username.len() < 3 || username.len() > 32 {
            return Err(PortalError::Validation(
                "Username must be 3 to 32 characters".to_string(),
            ));
        }

        if !username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        {
            return Err(PortalError::Validation(
                "Username may only contain letters, digits, '.', '-' and '_'".to_string(),
            ));
        }

        Ok(())
    }

    fn check_email(&self, email: &str) -> PortalResult<()> {
        if email.validate_email() {
            Ok(())
        } else {
            Err(PortalError::Validation("Invalid email address".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        config::ServerConfig,
        db,
        rate_limit::{LockoutDecision, MemoryAttemptStore},
    };

    async fn manager() -> AccountManager {
        let pool = db::test_pool().await;
        let clock: SharedClock = Arc::new(ManualClock::new());
        let lockout = Arc::new(LockoutTracker::new(
            Arc::new(MemoryAttemptStore::new()),
            clock.clone(),
            &ServerConfig::default().lockout,
        ));
        AccountManager::new(pool, clock, lockout)
    }

    fn new_account(username: &str, role: Role) -> NewAccount {
        NewAccount {
            username: username.to_string(),
            password: "s3cret-pass".to_string(),
            role,
            full_name: "Jane Doe".to_string(),
            email: Some(format!("{}@example.com", username)),
            national_id: None,
        }
    }

    #[tokio::test]
    async fn test_login_success_and_bad_password() {
        let manager = manager().await;
        manager.create_account(new_account("jane", Role::User)).await.unwrap();

        match manager.login("jane", "s3cret-pass", Channel::User).await.unwrap() {
            LoginOutcome::Authenticated(account) => {
                assert_eq!(account.username, "jane");
                assert!(account.last_login_at.is_some());
            }
            LoginOutcome::Rejected(reason) => panic!("unexpected rejection: {:?}", reason),
        }

        assert!(matches!(
            manager.login("jane", "wrong", Channel::User).await.unwrap(),
            LoginOutcome::Rejected(LoginRejection::BadCredentials)
        ));
        assert!(matches!(
            manager.login("nobody", "wrong", Channel::User).await.unwrap(),
            LoginOutcome::Rejected(LoginRejection::BadCredentials)
        ));
    }

    #[tokio::test]
    async fn test_admin_on_user_channel_is_wrong_channel() {
        let manager = manager().await;
        manager.create_account(new_account("root", Role::Admin)).await.unwrap();

        assert!(matches!(
            manager.login("root", "s3cret-pass", Channel::User).await.unwrap(),
            LoginOutcome::Rejected(LoginRejection::WrongChannel {
                channel: Channel::User
            })
        ));
        assert!(matches!(
            manager.login("root", "s3cret-pass", Channel::Admin).await.unwrap(),
            LoginOutcome::Authenticated(_)
        ));
    }

    #[tokio::test]
    async fn test_failures_feed_lockout_and_success_clears() {
        let manager = manager().await;
        manager.create_account(new_account("bob", Role::User)).await.unwrap();

        for _ in 0..4 {
            manager.login("bob", "nope", Channel::User).await.unwrap();
        }
        manager.login("bob", "s3cret-pass", Channel::User).await.unwrap();
        manager.login("bob", "nope", Channel::User).await.unwrap();

        // Success reset the counter, so one failure is far from the limit
        assert_eq!(
            manager.lockout.check("bob").await.unwrap(),
            LockoutDecision::Allowed
        );
    }

    #[tokio::test]
    async fn test_duplicate_username_and_email_conflict() {
        let manager = manager().await;
        manager.create_account(new_account("jane", Role::User)).await.unwrap();

        let err = manager
            .create_account(new_account("jane", Role::User))
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::Conflict(_)));

        let mut other = new_account("jane2", Role::User);
        other.email = Some("JANE@example.com".to_string());
        let err = manager.create_account(other).await.unwrap_err();
        assert!(matches!(err, PortalError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_invalid_username_rejected() {
        let manager = manager().await;
        let err = manager
            .create_account(new_account("jane doe", Role::User))
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::Validation(_)));
    }

    #[tokio::test]
    async fn test_malformed_email_rejected() {
        let manager = manager().await;
        for email in ["a@b@c.d", "x@.", "no-at-sign.com"] {
            let err = manager
                .ensure_admin("root", "admin-pass-1", "Root", email)
                .await
                .unwrap_err();
            assert!(matches!(err, PortalError::Validation(_)), "{email}");
        }
        assert_eq!(manager.count_by_role(Role::Admin).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_change_password() {
        let manager = manager().await;
        let account = manager.create_account(new_account("jane", Role::User)).await.unwrap();

        let err = manager
            .change_password(&account, "wrong", "another-pass")
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::Authentication(_)));

        manager
            .change_password(&account, "s3cret-pass", "another-pass")
            .await
            .unwrap();
        assert!(matches!(
            manager.login("jane", "another-pass", Channel::User).await.unwrap(),
            LoginOutcome::Authenticated(_)
        ));
    }

    #[tokio::test]
    async fn test_ensure_admin_is_idempotent() {
        let manager = manager().await;
        manager
            .ensure_admin("root", "admin-pass-1", "Root", "root@example.com")
            .await
            .unwrap();
        manager
            .ensure_admin("root", "admin-pass-1", "Root", "root@example.com")
            .await
            .unwrap();

        assert_eq!(manager.count_by_role(Role::Admin).await.unwrap(), 1);
    }
}
