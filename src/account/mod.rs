/// Account management system
///
/// Handles account registration, credential verification and password changes.

mod manager;
pub mod password;

pub use crate::db::models::{Account, Role};
pub use manager::AccountManager;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Login form the request arrived through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    #[default]
    User,
    Admin,
}

impl Channel {
    /// Role an account must hold to sign in through this channel
    pub fn required_role(&self) -> Role {
        match self {
            Channel::User => Role::User,
            Channel::Admin => Role::Admin,
        }
    }
}

/// Why a login was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginRejection {
    /// Unknown username or wrong password; the two are never told apart
    BadCredentials,
    /// Correct credentials submitted through the other role's login form
    WrongChannel { channel: Channel },
}

impl LoginRejection {
    pub fn message(&self) -> &'static str {
        match self {
            LoginRejection::BadCredentials => "Invalid username or password",
            LoginRejection::WrongChannel {
                channel: Channel::Admin,
            } => "This account is not an administrator account. Please use the user login",
            LoginRejection::WrongChannel {
                channel: Channel::User,
            } => "Administrator accounts must sign in through the admin login",
        }
    }
}

/// Credential verification result
#[derive(Debug, Clone)]
pub enum LoginOutcome {
    Authenticated(Account),
    Rejected(LoginRejection),
}

/// Data for a new account
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub password: String,
    pub role: Role,
    pub full_name: String,
    pub email: Option<String>,
    pub national_id: Option<String>,
}

/// Login request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 64))]
    pub username: String,
    #[validate(length(min = 1, max = 256))]
    pub password: String,
    #[serde(default)]
    pub channel: Channel,
    #[serde(default)]
    pub remember: bool,
}

/// Self-service registration request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 3, max = 32))]
    pub username: String,
    #[validate(length(min = 8, max = 256))]
    pub password: String,
    #[validate(length(min = 2, max = 120))]
    pub full_name: String,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(min = 4, max = 32))]
    pub national_id: Option<String>,
}

/// Password change request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, max = 256))]
    pub current_password: String,
    #[validate(length(min = 8, max = 256))]
    pub new_password: String,
}

/// Account as shown to its owner
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    pub id: i64,
    pub username: String,
    pub role: Role,
    pub full_name: String,
    pub email: Option<String>,
    pub national_id: Option<String>,
    pub last_login_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<&Account> for AccountSummary {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            username: account.username.clone(),
            role: account.role,
            full_name: account.full_name.clone(),
            email: Some(account.email.clone()).filter(|email| !email.is_empty()),
            national_id: account.national_id.clone(),
            last_login_at: account.last_login_at,
        }
    }
}
