/// Row types for the portal database
use crate::error::PortalError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, FromRow, Row};
use std::str::FromStr;

/// Account role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = PortalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            _ => Err(PortalError::Validation(format!("Invalid role: {}", s))),
        }
    }
}

fn decode_role(row: &SqliteRow, column: &str) -> Result<Role, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|e: PortalError| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            e.to_string(),
        )),
    })
}

/// Account record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub full_name: String,
    /// Empty when the account registered without an email
    pub email: String,
    pub national_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, SqliteRow> for Account {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Account {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            password_hash: row.try_get("password_hash")?,
            role: decode_role(row, "role")?,
            full_name: row.try_get("full_name")?,
            email: row.try_get("email")?,
            national_id: row.try_get("national_id")?,
            created_at: row.try_get("created_at")?,
            last_login_at: row.try_get("last_login_at")?,
        })
    }
}

impl Account {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Back-office record of a vehicle's legal owner
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct OwnerRecord {
    pub id: i64,
    pub name: String,
    /// National identity number (e.g. Ghana Card)
    pub national_id: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub photo_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Registered vehicle
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: i64,
    pub registration_number: String,
    pub make: String,
    pub model: String,
    pub year: i64,
    pub color: String,
    pub chassis_number: String,
    pub engine_number: String,
    pub owner_id: i64,
    pub registration_date: NaiveDate,
    pub expiry_date: NaiveDate,
    pub certificate_path: Option<String>,
    pub qr_code_path: Option<String>,
    pub roadworthy_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Server-side session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    /// SHA-256 digest of the cookie token
    pub id: String,
    pub account_id: i64,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub created_ip: Option<String>,
    pub created_user_agent: Option<String>,
    pub last_ip: Option<String>,
    pub last_user_agent: Option<String>,
}

impl<'r> FromRow<'r, SqliteRow> for SessionRecord {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(SessionRecord {
            id: row.try_get("id")?,
            account_id: row.try_get("account_id")?,
            role: decode_role(row, "role")?,
            created_at: row.try_get("created_at")?,
            last_activity: row.try_get("last_activity")?,
            created_ip: row.try_get("created_ip")?,
            created_user_agent: row.try_get("created_user_agent")?,
            last_ip: row.try_get("last_ip")?,
            last_user_agent: row.try_get("last_user_agent")?,
        })
    }
}

/// Persistent "remember me" token; `id` is the token digest
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RememberToken {
    pub id: String,
    pub account_id: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Shared failed-login counter
#[derive(Debug, Clone, FromRow)]
pub struct LoginAttemptRow {
    pub identifier_hash: String,
    pub count: i64,
    pub last_attempt_at: DateTime<Utc>,
    pub lockout_until: Option<DateTime<Utc>>,
}

/// Persisted security event
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SecurityEventRecord {
    pub id: i64,
    pub kind: String,
    pub account_id: Option<i64>,
    pub session_id: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}
