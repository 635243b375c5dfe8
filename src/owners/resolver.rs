/// Owner reconciliation
///
/// Maps an account to at most one owner record. Rules are tried in priority
/// order and the first one with a candidate wins:
///
/// 1. national id, when the account has one
/// 2. email, when the account has one
/// 3. full name
///
/// Comparisons are case-insensitive on trimmed values. SQLite's `lower()`
/// folds ASCII only, so non-ASCII letters must match case exactly.
use super::{repository::OWNER_COLUMNS, OwnerRecord};
use crate::{account::Account, error::PortalResult, metrics};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, warn};

/// Rule that produced a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchRule {
    NationalId,
    Email,
    Name,
}

impl MatchRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchRule::NationalId => "national_id",
            MatchRule::Email => "email",
            MatchRule::Name => "name",
        }
    }

    fn column(&self) -> &'static str {
        match self {
            MatchRule::NationalId => "national_id",
            MatchRule::Email => "email",
            MatchRule::Name => "name",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OwnerMatch {
    pub owner: OwnerRecord,
    pub rule: MatchRule,
}

pub struct OwnerResolver {
    db: SqlitePool,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

impl OwnerResolver {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Owner record for `account`, or `None` when the account is unlinked
    pub async fn resolve_owner(&self, account: &Account) -> PortalResult<Option<OwnerRecord>> {
        Ok(self.resolve_match(account).await?.map(|m| m.owner))
    }

    /// Like `resolve_owner`, also reporting which rule matched.
    ///
    /// Queries the store on every call; results are never cached.
    pub async fn resolve_match(&self, account: &Account) -> PortalResult<Option<OwnerMatch>> {
        let rules = [
            (MatchRule::NationalId, non_empty(account.national_id.as_deref())),
            (MatchRule::Email, non_empty(Some(account.email.as_str()))),
            (MatchRule::Name, non_empty(Some(account.full_name.as_str()))),
        ];

        for (rule, value) in rules {
            let Some(value) = value else {
                continue;
            };

            let candidates = self.candidates(rule, value).await?;
            let count = candidates.len();
            let Some(owner) = candidates.into_iter().next() else {
                continue;
            };

            if count > 1 {
                warn!(
                    account_id = account.id,
                    rule = rule.as_str(),
                    candidates = count,
                    owner_id = owner.id,
                    "ambiguous owner match, using lowest id"
                );
            }

            debug!(
                account_id = account.id,
                owner_id = owner.id,
                rule = rule.as_str(),
                "account linked to owner"
            );
            metrics::record_owner_resolution(rule.as_str());
            return Ok(Some(OwnerMatch { owner, rule }));
        }

        debug!(account_id = account.id, "account not linked to any owner");
        metrics::record_owner_resolution("unlinked");
        Ok(None)
    }

    async fn candidates(&self, rule: MatchRule, value: &str) -> PortalResult<Vec<OwnerRecord>> {
        let query = format!(
            "SELECT {columns} FROM vehicle_owner \
             WHERE {column} IS NOT NULL AND lower(trim({column})) = lower(?1) \
             ORDER BY id",
            columns = OWNER_COLUMNS,
            column = rule.column(),
        );

        let owners = sqlx::query_as::<_, OwnerRecord>(&query)
            .bind(value)
            .fetch_all(&self.db)
            .await?;
        Ok(owners)
    }
}
