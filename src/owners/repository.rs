/// Owner record storage
use super::{NewOwner, OwnerRecord};
use crate::{
    clock::SharedClock,
    error::{PortalError, PortalResult},
};
use sqlx::SqlitePool;
use tracing::info;

pub(super) const OWNER_COLUMNS: &str =
    "id, name, national_id, phone, email, address, photo_path, created_at";

pub struct OwnerRepository {
    db: SqlitePool,
    clock: SharedClock,
}

/// Trim and drop empty optional fields
fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl OwnerRepository {
    pub fn new(db: SqlitePool, clock: SharedClock) -> Self {
        Self { db, clock }
    }

    pub async fn get(&self, id: i64) -> PortalResult<Option<OwnerRecord>> {
        let query = format!("SELECT {} FROM vehicle_owner WHERE id = ?1", OWNER_COLUMNS);
        let owner = sqlx::query_as::<_, OwnerRecord>(&query)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(owner)
    }

    pub async fn create(&self, new: NewOwner) -> PortalResult<OwnerRecord> {
        let name = new.name.trim().to_string();
        if name.is_empty() {
            return Err(PortalError::Validation("Owner name is required".to_string()));
        }

        let owner = OwnerRecord {
            id: 0,
            name,
            national_id: clean(new.national_id),
            phone: clean(new.phone),
            email: clean(new.email),
            address: clean(new.address),
            photo_path: clean(new.photo_path),
            created_at: self.clock.now(),
        };

        let result = sqlx::query(
            r#"
            INSERT INTO vehicle_owner (name, national_id, phone, email, address, photo_path, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&owner.name)
        .bind(&owner.national_id)
        .bind(&owner.phone)
        .bind(&owner.email)
        .bind(&owner.address)
        .bind(&owner.photo_path)
        .bind(owner.created_at)
        .execute(&self.db)
        .await?;

        let owner = OwnerRecord {
            id: result.last_insert_rowid(),
            ..owner
        };
        info!(owner_id = owner.id, "owner record created");
        Ok(owner)
    }

    /// Page through owners by id
    pub async fn list(&self, limit: i64, offset: i64) -> PortalResult<Vec<OwnerRecord>> {
        let query = format!(
            "SELECT {} FROM vehicle_owner ORDER BY id LIMIT ?1 OFFSET ?2",
            OWNER_COLUMNS
        );
        let owners = sqlx::query_as::<_, OwnerRecord>(&query)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.db)
            .await?;
        Ok(owners)
    }

    pub async fn count(&self) -> PortalResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vehicle_owner")
            .fetch_one(&self.db)
            .await?;
        Ok(count)
    }
}
