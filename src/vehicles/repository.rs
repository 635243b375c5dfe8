/// Vehicle storage and search
use super::{NewVehicle, Vehicle};
use crate::{
    clock::SharedClock,
    error::{PortalError, PortalResult},
};
use chrono::{Duration, NaiveDate};
use sqlx::SqlitePool;
use tracing::info;

const VEHICLE_COLUMNS: &str = "id, registration_number, make, model, year, color, chassis_number, engine_number, owner_id, registration_date, expiry_date, certificate_path, qr_code_path, roadworthy_path, created_at";

pub struct VehicleRepository {
    db: SqlitePool,
    clock: SharedClock,
}

/// Escape LIKE wildcards so user input only matches literally
fn like_pattern(term: &str) -> String {
    let escaped = term
        .trim()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

impl VehicleRepository {
    pub fn new(db: SqlitePool, clock: SharedClock) -> Self {
        Self { db, clock }
    }

    pub async fn get(&self, id: i64) -> PortalResult<Option<Vehicle>> {
        let query = format!("SELECT {} FROM vehicle WHERE id = ?1", VEHICLE_COLUMNS);
        let vehicle = sqlx::query_as::<_, Vehicle>(&query)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(vehicle)
    }

    pub async fn list_for_owner(&self, owner_id: i64) -> PortalResult<Vec<Vehicle>> {
        let query = format!(
            "SELECT {} FROM vehicle WHERE owner_id = ?1 ORDER BY expiry_date, id",
            VEHICLE_COLUMNS
        );
        let vehicles = sqlx::query_as::<_, Vehicle>(&query)
            .bind(owner_id)
            .fetch_all(&self.db)
            .await?;
        Ok(vehicles)
    }

    /// Match registration number, chassis number, make or model.
    ///
    /// `owner_filter` restricts results to one owner's vehicles; an empty
    /// term lists everything the filter allows.
    pub async fn search(
        &self,
        term: &str,
        owner_filter: Option<i64>,
        limit: i64,
    ) -> PortalResult<Vec<Vehicle>> {
        let query = format!(
            r#"
            SELECT {} FROM vehicle
            WHERE (registration_number LIKE ?1 ESCAPE '\'
                OR chassis_number LIKE ?1 ESCAPE '\'
                OR make LIKE ?1 ESCAPE '\'
                OR model LIKE ?1 ESCAPE '\')
              AND (?2 IS NULL OR owner_id = ?2)
            ORDER BY registration_number
            LIMIT ?3
            "#,
            VEHICLE_COLUMNS
        );

        let vehicles = sqlx::query_as::<_, Vehicle>(&query)
            .bind(like_pattern(term))
            .bind(owner_filter)
            .bind(limit)
            .fetch_all(&self.db)
            .await?;
        Ok(vehicles)
    }

    pub async fn create(&self, new: NewVehicle) -> PortalResult<Vehicle> {
        if new.expiry_date < new.registration_date {
            return Err(PortalError::Validation(
                "Expiry date must not precede the registration date".to_string(),
            ));
        }

        let owner_exists: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM vehicle_owner WHERE id = ?1")
                .bind(new.owner_id)
                .fetch_one(&self.db)
                .await?;
        if owner_exists == 0 {
            return Err(PortalError::Validation(format!(
                "Owner {} does not exist",
                new.owner_id
            )));
        }

        let registration_number = new.registration_number.trim().to_uppercase();
        let chassis_number = new.chassis_number.trim().to_uppercase();

        let duplicates: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM vehicle WHERE registration_number = ?1 OR chassis_number = ?2",
        )
        .bind(&registration_number)
        .bind(&chassis_number)
        .fetch_one(&self.db)
        .await?;
        if duplicates > 0 {
            return Err(PortalError::Conflict(
                "Registration or chassis number already registered".to_string(),
            ));
        }

        let vehicle = Vehicle {
            id: 0,
            registration_number,
            make: new.make.trim().to_string(),
            model: new.model.trim().to_string(),
            year: new.year,
            color: new.color.trim().to_string(),
            chassis_number,
            engine_number: new.engine_number.trim().to_string(),
            owner_id: new.owner_id,
            registration_date: new.registration_date,
            expiry_date: new.expiry_date,
            certificate_path: new.certificate_path,
            qr_code_path: new.qr_code_path,
            roadworthy_path: new.roadworthy_path,
            created_at: self.clock.now(),
        };

        let result = sqlx::query(
            r#"
            INSERT INTO vehicle (registration_number, make, model, year, color, chassis_number,
                                 engine_number, owner_id, registration_date, expiry_date,
                                 certificate_path, qr_code_path, roadworthy_path, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )
        .bind(&vehicle.registration_number)
        .bind(&vehicle.make)
        .bind(&vehicle.model)
        .bind(vehicle.year)
        .bind(&vehicle.color)
        .bind(&vehicle.chassis_number)
        .bind(&vehicle.engine_number)
        .bind(vehicle.owner_id)
        .bind(vehicle.registration_date)
        .bind(vehicle.expiry_date)
        .bind(&vehicle.certificate_path)
        .bind(&vehicle.qr_code_path)
        .bind(&vehicle.roadworthy_path)
        .bind(vehicle.created_at)
        .execute(&self.db)
        .await?;

        let vehicle = Vehicle {
            id: result.last_insert_rowid(),
            ..vehicle
        };
        info!(
            vehicle_id = vehicle.id,
            owner_id = vehicle.owner_id,
            "vehicle registered"
        );
        Ok(vehicle)
    }

    pub async fn count(&self) -> PortalResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vehicle")
            .fetch_one(&self.db)
            .await?;
        Ok(count)
    }

    /// Vehicles whose registration expires between `today` and `today + days`
    pub async fn expiring_within(&self, today: NaiveDate, days: i64) -> PortalResult<Vec<Vehicle>> {
        let query = format!(
            "SELECT {} FROM vehicle WHERE expiry_date >= ?1 AND expiry_date <= ?2 ORDER BY expiry_date, id",
            VEHICLE_COLUMNS
        );
        let vehicles = sqlx::query_as::<_, Vehicle>(&query)
            .bind(today)
            .bind(today + Duration::days(days))
            .fetch_all(&self.db)
            .await?;
        Ok(vehicles)
    }

    pub async fn count_expired(&self, today: NaiveDate) -> PortalResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vehicle WHERE expiry_date < ?1")
            .bind(today)
            .fetch_one(&self.db)
            .await?;
        Ok(count)
    }
}
