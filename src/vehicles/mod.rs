/// Vehicle records, registration status and access control
mod access;
mod repository;

pub use crate::db::models::Vehicle;
pub use access::{VehicleAccess, VehicleAuthorizer};
pub use repository::VehicleRepository;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Days before expiry at which a registration counts as expiring soon
pub const EXPIRY_WARNING_DAYS: i64 = 30;

/// Back-office data entry for a new vehicle
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct NewVehicle {
    #[validate(length(min = 2, max = 20))]
    pub registration_number: String,
    #[validate(length(min = 1, max = 60))]
    pub make: String,
    #[validate(length(min = 1, max = 60))]
    pub model: String,
    #[validate(range(min = 1900, max = 2100))]
    pub year: i64,
    #[validate(length(min = 1, max = 30))]
    pub color: String,
    #[validate(length(min = 5, max = 30))]
    pub chassis_number: String,
    #[validate(length(min = 3, max = 30))]
    pub engine_number: String,
    pub owner_id: i64,
    pub registration_date: NaiveDate,
    pub expiry_date: NaiveDate,
    pub certificate_path: Option<String>,
    pub qr_code_path: Option<String>,
    pub roadworthy_path: Option<String>,
}

/// Registration state derived from the expiry date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    Active,
    ExpiringSoon,
    Expired,
}

impl RegistrationStatus {
    pub fn from_expiry(expiry_date: NaiveDate, today: NaiveDate) -> Self {
        let remaining = (expiry_date - today).num_days();
        if remaining < 0 {
            RegistrationStatus::Expired
        } else if remaining <= EXPIRY_WARNING_DAYS {
            RegistrationStatus::ExpiringSoon
        } else {
            RegistrationStatus::Active
        }
    }
}

/// Whether a generated document exists for a vehicle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ArtifactStatus {
    Present { path: String },
    Absent,
}

impl From<Option<&String>> for ArtifactStatus {
    fn from(path: Option<&String>) -> Self {
        match path {
            Some(path) if !path.trim().is_empty() => ArtifactStatus::Present { path: path.clone() },
            _ => ArtifactStatus::Absent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleArtifacts {
    pub certificate: ArtifactStatus,
    pub qr_code: ArtifactStatus,
    pub roadworthy: ArtifactStatus,
}

impl From<&Vehicle> for VehicleArtifacts {
    fn from(vehicle: &Vehicle) -> Self {
        Self {
            certificate: vehicle.certificate_path.as_ref().into(),
            qr_code: vehicle.qr_code_path.as_ref().into(),
            roadworthy: vehicle.roadworthy_path.as_ref().into(),
        }
    }
}

/// Vehicle as returned by the API
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleView {
    #[serde(flatten)]
    pub vehicle: Vehicle,
    pub status: RegistrationStatus,
    pub days_until_expiry: i64,
}

impl VehicleView {
    pub fn new(vehicle: Vehicle, today: NaiveDate) -> Self {
        Self {
            status: RegistrationStatus::from_expiry(vehicle.expiry_date, today),
            days_until_expiry: (vehicle.expiry_date - today).num_days(),
            vehicle,
        }
    }
}
