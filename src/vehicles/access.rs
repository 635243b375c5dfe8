/// Vehicle access control
///
/// Admins may view any vehicle. Everyone else may view a vehicle only when
/// the owner record resolved for their account owns it. A regular account
/// never learns whether a vehicle it may not see exists.
use super::{Vehicle, VehicleRepository};
use crate::{
    account::Account,
    error::{PortalError, PortalResult},
    metrics,
    owners::OwnerRecord,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of an access check
#[derive(Debug, Clone, PartialEq)]
pub enum VehicleAccess {
    Allowed(Vehicle),
    /// Only reported to admins
    NotFound,
    Denied,
}

impl VehicleAccess {
    fn label(&self) -> &'static str {
        match self {
            VehicleAccess::Allowed(_) => "allowed",
            VehicleAccess::NotFound => "not_found",
            VehicleAccess::Denied => "denied",
        }
    }

    /// Allowed vehicle, or the error to show the caller
    pub fn into_result(self) -> PortalResult<Vehicle> {
        match self {
            VehicleAccess::Allowed(vehicle) => Ok(vehicle),
            VehicleAccess::NotFound => Err(PortalError::NotFound("Vehicle not found".to_string())),
            VehicleAccess::Denied => Err(PortalError::AccessDenied),
        }
    }
}

/// Access decision for an already loaded (or missing) vehicle
pub fn decide(
    account: &Account,
    owner: Option<&OwnerRecord>,
    vehicle: Option<Vehicle>,
) -> VehicleAccess {
    match vehicle {
        None if account.is_admin() => VehicleAccess::NotFound,
        None => VehicleAccess::Denied,
        Some(vehicle) if account.is_admin() => VehicleAccess::Allowed(vehicle),
        Some(vehicle) => match owner {
            Some(owner) if owner.id == vehicle.owner_id => VehicleAccess::Allowed(vehicle),
            _ => VehicleAccess::Denied,
        },
    }
}

pub struct VehicleAuthorizer {
    vehicles: Arc<VehicleRepository>,
}

impl VehicleAuthorizer {
    pub fn new(vehicles: Arc<VehicleRepository>) -> Self {
        Self { vehicles }
    }

    /// Load `vehicle_id` and decide whether `account` may see it.
    ///
    /// `owner` is the record the resolver linked to `account`, if any.
    pub async fn authorize_vehicle_access(
        &self,
        account: &Account,
        owner: Option<&OwnerRecord>,
        vehicle_id: i64,
    ) -> PortalResult<VehicleAccess> {
        let vehicle = self.vehicles.get(vehicle_id).await?;
        let access = decide(account, owner, vehicle);

        metrics::record_vehicle_access(access.label());
        match &access {
            VehicleAccess::Denied => warn!(
                account_id = account.id,
                vehicle_id,
                owner_id = ?owner.map(|o| o.id),
                "vehicle access denied"
            ),
            _ => debug!(
                account_id = account.id,
                vehicle_id,
                decision = access.label(),
                "vehicle access decided"
            ),
        }

        Ok(access)
    }
}
