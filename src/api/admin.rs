/// Back-office endpoints (admin role only)
use crate::{
    account::Role,
    auth::AdminContext,
    context::AppContext,
    db::models::SecurityEventRecord,
    error::{PortalError, PortalResult},
    owners::{NewOwner, OwnerRecord},
    vehicles::{NewVehicle, VehicleView, EXPIRY_WARNING_DAYS},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/admin/stats", get(stats))
        .route("/admin/owners", get(list_owners).post(create_owner))
        .route("/admin/owners/:id", get(owner_detail))
        .route("/admin/vehicles", post(create_vehicle))
        .route("/admin/security-events", get(security_events))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalStats {
    pub accounts: i64,
    pub admins: i64,
    pub owners: i64,
    pub vehicles: i64,
    pub expired_registrations: i64,
    pub expiring_soon: i64,
    pub active_sessions: i64,
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

impl PageParams {
    fn clamped(&self) -> (i64, i64) {
        (self.limit.clamp(1, 200), self.offset.max(0))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerPage {
    pub owners: Vec<OwnerRecord>,
    pub total: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerDetail {
    pub owner: OwnerRecord,
    pub vehicles: Vec<VehicleView>,
}

async fn stats(State(ctx): State<AppContext>, _admin: AdminContext) -> PortalResult<Json<PortalStats>> {
    let today = ctx.today();
    let users = ctx.account_manager.count_by_role(Role::User).await?;
    let admins = ctx.account_manager.count_by_role(Role::Admin).await?;

    Ok(Json(PortalStats {
        accounts: users + admins,
        admins,
        owners: ctx.owners.count().await?,
        vehicles: ctx.vehicles.count().await?,
        expired_registrations: ctx.vehicles.count_expired(today).await?,
        expiring_soon: ctx
            .vehicles
            .expiring_within(today, EXPIRY_WARNING_DAYS)
            .await?
            .len() as i64,
        active_sessions: ctx.session_manager.count_active().await?,
    }))
}

async fn list_owners(
    State(ctx): State<AppContext>,
    _admin: AdminContext,
    Query(page): Query<PageParams>,
) -> PortalResult<Json<OwnerPage>> {
    let (limit, offset) = page.clamped();
    Ok(Json(OwnerPage {
        owners: ctx.owners.list(limit, offset).await?,
        total: ctx.owners.count().await?,
    }))
}

/// One owner record with every vehicle registered to it
async fn owner_detail(
    State(ctx): State<AppContext>,
    _admin: AdminContext,
    Path(id): Path<i64>,
) -> PortalResult<Json<OwnerDetail>> {
    let owner = ctx
        .owners
        .get(id)
        .await?
        .ok_or_else(|| PortalError::NotFound("Owner not found".to_string()))?;

    let today = ctx.today();
    let vehicles = ctx
        .vehicles
        .list_for_owner(owner.id)
        .await?
        .into_iter()
        .map(|vehicle| VehicleView::new(vehicle, today))
        .collect();

    Ok(Json(OwnerDetail { owner, vehicles }))
}

async fn create_owner(
    State(ctx): State<AppContext>,
    admin: AdminContext,
    Json(req): Json<NewOwner>,
) -> PortalResult<(StatusCode, Json<OwnerRecord>)> {
    req.validate()?;
    let owner = ctx.owners.create(req).await?;
    tracing::info!(admin_id = admin.account().id, owner_id = owner.id, "owner created by admin");
    Ok((StatusCode::CREATED, Json(owner)))
}

async fn create_vehicle(
    State(ctx): State<AppContext>,
    admin: AdminContext,
    Json(req): Json<NewVehicle>,
) -> PortalResult<(StatusCode, Json<VehicleView>)> {
    req.validate()?;
    let vehicle = ctx.vehicles.create(req).await?;
    tracing::info!(
        admin_id = admin.account().id,
        vehicle_id = vehicle.id,
        "vehicle registered by admin"
    );
    Ok((StatusCode::CREATED, Json(VehicleView::new(vehicle, ctx.today()))))
}

async fn security_events(
    State(ctx): State<AppContext>,
    _admin: AdminContext,
    Query(page): Query<PageParams>,
) -> PortalResult<Json<Vec<SecurityEventRecord>>> {
    let (limit, offset) = page.clamped();
    Ok(Json(ctx.events.recent(limit, offset).await?))
}
