/// Vehicle lookup endpoints
///
/// Every single-vehicle read goes through the authorizer. Lists for regular
/// accounts are restricted to the owner record their account resolves to.
use crate::{
    context::AppContext,
    error::PortalResult,
    owners::OwnerRecord,
    session::SessionContext,
    vehicles::{Vehicle, VehicleArtifacts, VehicleView},
};
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

const SEARCH_LIMIT: i64 = 100;

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/vehicles", get(list_vehicles))
        .route("/vehicles/:id", get(get_vehicle))
        .route("/vehicles/:id/artifacts", get(get_artifacts))
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleList {
    pub vehicles: Vec<VehicleView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactsResponse {
    pub vehicle_id: i64,
    pub registration_number: String,
    pub artifacts: VehicleArtifacts,
}

async fn list_vehicles(
    State(ctx): State<AppContext>,
    session: SessionContext,
    Query(params): Query<SearchParams>,
) -> PortalResult<Json<VehicleList>> {
    let owner_filter = if session.account.is_admin() {
        None
    } else {
        match ctx.owner_resolver.resolve_owner(&session.account).await? {
            Some(owner) => Some(owner.id),
            None => return Ok(Json(VehicleList { vehicles: Vec::new() })),
        }
    };

    let today = ctx.today();
    let vehicles = ctx
        .vehicles
        .search(&params.q, owner_filter, SEARCH_LIMIT)
        .await?
        .into_iter()
        .map(|vehicle| VehicleView::new(vehicle, today))
        .collect();

    Ok(Json(VehicleList { vehicles }))
}

/// Resolve the caller's owner and run the access check
async fn authorized_vehicle(
    ctx: &AppContext,
    session: &SessionContext,
    vehicle_id: i64,
) -> PortalResult<Vehicle> {
    let owner: Option<OwnerRecord> = if session.account.is_admin() {
        None
    } else {
        ctx.owner_resolver.resolve_owner(&session.account).await?
    };

    ctx.authorizer
        .authorize_vehicle_access(&session.account, owner.as_ref(), vehicle_id)
        .await?
        .into_result()
}

async fn get_vehicle(
    State(ctx): State<AppContext>,
    session: SessionContext,
    Path(id): Path<i64>,
) -> PortalResult<Json<VehicleView>> {
    let vehicle = authorized_vehicle(&ctx, &session, id).await?;
    Ok(Json(VehicleView::new(vehicle, ctx.today())))
}

async fn get_artifacts(
    State(ctx): State<AppContext>,
    session: SessionContext,
    Path(id): Path<i64>,
) -> PortalResult<Json<ArtifactsResponse>> {
    let vehicle = authorized_vehicle(&ctx, &session, id).await?;
    Ok(Json(ArtifactsResponse {
        vehicle_id: vehicle.id,
        artifacts: VehicleArtifacts::from(&vehicle),
        registration_number: vehicle.registration_number,
    }))
}
