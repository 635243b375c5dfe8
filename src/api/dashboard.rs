/// Account dashboard: who am I, which owner record am I, what do I own
use crate::{
    account::AccountSummary,
    context::AppContext,
    error::PortalResult,
    owners::{LinkState, MatchRule, OwnerRecord},
    session::SessionContext,
    vehicles::VehicleView,
};
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

pub fn routes() -> Router<AppContext> {
    Router::new().route("/dashboard", get(dashboard))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub account: AccountSummary,
    pub link: LinkState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_by: Option<MatchRule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<OwnerRecord>,
    pub vehicles: Vec<VehicleView>,
}

async fn dashboard(
    State(ctx): State<AppContext>,
    session: SessionContext,
) -> PortalResult<Json<Dashboard>> {
    let account = &session.account;
    let today = ctx.today();

    let Some(matched) = ctx.owner_resolver.resolve_match(account).await? else {
        return Ok(Json(Dashboard {
            account: AccountSummary::from(account),
            link: LinkState::Unlinked,
            matched_by: None,
            owner: None,
            vehicles: Vec::new(),
        }));
    };

    let vehicles = ctx
        .vehicles
        .list_for_owner(matched.owner.id)
        .await?
        .into_iter()
        .map(|vehicle| VehicleView::new(vehicle, today))
        .collect();

    Ok(Json(Dashboard {
        account: AccountSummary::from(account),
        link: LinkState::Linked,
        matched_by: Some(matched.rule),
        owner: Some(matched.owner),
        vehicles,
    }))
}
