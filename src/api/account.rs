/// Self-service account endpoints
use crate::{
    account::{AccountSummary, ChangePasswordRequest, NewAccount, RegisterRequest, Role},
    audit::{SecurityEvent, SecurityEventKind},
    context::AppContext,
    error::PortalResult,
    session::{ClientInfo, SessionContext},
};
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use validator::Validate;

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/account/register", post(register))
        .route("/account/password", post(change_password))
}

/// Register a regular account. Admin accounts are never created here.
async fn register(
    State(ctx): State<AppContext>,
    Json(req): Json<RegisterRequest>,
) -> PortalResult<(StatusCode, Json<AccountSummary>)> {
    req.validate()?;

    let account = ctx
        .account_manager
        .create_account(NewAccount {
            username: req.username,
            password: req.password,
            role: Role::User,
            full_name: req.full_name,
            email: req.email,
            national_id: req.national_id,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(AccountSummary::from(&account))))
}

async fn change_password(
    State(ctx): State<AppContext>,
    session: SessionContext,
    client: ClientInfo,
    Json(req): Json<ChangePasswordRequest>,
) -> PortalResult<StatusCode> {
    req.validate()?;

    ctx.account_manager
        .change_password(&session.account, &req.current_password, &req.new_password)
        .await?;

    ctx.events
        .record(
            SecurityEvent::new(SecurityEventKind::PasswordChanged)
                .account(session.account.id)
                .session(&session.session.id)
                .client(client.ip.as_deref(), client.user_agent.as_deref()),
        )
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
