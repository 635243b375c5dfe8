/// Login, logout and session endpoints
use crate::{
    account::{AccountSummary, LoginOutcome, LoginRejection, LoginRequest},
    audit::{SecurityEvent, SecurityEventKind},
    auth::{session_token, OptionalSession},
    context::AppContext,
    error::{PortalError, PortalResult},
    metrics,
    rate_limit::LockoutDecision,
    session::{ClientInfo, IssuedSession, SessionContext},
};
use axum::{
    extract::State,
    http::{header::SET_COOKIE, HeaderMap, HeaderValue},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use serde::Serialize;
use std::time::Duration;
use validator::Validate;

pub const SESSION_COOKIE: &str = "portal_session";
pub const REMEMBER_COOKIE: &str = "portal_remember";

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/session", get(current_session))
        .route("/auth/resume", post(resume))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub account: AccountSummary,
    pub idle_timeout_secs: i64,
    pub remembered: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<AccountSummary>,
}

/// `HttpOnly` cookie string; `max_age` of zero clears it
fn cookie(ctx: &AppContext, name: &str, value: &str, max_age: i64) -> PortalResult<HeaderValue> {
    let mut cookie = format!("{name}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}");
    if ctx.config.authentication.secure_cookies {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
        .map_err(|e| PortalError::Internal(format!("Invalid cookie header: {}", e)))
}

/// Session cookie living exactly one idle timeout from now
pub fn session_cookie(ctx: &AppContext, token: &str) -> PortalResult<HeaderValue> {
    cookie(
        ctx,
        SESSION_COOKIE,
        token,
        ctx.session_manager.timeout().num_seconds(),
    )
}

/// Set-Cookie headers for a freshly issued session
fn issued_cookies(ctx: &AppContext, issued: &IssuedSession) -> PortalResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.append(SET_COOKIE, session_cookie(ctx, &issued.token)?);
    if let Some(remember) = &issued.remember_token {
        headers.append(
            SET_COOKIE,
            cookie(
                ctx,
                REMEMBER_COOKIE,
                remember,
                ctx.session_manager.remember_ttl().num_seconds(),
            )?,
        );
    }
    Ok(headers)
}

fn cleared_cookies(ctx: &AppContext) -> PortalResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.append(SET_COOKIE, cookie(ctx, SESSION_COOKIE, "", 0)?);
    headers.append(SET_COOKIE, cookie(ctx, REMEMBER_COOKIE, "", 0)?);
    Ok(headers)
}

/// Sign in through the user or admin login form
async fn login(
    State(ctx): State<AppContext>,
    client: ClientInfo,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> PortalResult<(HeaderMap, Json<LoginResponse>)> {
    req.validate()?;

    if let LockoutDecision::Denied { retry_after_secs } = ctx.lockout.check(&req.username).await? {
        metrics::record_login("locked_out");
        ctx.events
            .record(
                SecurityEvent::new(SecurityEventKind::LockedOut)
                    .client(client.ip.as_deref(), client.user_agent.as_deref())
                    .details(format!("retry after {}s", retry_after_secs)),
            )
            .await?;
        return Err(PortalError::LockedOut {
            retry_after: Duration::from_secs(retry_after_secs),
        });
    }

    let account = match ctx
        .account_manager
        .login(&req.username, &req.password, req.channel)
        .await?
    {
        LoginOutcome::Authenticated(account) => account,
        LoginOutcome::Rejected(rejection) => {
            let kind = match rejection {
                LoginRejection::BadCredentials => {
                    metrics::record_login("bad_credentials");
                    SecurityEventKind::LoginFailed
                }
                LoginRejection::WrongChannel { .. } => {
                    metrics::record_login("wrong_channel");
                    SecurityEventKind::LoginWrongChannel
                }
            };
            ctx.events
                .record(
                    SecurityEvent::new(kind)
                        .client(client.ip.as_deref(), client.user_agent.as_deref()),
                )
                .await?;
            return Err(PortalError::Authentication(rejection.message().to_string()));
        }
    };

    let previous = session_token(&headers);
    let issued = ctx
        .session_manager
        .start_session(&account, previous.as_deref(), &client, req.remember)
        .await?;

    metrics::record_login("success");
    ctx.events
        .record(
            SecurityEvent::new(SecurityEventKind::LoginSucceeded)
                .account(account.id)
                .session(&issued.record.id)
                .client(client.ip.as_deref(), client.user_agent.as_deref()),
        )
        .await?;

    let cookies = issued_cookies(&ctx, &issued)?;
    Ok((
        cookies,
        Json(LoginResponse {
            account: AccountSummary::from(&account),
            idle_timeout_secs: ctx.session_manager.timeout().num_seconds(),
            remembered: issued.remember_token.is_some(),
        }),
    ))
}

/// End the current session; always clears the cookies
async fn logout(
    State(ctx): State<AppContext>,
    client: ClientInfo,
    headers: HeaderMap,
) -> PortalResult<(HeaderMap, Json<serde_json::Value>)> {
    let ended = match session_token(&headers) {
        Some(token) => ctx.session_manager.end_session(&token, &client).await?,
        None => false,
    };

    Ok((
        cleared_cookies(&ctx)?,
        Json(serde_json::json!({ "loggedOut": ended })),
    ))
}

async fn current_session(OptionalSession(session): OptionalSession) -> Json<SessionResponse> {
    Json(match session {
        Some(SessionContext { account, .. }) => SessionResponse {
            authenticated: true,
            account: Some(AccountSummary::from(&account)),
        },
        None => SessionResponse {
            authenticated: false,
            account: None,
        },
    })
}

/// Exchange the remember-me cookie for a new session
async fn resume(
    State(ctx): State<AppContext>,
    client: ClientInfo,
    jar: CookieJar,
) -> PortalResult<(HeaderMap, Json<LoginResponse>)> {
    let remember = jar
        .get(REMEMBER_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .ok_or_else(|| PortalError::Authentication("Authentication required".to_string()))?;
    let previous = jar.get(SESSION_COOKIE).map(|cookie| cookie.value().to_string());

    let Some((account, issued)) = ctx
        .session_manager
        .resume(&remember, previous.as_deref(), &client)
        .await?
    else {
        return Err(PortalError::Authentication(
            "Your session has expired. Please sign in again".to_string(),
        ));
    };

    let cookies = issued_cookies(&ctx, &issued)?;
    Ok((
        cookies,
        Json(LoginResponse {
            account: AccountSummary::from(&account),
            idle_timeout_secs: ctx.session_manager.timeout().num_seconds(),
            remembered: true,
        }),
    ))
}
