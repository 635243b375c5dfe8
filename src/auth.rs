/// Authentication extractors
use crate::{
    account::Account,
    api::auth::SESSION_COOKIE,
    context::AppContext,
    error::PortalError,
    session::{ClientInfo, SessionContext, SessionStatus},
};
use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts},
    http::{header, request::Parts, HeaderMap},
};
use axum_extra::extract::cookie::CookieJar;
use std::{
    convert::Infallible,
    net::SocketAddr,
    sync::{Arc, OnceLock},
};

const FORWARDED_FOR: &str = "x-forwarded-for";

/// Token of a session the request slid forward; read back when the response is built
#[derive(Debug, Clone, Default)]
pub struct TouchedSession(Arc<OnceLock<String>>);

impl TouchedSession {
    pub fn token(&self) -> Option<&str> {
        self.0.get().map(String::as_str)
    }

    fn mark(&self, token: &str) {
        let _ = self.0.set(token.to_string());
    }
}

/// Session token from the request cookies
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    CookieJar::from_headers(headers)
        .get(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|token| !token.is_empty())
}

/// Client address and user agent; `X-Forwarded-For` counts only when trusted
fn client_info(parts: &Parts, trust_forwarded_for: bool) -> ClientInfo {
    let forwarded = parts
        .headers
        .get(FORWARDED_FOR)
        .filter(|_| trust_forwarded_for)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty());

    let ip = forwarded.or_else(|| {
        parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
    });

    let user_agent = parts
        .headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    ClientInfo { ip, user_agent }
}

#[async_trait]
impl FromRequestParts<AppContext> for ClientInfo {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        Ok(client_info(parts, state.config.service.trust_forwarded_for))
    }
}

/// Authenticated context - validates the session cookie and slides its deadline
#[async_trait]
impl FromRequestParts<AppContext> for SessionContext {
    type Rejection = PortalError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let token = session_token(&parts.headers)
            .ok_or_else(|| PortalError::Authentication("Authentication required".to_string()))?;
        let client = client_info(parts, state.config.service.trust_forwarded_for);

        let session = match state.session_manager.touch_session(&token, &client).await? {
            SessionStatus::Active(session) => session,
            SessionStatus::Expired => {
                return Err(PortalError::Authentication(
                    "Your session has expired. Please sign in again".to_string(),
                ))
            }
            SessionStatus::Unknown => {
                return Err(PortalError::Authentication(
                    "Authentication required".to_string(),
                ))
            }
        };

        let account = match state.account_manager.get_account(session.account_id).await {
            Ok(account) => account,
            Err(PortalError::NotFound(_)) => {
                tracing::warn!(account_id = session.account_id, "session for missing account");
                return Err(PortalError::Authentication(
                    "Authentication required".to_string(),
                ));
            }
            Err(e) => return Err(e),
        };

        if let Some(touched) = parts.extensions.get::<TouchedSession>() {
            touched.mark(&token);
        }

        Ok(SessionContext {
            session,
            account,
            token,
        })
    }
}

/// Optional authenticated context - does not fail if no session cookie is present
#[derive(Debug, Clone)]
pub struct OptionalSession(pub Option<SessionContext>);

#[async_trait]
impl FromRequestParts<AppContext> for OptionalSession {
    type Rejection = PortalError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        match SessionContext::from_request_parts(parts, state).await {
            Ok(context) => Ok(OptionalSession(Some(context))),
            Err(PortalError::Authentication(_)) => Ok(OptionalSession(None)),
            Err(e) => Err(e),
        }
    }
}

/// Admin context - requires a session whose account holds the admin role
#[derive(Debug, Clone)]
pub struct AdminContext {
    pub context: SessionContext,
}

impl AdminContext {
    pub fn account(&self) -> &Account {
        &self.context.account
    }
}

#[async_trait]
impl FromRequestParts<AppContext> for AdminContext {
    type Rejection = PortalError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let context = SessionContext::from_request_parts(parts, state).await?;

        if !context.account.is_admin() {
            tracing::warn!(
                account_id = context.account.id,
                "non-admin account reached an admin route"
            );
            return Err(PortalError::Authorization("Admin role required".to_string()));
        }

        Ok(AdminContext { context })
    }
}
