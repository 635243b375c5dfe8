/// Request metrics and session cookie middleware
use crate::{
    api::auth::{session_cookie, SESSION_COOKIE},
    auth::TouchedSession,
    context::AppContext,
    metrics,
};
use axum::{
    extract::{MatchedPath, Request, State},
    http::header::SET_COOKIE,
    middleware::Next,
    response::Response,
};
use std::time::Instant;

/// Record count and latency per route template
pub async fn track_metrics(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    // Route templates keep label cardinality bounded
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(req).await;

    metrics::record_http_request(
        &method,
        &path,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}

/// Re-issue the session cookie whenever a request slid its session forward,
/// so the browser deadline follows the idle timeout instead of the login time
pub async fn refresh_session_cookie(
    State(ctx): State<AppContext>,
    mut req: Request,
    next: Next,
) -> Response {
    let touched = TouchedSession::default();
    req.extensions_mut().insert(touched.clone());

    let mut response = next.run(req).await;

    let Some(token) = touched.token() else {
        return response;
    };

    // Login, resume and logout write their own session cookie
    let prefix = format!("{}=", SESSION_COOKIE);
    let already_set = response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.starts_with(&prefix));
    if already_set {
        return response;
    }

    match session_cookie(&ctx, token) {
        Ok(cookie) => {
            response.headers_mut().append(SET_COOKIE, cookie);
        }
        Err(e) => tracing::warn!(error = %e, "could not refresh session cookie"),
    }
    response
}
