/// HTTP server setup and routing
use crate::{
    api::middleware::{refresh_session_cookie, track_metrics},
    context::AppContext,
    error::{PortalError, PortalResult},
    rate_limit::rate_limit_middleware,
};
use axum::{
    http::{header, Method, StatusCode},
    middleware,
    response::Json,
    Router,
};
use serde_json::json;
use std::net::SocketAddr;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

/// Build the main application router
/// Returns Router<()> because state is already provided
pub fn build_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .merge(crate::api::routes())
        // Provide state - converts Router<AppContext> to Router<()>
        .with_state(ctx.clone())
        .layer(middleware::from_fn_with_state(ctx.clone(), refresh_session_cookie))
        .layer(middleware::from_fn(track_metrics))
        // Rate limiting runs after state so it can reach AppContext
        .layer(middleware::from_fn_with_state(ctx, rate_limit_middleware))
        .layer(cors)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .fallback(not_found)
}

/// 404 handler
async fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "NotFound",
            "message": "Endpoint not found"
        })),
    )
}

/// Start the HTTP server
pub async fn serve(ctx: AppContext) -> PortalResult<()> {
    let addr = format!("{}:{}", ctx.config.service.hostname, ctx.config.service.port);

    info!("Vehicle portal listening on {}", addr);
    info!("   Service URL: {}", ctx.service_url());
    info!(
        "   Session idle timeout: {}s, lockout: {} attempts / {}s ({})",
        ctx.config.authentication.session_timeout_secs,
        ctx.config.lockout.max_attempts,
        ctx.config.lockout.lockout_duration_secs,
        ctx.config.lockout.store.as_str()
    );

    let app = build_router(ctx);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| PortalError::Internal(format!("Failed to bind to {}: {}", addr, e)))?;

    // Peer addresses feed ClientInfo unless X-Forwarded-For is trusted
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|e| PortalError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        account::{NewAccount, Role},
        api::auth::{REMEMBER_COOKIE, SESSION_COOKIE},
        clock::ManualClock,
        config::ServerConfig,
        db,
        error::ACCESS_DENIED_MESSAGE,
        owners::NewOwner,
        vehicles::{NewVehicle, Vehicle},
    };
    use axum::{
        body::{to_bytes, Body},
        http::{header::SET_COOKIE, Request, Response},
    };
    use chrono::{Duration, NaiveDate};
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    const PASSWORD: &str = "s3cret-pass";

    struct Harness {
        ctx: AppContext,
        clock: ManualClock,
    }

    impl Harness {
        async fn new() -> Self {
            let mut config = ServerConfig::default();
            config.rate_limit.enabled = false;
            config.authentication.secure_cookies = false;

            let clock = ManualClock::new();
            let ctx = AppContext::with_pool(config, db::test_pool().await, Arc::new(clock.clone()));
            Self { ctx, clock }
        }

        async fn account(&self, username: &str, role: Role, full_name: &str, email: &str) {
            self.ctx
                .account_manager
                .create_account(NewAccount {
                    username: username.to_string(),
                    password: PASSWORD.to_string(),
                    role,
                    full_name: full_name.to_string(),
                    email: Some(email.to_string()),
                    national_id: None,
                })
                .await
                .unwrap();
        }

        async fn vehicle_for(&self, owner_name: &str, owner_email: &str, plate: &str) -> Vehicle {
            let owner = self
                .ctx
                .owners
                .create(NewOwner {
                    name: owner_name.to_string(),
                    national_id: None,
                    phone: None,
                    email: Some(owner_email.to_string()),
                    address: None,
                    photo_path: None,
                })
                .await
                .unwrap();

            self.ctx
                .vehicles
                .create(NewVehicle {
                    registration_number: plate.to_string(),
                    make: "Toyota".to_string(),
                    model: "Corolla".to_string(),
                    year: 2019,
                    color: "Silver".to_string(),
                    chassis_number: format!("CHASSIS{}", plate),
                    engine_number: "2ZR-FE".to_string(),
                    owner_id: owner.id,
                    registration_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
                    expiry_date: NaiveDate::from_ymd_opt(2025, 1, 14).unwrap(),
                    certificate_path: Some(format!("certificates/{}.pdf", plate)),
                    qr_code_path: None,
                    roadworthy_path: None,
                })
                .await
                .unwrap()
        }

        async fn send(&self, request: Request<Body>) -> Response<Body> {
            build_router(self.ctx.clone()).oneshot(request).await.unwrap()
        }

        async fn login(&self, username: &str, password: &str, channel: &str) -> Response<Body> {
            self.send(
                Request::post("/auth/login")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        json!({
                            "username": username,
                            "password": password,
                            "channel": channel,
                            "remember": true,
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
        }

        async fn get(&self, uri: &str, session: &str) -> Response<Body> {
            self.send(
                Request::get(uri)
                    .header(header::COOKIE, format!("{}={}", SESSION_COOKIE, session))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
        }
    }

    fn cookie_value(response: &Response<Body>, name: &str) -> Option<String> {
        response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find_map(|value| {
                let pair = value.split(';').next()?;
                let (key, val) = pair.split_once('=')?;
                (key == name).then(|| val.to_string())
            })
    }

    async fn json_body(response: Response<Body>) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_login_sets_cookies_and_session_is_usable() {
        let h = Harness::new().await;
        h.account("jane", Role::User, "Jane Doe", "jane@example.com").await;

        let response = h.login("jane", PASSWORD, "user").await;
        assert_eq!(response.status(), StatusCode::OK);
        let session = cookie_value(&response, SESSION_COOKIE).unwrap();
        assert!(cookie_value(&response, REMEMBER_COOKIE).is_some());

        let response = h.get("/auth/session", &session).await;
        let body = json_body(response).await;
        assert_eq!(body["authenticated"], true);
        assert_eq!(body["account"]["username"], "jane");
    }

    #[tokio::test]
    async fn test_bad_credentials_are_generic() {
        let h = Harness::new().await;
        h.account("jane", Role::User, "Jane Doe", "jane@example.com").await;

        let wrong_password = json_body(h.login("jane", "nope-nope", "user").await).await;
        let unknown_user = json_body(h.login("nobody", "nope-nope", "user").await).await;
        assert_eq!(wrong_password["message"], unknown_user["message"]);
        assert_eq!(wrong_password["message"], "Invalid username or password");
    }

    #[tokio::test]
    async fn test_admin_on_user_channel_gets_specific_message() {
        let h = Harness::new().await;
        h.account("root", Role::Admin, "Root Admin", "root@example.com").await;

        let response = h.login("root", PASSWORD, "user").await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(cookie_value(&response, SESSION_COOKIE).is_none());
        let body = json_body(response).await;
        assert_eq!(
            body["message"],
            "Administrator accounts must sign in through the admin login"
        );

        let response = h.login("root", PASSWORD, "admin").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_sixth_attempt_is_locked_out() {
        let h = Harness::new().await;
        h.account("bob", Role::User, "Bob Smith", "bob@example.com").await;

        for _ in 0..5 {
            let response = h.login("bob", "wrong-pass", "user").await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }

        // Even the right password is refused while locked out
        let response = h.login("bob", PASSWORD, "user").await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry_after: u64 = response
            .headers()
            .get(header::RETRY_AFTER)
            .unwrap()
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!(retry_after > 0);

        h.clock.advance(Duration::seconds(901));
        let response = h.login("bob", PASSWORD, "user").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_other_owners_vehicle_looks_missing() {
        let h = Harness::new().await;
        h.account("jane", Role::User, "Jane Doe", "jane@example.com").await;
        let own = h.vehicle_for("JANE DOE", "jane@example.com", "GR-1001-24").await;
        let other = h.vehicle_for("Kofi Mensah", "kofi@example.com", "GR-2002-24").await;

        let session = cookie_value(&h.login("jane", PASSWORD, "user").await, SESSION_COOKIE).unwrap();

        let response = h.get(&format!("/vehicles/{}", own.id), &session).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = h.get(&format!("/vehicles/{}", other.id), &session).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let forbidden = json_body(response).await;

        let response = h.get("/vehicles/9999", &session).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let missing = json_body(response).await;

        assert_eq!(forbidden, missing);
        assert_eq!(forbidden["message"], ACCESS_DENIED_MESSAGE);

        let body = json_body(h.get("/vehicles", &session).await).await;
        let plates: Vec<&str> = body["vehicles"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["registration_number"].as_str().unwrap())
            .collect();
        assert_eq!(plates, vec!["GR-1001-24"]);
    }

    #[tokio::test]
    async fn test_dashboard_and_artifacts() {
        let h = Harness::new().await;
        h.account("jane", Role::User, "Jane Doe", "jane@example.com").await;
        let own = h.vehicle_for("Jane Doe", "JANE@example.com", "GR-1001-24").await;

        let session = cookie_value(&h.login("jane", PASSWORD, "user").await, SESSION_COOKIE).unwrap();

        let body = json_body(h.get("/dashboard", &session).await).await;
        assert_eq!(body["link"], "linked");
        assert_eq!(body["matchedBy"], "email");
        assert_eq!(body["vehicles"][0]["status"], "active");

        let body = json_body(h.get(&format!("/vehicles/{}/artifacts", own.id), &session).await).await;
        assert_eq!(body["artifacts"]["certificate"]["status"], "present");
        assert_eq!(body["artifacts"]["qrCode"]["status"], "absent");
    }

    #[tokio::test]
    async fn test_unlinked_dashboard() {
        let h = Harness::new().await;
        h.account("ama", Role::User, "Ama Owusu", "ama@example.com").await;
        let session = cookie_value(&h.login("ama", PASSWORD, "user").await, SESSION_COOKIE).unwrap();

        let body = json_body(h.get("/dashboard", &session).await).await;
        assert_eq!(body["link"], "unlinked");
        assert_eq!(body["vehicles"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_idle_session_expires() {
        let h = Harness::new().await;
        h.account("jane", Role::User, "Jane Doe", "jane@example.com").await;
        let session = cookie_value(&h.login("jane", PASSWORD, "user").await, SESSION_COOKIE).unwrap();

        h.clock.advance(Duration::seconds(1801));
        let response = h.get("/dashboard", &session).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = json_body(response).await;
        assert!(body["message"].as_str().unwrap().contains("expired"));
    }

    #[tokio::test]
    async fn test_admin_routes_require_admin() {
        let h = Harness::new().await;
        h.account("jane", Role::User, "Jane Doe", "jane@example.com").await;
        h.account("root", Role::Admin, "Root Admin", "root@example.com").await;
        h.vehicle_for("Kofi Mensah", "kofi@example.com", "GR-2002-24").await;

        let user = cookie_value(&h.login("jane", PASSWORD, "user").await, SESSION_COOKIE).unwrap();
        assert_eq!(h.get("/admin/stats", &user).await.status(), StatusCode::FORBIDDEN);

        let admin = cookie_value(&h.login("root", PASSWORD, "admin").await, SESSION_COOKIE).unwrap();
        let body = json_body(h.get("/admin/stats", &admin).await).await;
        assert_eq!(body["vehicles"], 1);
        assert_eq!(body["accounts"], 2);

        // Admins get a real not-found for a missing vehicle
        let response = h.get("/vehicles/9999", &admin).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = json_body(response).await;
        assert_ne!(body["message"], ACCESS_DENIED_MESSAGE);
    }

    #[tokio::test]
    async fn test_logout_clears_session() {
        let h = Harness::new().await;
        h.account("jane", Role::User, "Jane Doe", "jane@example.com").await;
        let session = cookie_value(&h.login("jane", PASSWORD, "user").await, SESSION_COOKIE).unwrap();

        let response = h
            .send(
                Request::post("/auth/logout")
                    .header(header::COOKIE, format!("{}={}", SESSION_COOKIE, session))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(cookie_value(&response, SESSION_COOKIE).as_deref(), Some(""));

        assert_eq!(
            h.get("/dashboard", &session).await.status(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[tokio::test]
    async fn test_register_then_login() {
        let h = Harness::new().await;
        let response = h
            .send(
                Request::post("/account/register")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        json!({
                            "username": "kwame",
                            "password": "long-enough-pw",
                            "full_name": "Kwame Asante",
                            "email": "kwame@example.com"
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = h.login("kwame", "long-enough-pw", "user").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_active_session_cookie_slides_with_requests() {
        let h = Harness::new().await;
        h.account("jane", Role::User, "Jane Doe", "jane@example.com").await;
        let session = cookie_value(&h.login("jane", PASSWORD, "user").await, SESSION_COOKIE).unwrap();

        h.clock.advance(Duration::seconds(1700));
        let response = h.get("/dashboard", &session).await;
        assert_eq!(response.status(), StatusCode::OK);
        let refreshed = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find(|value| value.starts_with(&format!("{}=", SESSION_COOKIE)))
            .map(str::to_string)
            .unwrap();
        assert!(refreshed.starts_with(&format!("{}={};", SESSION_COOKIE, session)));
        assert!(refreshed.contains("Max-Age=1800"));
        assert!(refreshed.contains("HttpOnly"));

        // Past the original login deadline, still inside the slid one
        h.clock.advance(Duration::seconds(1700));
        let response = h.get("/dashboard", &session).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(cookie_value(&response, SESSION_COOKIE).is_some());
    }

    #[tokio::test]
    async fn test_rejected_session_gets_no_cookie() {
        let h = Harness::new().await;
        let response = h.get("/dashboard", "not-a-session").await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(cookie_value(&response, SESSION_COOKIE).is_none());
    }

    #[tokio::test]
    async fn test_forwarded_for_ignored_unless_trusted() {
        let h = Harness::new().await;
        h.account("jane", Role::User, "Jane Doe", "jane@example.com").await;

        let response = h
            .send(
                Request::post("/auth/login")
                    .header(header::CONTENT_TYPE, "application/json")
                    .header("x-forwarded-for", "1.2.3.4")
                    .body(Body::from(
                        json!({
                            "username": "jane",
                            "password": PASSWORD,
                            "channel": "user",
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let events = h.ctx.events.recent(10, 0).await.unwrap();
        assert_eq!(events[0].kind, "login_succeeded");
        assert!(events.iter().all(|event| event.ip.as_deref() != Some("1.2.3.4")));
    }

    #[tokio::test]
    async fn test_admin_owner_detail() {
        let h = Harness::new().await;
        h.account("root", Role::Admin, "Root Admin", "root@example.com").await;
        let vehicle = h.vehicle_for("Kofi Mensah", "kofi@example.com", "GR-2002-24").await;
        let admin = cookie_value(&h.login("root", PASSWORD, "admin").await, SESSION_COOKIE).unwrap();

        let response = h.get(&format!("/admin/owners/{}", vehicle.owner_id), &admin).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["owner"]["name"], "Kofi Mensah");
        assert_eq!(body["vehicles"][0]["registration_number"], "GR-2002-24");

        let response = h.get("/admin/owners/9999", &admin).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_health_and_metrics() {
        let h = Harness::new().await;
        let response = h
            .send(Request::get("/health/ready").body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = h
            .send(Request::get("/metrics").body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
