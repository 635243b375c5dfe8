/// API routes and handlers
pub mod account;
pub mod admin;
pub mod auth;
pub mod dashboard;
pub mod health;
pub mod middleware;
pub mod vehicles;

use crate::context::AppContext;
use axum::Router;

/// Build API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .merge(health::routes())
        .merge(auth::routes())
        .merge(account::routes())
        .merge(dashboard::routes())
        .merge(vehicles::routes())
        .merge(admin::routes())
}
