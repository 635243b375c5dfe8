/// Vehicle Portal - vehicle registration lookup service
///
/// Links portal accounts to back-office vehicle owner records and gates
/// access to vehicle data behind cookie sessions and a login lockout.

mod account;
mod api;
mod audit;
mod auth;
mod clock;
mod config;
mod context;
mod db;
mod error;
mod jobs;
mod metrics;
mod owners;
mod rate_limit;
mod server;
mod session;
mod vehicles;

use config::ServerConfig;
use context::AppContext;
use error::PortalResult;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> PortalResult<()> {
    // Load configuration first so the log format can follow it
    let config = ServerConfig::from_env()?;

    init_tracing(&config);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        uptime = metrics::uptime_seconds(),
        "Starting vehicle portal"
    );

    // Create application context
    let ctx = Arc::new(AppContext::new(config).await?);

    // Start background jobs
    let scheduler = Arc::new(jobs::JobScheduler::new(Arc::clone(&ctx)));
    scheduler.start();

    // Start server
    server::serve((*ctx).clone()).await?;

    Ok(())
}

fn init_tracing(config: &ServerConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "vehicle_portal={},tower_http=debug",
            config.logging.level
        )
        .into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
