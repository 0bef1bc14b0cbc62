use std::sync::Arc;

use anyhow::Context;
use dotenv::dotenv;
use tokio::signal;
use tracing::{info, warn};

use learning_engine::{
    app::create_router,
    app_state::AppState,
    clock::SystemClock,
    config,
    db::{self, Stores},
    telemetry::{init_telemetry, TelemetryConfig},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = config::init()?;
    let telemetry = init_telemetry(TelemetryConfig::from_config(config)).await?;

    let (pool, stores) = match &config.database {
        Some(database) => {
            let pool = db::init_pool(database)
                .await
                .context("Failed to connect to the database")?;
            info!("Connected to Postgres, migrations applied");
            (Some(pool.clone()), Stores::postgres(pool))
        }
        None => {
            warn!("DATABASE_URL not set, running on the in-memory store");
            (None, Stores::in_memory())
        }
    };

    let state = AppState::new(config.clone(), pool, stores, Arc::new(SystemClock));
    let app = create_router(state);

    let addr = config.server_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("{} listening on {}", config.app.name, addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Failed to serve application")?;

    telemetry.shutdown().await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        warn!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
