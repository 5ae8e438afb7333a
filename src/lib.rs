pub mod api;
pub mod config;
pub mod constants;
pub mod db;
pub mod entities;
pub mod mail;
pub mod models;
pub mod services;
pub mod session;

use std::sync::Arc;
use tokio::signal;

pub use config::Config;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

pub async fn run() -> anyhow::Result<()> {
    let config = Config::load()?;
    config.validate()?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    run_server(config).await
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    info!("Rosterr v{} starting...", env!("CARGO_PKG_VERSION"));

    if config.admin.uses_default_password() {
        warn!("Bootstrap admin is using the default password; set [admin] password in config.toml");
    }

    let port = config.server.port;
    let state = api::create_app_state_from_config(config).await?;
    let app = api::router(Arc::clone(&state)).await;

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    // The process is ready to serve; bootstrap the admin account now, in its
    // own unit of work. Idempotent across restarts.
    bootstrap_admin(&state).await?;

    let server_handle = tokio::spawn(async move {
        info!("Web server running at http://0.0.0.0:{port}");
        if let Err(e) = axum::serve(listener, app).await {
            error!("Web server error: {}", e);
        }
    });

    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Shutdown signal received");
        }
        Err(e) => {
            error!("Error listening for shutdown: {}", e);
        }
    }

    server_handle.abort();
    info!("Rosterr stopped");

    Ok(())
}

pub async fn bootstrap_admin(state: &api::AppState) -> anyhow::Result<()> {
    let mut uow = state.store().begin().await?;
    state.accounts().bootstrap_admin(&mut uow).await?;
    uow.commit().await?;
    Ok(())
}
