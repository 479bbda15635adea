mod api;
mod config;
mod db;
mod errors;
mod models;
mod state;

use crate::config::Config;
use crate::errors::ApiError;
use crate::state::{AppState, Ledger};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let config = Config::from_env()?;

    // Journal and snapshot live under DATA_DIR (ignored by git).
    std::fs::create_dir_all(&config.data_dir).map_err(|_| ApiError::Internal)?;

    let db = db::connect(&config.database_url()).await?;
    db::init_schema(&db).await?;

    let snapshot_path = config.snapshot_path();
    let ledger = Ledger::load_or_deploy(&snapshot_path, config.contract_address)?;

    let addr = config.addr.clone();
    let contract = config.contract_address;
    let state = AppState::new(db, config, ledger, Some(snapshot_path));

    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|_| ApiError::Internal)?;

    tracing::info!(%addr, %contract, "backend listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|_| ApiError::Internal)?;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::warn!("failed to install ctrl-c handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
