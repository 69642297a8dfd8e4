use std::sync::Arc;

use database::Database;
use portal::Coordinator;
use portal_bot::matrix_transport::connect;
use portal_bot::{dispatcher, watch_config, BotConfig, MatrixTransport, SyncOptions};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = BotConfig::path_from_env();
    let config = BotConfig::from_file_and_env(&config_path)?;
    info!(
        path = %config_path.display(),
        homeserver = %config.homeserver,
        control_room = ?config.control_room,
        "Loaded config"
    );

    let db = Database::connect(&config.database_url()).await?;
    db.migrate().await?;

    let client = connect(&config).await?;

    let transport = Arc::new(MatrixTransport::new(client.clone(), config.user_id.clone()));
    let coordinator = Arc::new(
        Coordinator::new(transport, db.clone(), config.settings()?)
            .with_lock_capacity(config.lock_capacity),
    );
    if let Err(e) = coordinator.start().await {
        warn!("Initial agent refresh failed: {}", e);
    }

    let _watcher = match watch_config(config_path.clone(), Arc::clone(&coordinator)) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            warn!("Config hot reload disabled: {}", e);
            None
        }
    };

    let options = SyncOptions {
        timeout: config.sync_timeout(),
        ..SyncOptions::default()
    };
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let result = dispatcher::run(
        client,
        coordinator,
        db.clone(),
        options,
        Some(config_path),
        shutdown,
    )
    .await;

    db.close().await;
    info!("Shut down");
    result.map_err(Into::into)
}
