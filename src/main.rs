use std::{path::PathBuf, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_rest::{AppState, router};
use seqvault_core::{StorageConfig, StorageService, UploadCleaner, constants::DEFAULT_CONFIG_FILE};

/// Main entry point for the seqvault application
///
/// Serves the REST API and runs the scheduled upload cleanup until the process receives Ctrl-C.
///
/// # Environment Variables
/// - `SEQVAULT_CONFIG`: storage configuration file (default: "seqvault.yaml")
/// - `SEQVAULT_STATE_DIR`: folder holding the entity and grant catalogs (default: ".")
/// - `SEQVAULT_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
///
/// # Errors
/// Returns an error if the configuration cannot be loaded or the server fails to bind.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("seqvault_run=info".parse()?)
                .add_directive("seqvault_core=info".parse()?)
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = PathBuf::from(
        std::env::var("SEQVAULT_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.into()),
    );
    let state_dir =
        PathBuf::from(std::env::var("SEQVAULT_STATE_DIR").unwrap_or_else(|_| ".".into()));
    let rest_addr = std::env::var("SEQVAULT_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());

    let cfg = Arc::new(StorageConfig::load(&config_path)?);
    tracing::info!(
        "++ Loaded {} storage location(s) from {}",
        cfg.locations().len(),
        config_path.display()
    );

    let cancel = CancellationToken::new();
    let cleanup = tokio::spawn(UploadCleaner::new(cfg.clone()).run(cancel.clone()));

    tracing::info!("++ Starting seqvault REST on {}", rest_addr);
    let app = router(AppState {
        storage: StorageService::with_state_dir(cfg, &state_dir),
    });
    let listener = tokio::net::TcpListener::bind(&rest_addr).await?;

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("cannot listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            shutdown.cancel();
        })
        .await?;

    cancel.cancel();
    cleanup.await?;
    Ok(())
}
