//! Standalone REST API server binary.
//!
//! ## Purpose
//! Serves public file downloads and the public file listing on their own, without the scheduled
//! upload cleanup. The workspace's main `seqvault-run` binary runs both.
//!
//! ## Environment
//! - `SEQVAULT_CONFIG`: storage configuration file (default `seqvault.yaml`)
//! - `SEQVAULT_STATE_DIR`: folder holding the entity and grant catalogs (default `.`)
//! - `SEQVAULT_REST_ADDR`: bind address (default `0.0.0.0:3000`)

use api_rest::{router, AppState};
use seqvault_core::{constants::DEFAULT_CONFIG_FILE, StorageConfig, StorageService};
use std::{path::PathBuf, sync::Arc};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let addr = std::env::var("SEQVAULT_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());

    let config_path = PathBuf::from(
        std::env::var("SEQVAULT_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.into()),
    );
    if !config_path.is_file() {
        anyhow::bail!(
            "Storage configuration does not exist: {}",
            config_path.display()
        );
    }
    let cfg = Arc::new(StorageConfig::load(&config_path)?);

    let state_dir = PathBuf::from(std::env::var("SEQVAULT_STATE_DIR").unwrap_or_else(|_| ".".into()));

    tracing::info!("-- Starting seqvault REST API on {}", addr);

    let state = AppState {
        storage: StorageService::with_state_dir(cfg, &state_dir),
    };
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
