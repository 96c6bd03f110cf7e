mod accounts;
mod config;
mod directline;
mod relay;
mod server;
mod speech;
mod store;
mod webhook;
mod whatsapp;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::server::AppState;
use crate::store::AccountStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,cardline=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Bot backend: {}", config.directline.base_url);
    info!("  WhatsApp sender: {}", config.whatsapp.sender);
    info!("  Account store: {}", config.store.database_path.display());

    // Open the account store and pull in the legacy JSON file if configured
    let store = AccountStore::open(&config.store.database_path)?;
    if let Some(legacy) = config.store.legacy_json.clone() {
        if legacy.exists() {
            let imported = store.import_legacy_json(&legacy).await?;
            info!(
                "Imported {} legacy account(s) from {}",
                imported,
                legacy.display()
            );
        }
    }

    // Create shared state
    let state = Arc::new(AppState::new(config, store)?);

    // Run the relay server
    info!("Relay is starting...");
    server::run(state).await?;

    Ok(())
}
