use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use tracing::info;

use crate::accounts;
use crate::config::Config;
use crate::directline::DirectLineClient;
use crate::relay::BotRelay;
use crate::speech::TranscriptionClient;
use crate::store::AccountStore;
use crate::webhook::{self, MessageSender};
use crate::whatsapp::WhatsAppClient;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub store: AccountStore,
    pub relay: BotRelay,
    pub speech: TranscriptionClient,
    pub whatsapp: Arc<dyn MessageSender>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(config: Config, store: AccountStore) -> Result<Self> {
        let backend = Arc::new(DirectLineClient::new(config.directline.clone())?);
        let relay = BotRelay::new(
            backend,
            config.directline.poll_attempts,
            Duration::from_secs(config.directline.poll_interval_secs),
        );
        let speech = TranscriptionClient::new(config.speech.clone())?;
        let whatsapp: Arc<dyn MessageSender> =
            Arc::new(WhatsAppClient::new(config.whatsapp.clone())?);

        Ok(Self {
            config,
            store,
            relay,
            speech,
            whatsapp,
        })
    }
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(accounts::health))
        .route("/webhook", post(webhook::handle_webhook))
        .route("/verify-smartcard", post(accounts::verify_smartcard))
        .route("/verify-phone", post(accounts::verify_phone))
        .route("/add-item", post(accounts::add_item))
        .route("/balance", get(accounts::balance))
        .route("/top-up", post(accounts::top_up))
        .route("/accounts", get(accounts::list_accounts))
        .with_state(state)
}

pub async fn run(state: SharedState) -> Result<()> {
    let addr = format!(
        "{}:{}",
        state.config.server.host, state.config.server.port
    );

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    info!("Listening on {}", addr);

    axum::serve(listener, router(state))
        .await
        .context("Server error")?;

    Ok(())
}

#[cfg(test)]
pub use test_support::{test_state, test_state_with};
