use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use switchboard::api::{create_router, OAuthAppState};
use switchboard::config::{clients_from_env, load_from_env};
use switchboard::credentials::TokenStore;
use switchboard::oauth::{run_state_cleanup, StateManager};
use tracing::info;

/// Seconds between sweeps of expired OAuth states.
const STATE_CLEANUP_INTERVAL_SECS: u64 = 60;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "switchboard=info".into()),
        )
        .init();

    info!("Switchboard starting...");

    let config = load_from_env().context("Failed to load configuration")?;

    let encryption_key = std::env::var("SWITCHBOARD_ENCRYPTION_KEY")
        .context("SWITCHBOARD_ENCRYPTION_KEY is required (base64-encoded 32-byte key)")?;

    let clients = clients_from_env(&config.providers, |key| std::env::var(key).ok());

    info!(
        port = config.server.port,
        callback_base_url = %config.server.callback_base_url,
        store_path = %config.store.path,
        providers = config.providers.len(),
        registered_clients = clients.len(),
        "Configuration loaded"
    );

    let token_store = Arc::new(
        TokenStore::new(&config.store.path, &encryption_key)
            .context("Failed to initialize token store")?,
    );
    info!("Token store initialized");

    let token_manager = Arc::new(
        config
            .oauth
            .token_manager()
            .context("Failed to build token manager")?,
    );

    let state_manager = StateManager::new(config.oauth.state_expiry_seconds);
    tokio::spawn(run_state_cleanup(
        state_manager.clone(),
        STATE_CLEANUP_INTERVAL_SECS,
    ));

    let providers: HashMap<_, _> = config
        .providers
        .iter()
        .map(|p| (p.name.clone(), p.clone()))
        .collect();

    let router = create_router(OAuthAppState {
        token_manager,
        token_store,
        state_manager,
        providers: Arc::new(providers),
        clients: Arc::new(clients),
        callback_base_url: config.server.callback_base_url.clone(),
    });

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.server.port))
        .await
        .context("Failed to bind API port")?;
    info!(port = config.server.port, "Switchboard API listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "API server error");
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    info!("Switchboard stopped");

    Ok(())
}
