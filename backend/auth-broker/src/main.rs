/// Auth Broker Main Entry Point
///
/// Starts the HTTP server with:
/// - Credential store (JSON document on disk)
/// - Local and token strategies, plus RADIUS, GitHub, Google and OIDC when configured
/// - HS256 token issuer
use anyhow::{Context, Result};
use auth_broker::{
    config::Settings,
    http::{start_http_server, HttpServerState},
    AuthBroker,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "auth_broker=info,info".into()),
        )
        .with_target(false)
        .json()
        .init();

    info!("Starting Auth Broker");

    let settings = Settings::load().context("Failed to load configuration")?;
    info!("Configuration loaded successfully");

    let broker = AuthBroker::from_settings(&settings)
        .await
        .context("Failed to initialize broker")?;
    info!(
        strategies = ?broker.strategy_names(),
        users = broker.store().len(),
        "Broker initialized"
    );

    let state = HttpServerState::new(broker, &settings);
    start_http_server(state, &settings.server.host, settings.server.port)
        .await
        .context("HTTP server error")?;

    info!("Auth broker shutdown complete");

    Ok(())
}
