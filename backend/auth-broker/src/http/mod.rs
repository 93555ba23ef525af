/// HTTP adapter for the broker
///
/// Thin routing layer: every handler builds a credential map, calls the
/// broker and turns the outcome into JSON. Successful logins also set the
/// `token` cookie so browsers re-authenticate without extra work.
mod auth;

pub use auth::TOKEN_COOKIE;

use crate::broker::AuthBroker;
use crate::config::Settings;
use crate::error::BrokerError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Shared HTTP server state
#[derive(Debug, Clone)]
pub struct HttpServerState {
    pub broker: AuthBroker,
    /// Mark the token cookie `Secure`
    pub cookie_secure: bool,
}

impl HttpServerState {
    pub fn new(broker: AuthBroker, settings: &Settings) -> Self {
        Self {
            broker,
            cookie_secure: settings.server.cookie_secure,
        }
    }
}

/// Build the HTTP router with all broker endpoints
pub fn build_router(state: HttpServerState) -> Router {
    let state = Arc::new(state);

    Router::new()
        .route("/", get(auth::whoami))
        .route("/health", get(health_check))
        .route("/register", post(auth::register))
        .route("/login", post(auth::login_local))
        .route("/login-radius", post(auth::login_radius))
        .route("/login/:strategy", post(auth::login_with))
        .route("/logout", get(auth::logout))
        .route("/oauth/:provider", get(auth::oauth_start))
        .route("/oauth/:provider/callback", get(auth::oauth_callback))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    strategies: Vec<String>,
}

async fn health_check(
    axum::extract::State(state): axum::extract::State<Arc<HttpServerState>>,
) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        strategies: state.broker.strategy_names(),
    })
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for BrokerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "Request failed");
        }

        // Token failures share one label so clients cannot tell which check failed
        let label = match &self {
            BrokerError::InvalidSignature | BrokerError::Expired | BrokerError::Malformed => {
                "invalid_token"
            }
            other => other.kind(),
        };

        let body = ErrorBody {
            error: label,
            message: self.public_message(),
        };
        (status, Json(body)).into_response()
    }
}

/// Start the HTTP server and serve until Ctrl+C or SIGTERM
pub async fn start_http_server(
    state: HttpServerState,
    host: &str,
    port: u16,
) -> anyhow::Result<()> {
    let app = build_router(state);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Starting auth broker HTTP server on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }

    info!("Shutting down gracefully...");
}
