//! Attest Server — audit workflow copilot backend.
//!
//! A standalone Rust backend for the Attest platform, providing:
//! - RESTful HTTP API via axum
//! - SQLite persistence with rusqlite
//! - Streaming agent responses as newline-delimited JSON
//! - Spend governance in front of every agent invocation
//!
//! This crate can be used standalone or embedded in other applications
//! (e.g., the `attest` CLI).

pub mod api;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use attest_core::agent::{HttpModelClient, ModelClient, ScriptedModel};
use attest_core::db::Database;
use attest_core::state::{AppState, AppStateInner};

/// Configuration for the Attest backend server.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: String,
    /// Use the scripted offline model instead of the hosted API. Useful for
    /// demos and integration tests; no API key required.
    pub offline: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3410,
            db_path: "attest.db".to_string(),
            offline: false,
        }
    }
}

/// Create a shared `AppState` from a database path.
///
/// This is useful when you need to share the state between the HTTP server
/// and other consumers (e.g. CLI commands that touch the stores directly).
pub async fn create_app_state(db_path: &str, offline: bool) -> Result<AppState, String> {
    let db = Database::open(db_path).map_err(|e| format!("Failed to open database: {}", e))?;

    let model = if offline {
        ModelClient::Scripted(ScriptedModel::new())
    } else {
        ModelClient::Http(
            HttpModelClient::from_env().map_err(|e| format!("Model client setup failed: {}", e))?,
        )
    };

    Ok(Arc::new(AppStateInner::new(db, model)))
}

/// Start the Attest backend server.
///
/// Returns the actual address the server is listening on.
pub async fn start_server(config: ServerConfig) -> Result<SocketAddr, String> {
    tracing::info!(
        "Starting Attest backend server on {}:{}",
        config.host,
        config.port
    );

    let state = create_app_state(&config.db_path, config.offline).await?;
    start_server_with_state(config, state).await
}

/// Start the HTTP server with a pre-built `AppState`.
pub async fn start_server_with_state(
    config: ServerConfig,
    state: AppState,
) -> Result<SocketAddr, String> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(api::api_router())
        .route("/api/health", axum::routing::get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| format!("Invalid address: {}", e))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind to {}: {}", addr, e))?;

    let local_addr = listener
        .local_addr()
        .map_err(|e| format!("Failed to get local address: {}", e))?;

    tracing::info!("Attest backend server listening on {}", local_addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok(local_addr)
}

async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "server": "attest-server",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
