use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;

use super::api::{self, AppState};
use super::db::{DbHandle, FulfillmentDb};
use super::engine::{EngineSettings, FulfillmentEngine};
use super::gateway::{HttpOrderGateway, OrderStatusGateway, RetryPolicy, RetryingGateway};

/// Configuration for the fulfillment server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub db_path: PathBuf,
    pub dev_mode: bool,
    pub upstream_url: String,
    pub upstream_token: Option<String>,
    pub retry: RetryPolicy,
    pub page_size: u32,
    pub max_pages: u32,
    pub engine: EngineSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3150,
            db_path: PathBuf::from(".prepdesk/prepdesk.db"),
            dev_mode: false,
            upstream_url: "http://127.0.0.1:8080/api/v1".to_string(),
            upstream_token: None,
            retry: RetryPolicy::default(),
            page_size: 50,
            max_pages: 20,
            engine: EngineSettings::default(),
        }
    }
}

/// Build the full application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    api::api_router().with_state(state)
}

/// Wire the HTTP gateway, its retry decorator and the store into an engine.
pub fn build_engine(config: &ServerConfig, db: FulfillmentDb) -> FulfillmentEngine {
    let http = HttpOrderGateway::new(&config.upstream_url, config.upstream_token.clone());
    let retrying = RetryingGateway::new(http, config.retry.clone());
    let gateway = OrderStatusGateway::new(Arc::new(retrying), config.page_size, config.max_pages);
    FulfillmentEngine::new(DbHandle::new(db), gateway, config.engine.clone())
}

/// Start the fulfillment server.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    if let Some(parent) = config.db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }

    let db = FulfillmentDb::new(&config.db_path).context("Failed to initialize fulfillment database")?;
    let engine = build_engine(&config, db);
    let state = Arc::new(AppState { engine });

    let mut app = build_router(state);

    if config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let host = if config.dev_mode { "0.0.0.0" } else { "127.0.0.1" };
    let addr = format!("{}:{}", host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(
        addr = %local_addr,
        upstream = %config.upstream_url,
        db = %config.db_path.display(),
        "prepdesk listening"
    );
    println!("prepdesk running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    println!("\nShutting down...");
}
