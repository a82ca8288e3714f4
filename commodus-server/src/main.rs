use anyhow::{Context, Result};
use axum::{http::StatusCode, response::Json, routing::get, Router};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use commodus_server::config::{Config, LedgerBackend};
use commodus_server::github::GitHubClient;
use commodus_server::status::status_handler;
use commodus_server::webhook::webhook_router;
use commodus_server::{AppState, Gatekeeper, InMemoryStore, Ledger, LedgerStore, SqliteStore};

async fn health_check() -> Result<Json<serde_json::Value>, StatusCode> {
    Ok(Json(json!({
        "status": "healthy",
        "service": "commodus"
    })))
}

async fn help_handler() -> Json<serde_json::Value> {
    let version = commodus_server::get_version();
    Json(json!({
        "service": "commodus",
        "version": version,
        "description": "Gates pull requests on a number of independent approvals",
        "endpoints": [
            {
                "path": "/health",
                "method": "GET",
                "description": "Health check endpoint",
                "authentication": "None"
            },
            {
                "path": "/hooks",
                "method": "POST",
                "description": "GitHub webhook receiver (alias: /webhook). Optional query parameter required_plus_ones overrides the approval threshold for the delivery",
                "authentication": "GitHub webhook signature (X-Hub-Signature-256 or X-Hub-Signature)"
            },
            {
                "path": "/status",
                "method": "GET",
                "description": "Tracked revisions and their approval counts",
                "authentication": "Bearer token (STATUS_AUTH_TOKEN); disabled when unset"
            },
            {
                "path": "/help",
                "method": "GET",
                "description": "API documentation and service information",
                "authentication": "None"
            }
        ],
        "events": [
            "pull_request opened/reopened/synchronize: start tracking the head revision",
            "pull_request closed: stop tracking the pull request",
            "issue_comment created: count a +1/-1 comment against the current head",
            "pull_request_review submitted: count an approval or change request"
        ],
        "configuration": {
            "required_env_vars": [
                "GITHUB_WEBHOOK_SECRET",
                "GITHUB_TOKEN"
            ],
            "optional_env_vars": [
                "GITHUB_API_URL (default: https://api.github.com)",
                "REQUIRED_APPROVALS (default: 2)",
                "APPROVE_TOKENS (comma-separated)",
                "REJECT_TOKENS (comma-separated)",
                "STATUS_CONTEXT (default: commodus/approvals)",
                "PORT (default: 3000)",
                "STATE_DIR (default: current directory)",
                "LEDGER_BACKEND (sqlite or memory, default: sqlite)",
                "STATUS_AUTH_TOKEN (enables /status)"
            ]
        }
    }))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting commodus {}", commodus_server::get_version());

    let config = Config::from_env().context("Failed to load configuration from environment")?;

    let store: Arc<dyn LedgerStore> = match config.ledger_backend {
        LedgerBackend::Sqlite => {
            let db_path = config.ledger_path();
            info!("Using ledger database: {}", db_path.display());
            Arc::new(SqliteStore::new(&db_path).context("Failed to initialize SQLite ledger")?)
        }
        LedgerBackend::Memory => {
            warn!("Using in-memory ledger; approvals will be lost on restart");
            Arc::new(InMemoryStore::new())
        }
    };

    let github_client = Arc::new(GitHubClient::new(
        config.github_api_url.clone(),
        config.github_token.clone(),
    )?);

    info!(
        "Default threshold {}, status context {:?}",
        config.tally.threshold, config.status_context
    );

    let gatekeeper = Gatekeeper::new(
        Ledger::new(store),
        github_client.clone(),
        config.tally.clone(),
        config.status_context.clone(),
    );

    let app_state = Arc::new(AppState {
        gatekeeper,
        head_resolver: github_client,
        webhook_secret: config.github_webhook_secret.clone(),
        status_auth_token: config.status_auth_token.clone(),
    });

    if app_state.status_auth_token.is_none() {
        info!("STATUS_AUTH_TOKEN not set; /status is disabled");
    }

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/help", get(help_handler))
        .route("/status", get(status_handler))
        .merge(webhook_router(app_state.clone()))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(app_state);

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server listening on port {}", config.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
