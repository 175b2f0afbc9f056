mod billing;
mod error;
mod handlers;
mod models;
mod security;
mod session;

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use billing::BillingRpc;
use session::SessionManager;

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bazaar_billing_gateway=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load config from env
    dotenvy::dotenv().ok();
    let billing_url = std::env::var("BILLING_SERVICE_URL")
        .unwrap_or_else(|_| "http://127.0.0.1:9100".to_string());
    let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());

    tracing::info!("Connecting to billing service at {}", billing_url);

    let sessions = Arc::new(SessionManager::new(Arc::new(BillingRpc::new(&billing_url))));
    let state = AppState {
        sessions: Arc::clone(&sessions),
    };

    let app = Router::new()
        .route("/v1/session/initialize", post(handlers::initialize))
        .route("/v1/session/state", get(handlers::get_connection_state))
        .route("/v1/session/disconnect", post(handlers::disconnect))
        .route("/v1/products/query", post(handlers::get_products))
        .route(
            "/v1/purchases",
            get(handlers::get_purchase_info).post(handlers::purchase_product),
        )
        .route("/v1/purchases/consume", post(handlers::consume_product))
        .route("/v1/events", get(handlers::purchase_events))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .context("Failed to bind to port")?;

    tracing::info!("Gateway listening on port {}", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server failed")?;

    // best-effort cleanup of a live billing session on the way out
    sessions.teardown().await;
    tracing::info!("Gateway stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
    }
}
