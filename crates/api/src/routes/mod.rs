//! API routes

pub mod health;
pub mod webhooks;

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Webhook ingress (public, authenticated by provider signature)
    let webhook_routes = Router::new().route("/webhooks/billing", post(webhooks::billing_webhook));

    Router::new()
        .merge(health_routes)
        .merge(webhook_routes)
        .with_state(state)
}
