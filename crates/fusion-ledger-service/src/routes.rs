//! Router configuration.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{admin, credits, health, usage, webhooks};
use crate::state::AppState;

/// Maximum concurrent requests for the fusion workflow's debit/refund calls.
const USAGE_MAX_CONCURRENT_REQUESTS: usize = 100;

/// Maximum concurrent requests for general API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
/// - `GET /v1/credits/packages` - Credit packs on sale
///
/// ## Credits (identity-provider JWT)
/// - `GET /v1/credits/balance` - Current balance (provisions the user)
/// - `GET /v1/credits/transactions` - Transaction history, newest first
///
/// ## Usage (service API key)
/// - `POST /v1/usage/spend` - Debit credits for a fusion
/// - `POST /v1/usage/refund` - Return credits after a failed fusion
///
/// ## Admin (admin API key)
/// - `GET /v1/admin/users/:external_id/balance` - Verify one projection
/// - `POST /v1/admin/reconcile/:external_id` - Repair one projection
/// - `POST /v1/admin/reconcile` - Repair every projection
/// - `POST /v1/admin/adjustments` - Manual signed adjustment
///
/// ## Webhooks (signature verification)
/// - `POST /webhooks/stripe` - Stripe checkout events
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config.cors_origins);
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let state = Arc::new(state);

    let usage_routes = Router::new()
        .route("/spend", post(usage::spend))
        .route("/refund", post(usage::refund))
        .layer(ConcurrencyLimitLayer::new(USAGE_MAX_CONCURRENT_REQUESTS));

    let admin_routes = Router::new()
        .route("/users/:external_id/balance", get(admin::verify_balance))
        .route("/reconcile", post(admin::reconcile_everyone))
        .route("/reconcile/:external_id", post(admin::reconcile_one))
        .route("/adjustments", post(admin::create_adjustment));

    let api_routes = Router::new()
        .route("/credits/balance", get(credits::get_balance))
        .route("/credits/transactions", get(credits::list_transactions))
        .route("/credits/packages", get(credits::list_packages))
        .nest("/admin", admin_routes)
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS))
        .nest("/usage", usage_routes);

    Router::new()
        // Health (public, no rate limit)
        .route("/health", get(health::health))
        .nest("/v1", api_routes)
        // Webhooks (no rate limit - Stripe controls the pace)
        .route("/webhooks/stripe", post(webhooks::stripe_webhook))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
