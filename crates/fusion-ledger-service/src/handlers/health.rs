//! Liveness check for load balancers and deploy scripts.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

/// `GET /health` body.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the process serves requests.
    pub status: &'static str,
    /// Service name.
    pub service: &'static str,
    /// Crate version.
    pub version: &'static str,
    /// Which ledger backend this instance writes to.
    pub storage: &'static str,
}

/// Report liveness and the configured storage backend. Touches no storage.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "fusion-ledger",
        version: env!("CARGO_PKG_VERSION"),
        storage: state.config.storage_backend.as_str(),
    })
}
