//! Application state.

use std::sync::Arc;

use fusion_ledger_core::PackageCatalog;
use fusion_ledger_store::Store;

use crate::config::ServiceConfig;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Credit packs a checkout session may name.
    pub packages: PackageCatalog,
}

impl AppState {
    /// Create a new application state with the default package catalog.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Self {
        if config.stripe_webhook_secret.is_none() {
            tracing::warn!("Stripe webhook secret not configured - payment webhooks will be rejected");
        }
        if config.service_api_key.is_none() {
            tracing::warn!("SERVICE_API_KEY not set - usage endpoints will reject every request");
        }
        if config.admin_api_key.is_none() {
            tracing::warn!("ADMIN_API_KEY not set - admin endpoints are disabled");
        }

        Self {
            store,
            config,
            packages: PackageCatalog::default(),
        }
    }
}
