//! Common test utilities for fusion ledger integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::Router;
use axum_test::TestServer;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;

use fusion_ledger_core::{ExternalUserId, TransactionId, User};
use fusion_ledger_service::auth::JwtClaims;
use fusion_ledger_service::stripe::sign_payload;
use fusion_ledger_service::{create_router, AppState, ServiceConfig, StorageBackend};
use fusion_ledger_store::{MemoryStore, Store};

pub const JWT_SECRET: &str = "test-jwt-secret";
pub const SERVICE_API_KEY: &str = "test-service-key";
pub const ADMIN_API_KEY: &str = "test-admin-key";
pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// The store behind the server, for seeding and inspecting state.
    pub store: Arc<dyn Store>,
    /// Subject of the default signed-in user.
    pub test_user: ExternalUserId,
}

impl TestHarness {
    /// Create a new test harness with an empty in-memory ledger.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Create a harness after adjusting the default test configuration.
    pub fn with_config(adjust: impl FnOnce(&mut ServiceConfig)) -> Self {
        let mut config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            storage_backend: StorageBackend::Memory,
            auth_jwt_secret: Some(JWT_SECRET.into()),
            service_api_key: Some(SERVICE_API_KEY.into()),
            admin_api_key: Some(ADMIN_API_KEY.into()),
            stripe_webhook_secret: Some(WEBHOOK_SECRET.into()),
            reconcile_interval_seconds: 0,
            ..ServiceConfig::default()
        };
        adjust(&mut config);

        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let state = AppState::new(Arc::clone(&store), config);
        let router: Router = create_router(state);

        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            store,
            test_user: ExternalUserId::new("user_test_ash").expect("valid subject"),
        }
    }

    /// Authorization header for the default user.
    pub fn user_auth_header(&self) -> String {
        Self::auth_header_for(self.test_user.as_str())
    }

    /// Authorization header carrying a freshly signed token for `sub`.
    pub fn auth_header_for(sub: &str) -> String {
        let now = chrono::Utc::now().timestamp();
        Self::auth_header_with_claims(&JwtClaims {
            sub: sub.to_string(),
            aud: Some(json!("authenticated")),
            iss: None,
            exp: now + 3600,
            iat: Some(now),
        })
    }

    /// Authorization header for arbitrary claims.
    pub fn auth_header_with_claims(claims: &JwtClaims) -> String {
        let token = encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
        )
        .expect("Failed to sign test token");
        format!("Bearer {token}")
    }

    /// Provision the default user and give them `credits` purchased credits.
    pub async fn fund_test_user(&self, credits: i64) -> User {
        self.fund(&self.test_user, credits).await
    }

    /// Provision `external_id` and give them `credits` purchased credits.
    pub async fn fund(&self, external_id: &ExternalUserId, credits: i64) -> User {
        let user = self
            .store
            .ensure_user(external_id)
            .await
            .expect("Failed to provision user");
        if credits > 0 {
            self.store
                .purchase(
                    &user.id,
                    credits,
                    &format!("cs_seed_{}", TransactionId::generate()),
                    "Test funding",
                )
                .await
                .expect("Failed to fund user");
        }
        user
    }

    /// Current cached balance of `external_id`.
    pub async fn balance_of(&self, external_id: &ExternalUserId) -> i64 {
        let user = self
            .store
            .find_user(external_id)
            .await
            .expect("store read failed")
            .expect("user exists");
        user.credits_balance
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// A `checkout.session.completed` event.
pub fn checkout_completed(
    session_id: &str,
    client_reference_id: &str,
    payment_status: &str,
    metadata: serde_json::Value,
) -> String {
    json!({
        "id": format!("evt_{session_id}"),
        "object": "event",
        "type": "checkout.session.completed",
        "data": {
            "object": {
                "id": session_id,
                "object": "checkout.session",
                "payment_status": payment_status,
                "client_reference_id": client_reference_id,
                "amount_total": 499,
                "currency": "usd",
                "metadata": metadata
            }
        }
    })
    .to_string()
}

/// `Stripe-Signature` header for `payload`, signed now with the test secret.
pub fn stripe_signature(payload: &str) -> String {
    sign_payload(payload, WEBHOOK_SECRET, chrono::Utc::now().timestamp())
}
