//! Fusion workflow debit and refund integration tests.

mod common;

use std::future::IntoFuture;

use axum::http::StatusCode;
use common::{TestHarness, SERVICE_API_KEY};
use fusion_ledger_core::ExternalUserId;
use serde_json::json;

// ============================================================================
// Spend
// ============================================================================

#[tokio::test]
async fn spend_debits_one_credit_by_default() {
    let harness = TestHarness::new();
    harness.fund_test_user(3).await;

    let response = harness
        .server
        .post("/v1/usage/spend")
        .add_header("x-api-key", SERVICE_API_KEY)
        .add_header("x-service-name", "fusion-workflow")
        .json(&json!({ "external_user_id": "user_test_ash" }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["credits_balance"], 2);
    assert!(body["transaction_id"].is_string());
    assert_eq!(harness.balance_of(&harness.test_user).await, 2);
}

#[tokio::test]
async fn spend_with_insufficient_credits_is_payment_required() {
    let harness = TestHarness::new();
    harness.fund_test_user(1).await;

    let response = harness
        .server
        .post("/v1/usage/spend")
        .add_header("x-api-key", SERVICE_API_KEY)
        .json(&json!({ "external_user_id": "user_test_ash", "credits": 2 }))
        .await;

    response.assert_status(StatusCode::PAYMENT_REQUIRED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "insufficient_credits");
    assert_eq!(body["error"]["details"]["balance"], 1);
    assert_eq!(body["error"]["details"]["required"], 2);

    // Nothing was written
    assert_eq!(harness.balance_of(&harness.test_user).await, 1);
    let user = harness.store.find_user(&harness.test_user).await.unwrap().unwrap();
    assert_eq!(
        harness.store.list_transactions(&user.id, 10, 0).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn first_spend_provisions_user_and_is_payment_required() {
    let harness = TestHarness::new();
    let newcomer = ExternalUserId::new("user_first_time").unwrap();

    let response = harness
        .server
        .post("/v1/usage/spend")
        .add_header("x-api-key", SERVICE_API_KEY)
        .json(&json!({ "external_user_id": "user_first_time" }))
        .await;

    response.assert_status(StatusCode::PAYMENT_REQUIRED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "insufficient_credits");
    assert_eq!(body["error"]["details"]["balance"], 0);
    assert_eq!(body["error"]["details"]["required"], 1);

    let user = harness.store.find_user(&newcomer).await.unwrap().unwrap();
    assert_eq!(user.credits_balance, 0);
    assert!(harness
        .store
        .list_transactions(&user.id, 10, 0)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn spend_rejects_non_positive_credits() {
    let harness = TestHarness::new();
    harness.fund_test_user(3).await;

    let response = harness
        .server
        .post("/v1/usage/spend")
        .add_header("x-api-key", SERVICE_API_KEY)
        .json(&json!({ "external_user_id": "user_test_ash", "credits": 0 }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn spend_without_api_key_fails() {
    let harness = TestHarness::new();
    harness.fund_test_user(3).await;

    let response = harness
        .server
        .post("/v1/usage/spend")
        .json(&json!({ "external_user_id": "user_test_ash" }))
        .await;

    response.assert_status_unauthorized();
}

#[tokio::test]
async fn spend_with_wrong_api_key_fails() {
    let harness = TestHarness::new();
    harness.fund_test_user(3).await;

    let response = harness
        .server
        .post("/v1/usage/spend")
        .add_header("x-api-key", "not-the-key")
        .json(&json!({ "external_user_id": "user_test_ash" }))
        .await;

    response.assert_status_unauthorized();
    assert_eq!(harness.balance_of(&harness.test_user).await, 3);
}

#[tokio::test]
async fn user_token_cannot_spend() {
    let harness = TestHarness::new();
    harness.fund_test_user(3).await;

    let response = harness
        .server
        .post("/v1/usage/spend")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "external_user_id": "user_test_ash" }))
        .await;

    response.assert_status_unauthorized();
}

#[tokio::test]
async fn concurrent_spends_never_overdraw() {
    let harness = TestHarness::new();
    harness.fund_test_user(3).await;

    let requests = (0..10).map(|_| {
        harness
            .server
            .post("/v1/usage/spend")
            .add_header("x-api-key", SERVICE_API_KEY)
            .json(&json!({ "external_user_id": "user_test_ash" }))
            .into_future()
    });
    let responses = futures::future::join_all(requests).await;

    let ok = responses
        .iter()
        .filter(|r| r.status_code() == StatusCode::OK)
        .count();
    let rejected = responses
        .iter()
        .filter(|r| r.status_code() == StatusCode::PAYMENT_REQUIRED)
        .count();
    assert_eq!(ok, 3);
    assert_eq!(rejected, 7);
    assert_eq!(harness.balance_of(&harness.test_user).await, 0);
}

// ============================================================================
// Refund
// ============================================================================

#[tokio::test]
async fn refund_after_failed_generation() {
    let harness = TestHarness::new();
    harness.fund_test_user(1).await;

    let spend = harness
        .server
        .post("/v1/usage/spend")
        .add_header("x-api-key", SERVICE_API_KEY)
        .json(&json!({ "external_user_id": "user_test_ash" }))
        .await;
    spend.assert_status_ok();
    let spent: serde_json::Value = spend.json();

    let response = harness
        .server
        .post("/v1/usage/refund")
        .add_header("x-api-key", SERVICE_API_KEY)
        .json(&json!({
            "external_user_id": "user_test_ash",
            "reverses_transaction_id": spent["transaction_id"]
        }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["credits_balance"], 1);

    // The same usage row can't be refunded twice
    let response = harness
        .server
        .post("/v1/usage/refund")
        .add_header("x-api-key", SERVICE_API_KEY)
        .json(&json!({
            "external_user_id": "user_test_ash",
            "reverses_transaction_id": spent["transaction_id"]
        }))
        .await;

    response.assert_status(StatusCode::CONFLICT);
    assert_eq!(harness.balance_of(&harness.test_user).await, 1);
}

#[tokio::test]
async fn unlinked_refund_is_allowed() {
    let harness = TestHarness::new();
    harness.fund_test_user(0).await;

    let response = harness
        .server
        .post("/v1/usage/refund")
        .add_header("x-api-key", SERVICE_API_KEY)
        .json(&json!({
            "external_user_id": "user_test_ash",
            "credits": 2,
            "description": "Refund: generation timed out"
        }))
        .await;

    response.assert_status_ok();
    assert_eq!(harness.balance_of(&harness.test_user).await, 2);
}

#[tokio::test]
async fn refund_with_malformed_reference_is_bad_request() {
    let harness = TestHarness::new();
    harness.fund_test_user(1).await;

    let response = harness
        .server
        .post("/v1/usage/refund")
        .add_header("x-api-key", SERVICE_API_KEY)
        .json(&json!({
            "external_user_id": "user_test_ash",
            "reverses_transaction_id": "not-a-ulid"
        }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}
