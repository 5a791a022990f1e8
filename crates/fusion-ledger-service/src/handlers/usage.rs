//! Debit and refund handlers for the fusion workflow.
//!
//! The workflow calls `spend` before generating an image. If generation
//! fails afterwards it calls `refund`, optionally naming the usage row it is
//! reversing.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use fusion_ledger_core::{SpendOutcome, TransactionId};

use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::handlers::provision_user;
use crate::state::AppState;

fn default_credits() -> i64 {
    1
}

fn default_spend_description() -> String {
    "Fusion generation".to_string()
}

fn default_refund_description() -> String {
    "Refund: fusion generation failed".to_string()
}

/// Debit request.
#[derive(Debug, Deserialize)]
pub struct SpendRequest {
    /// Identity-provider subject of the user being charged.
    pub external_user_id: String,
    /// Credits to debit (default: 1).
    #[serde(default = "default_credits")]
    pub credits: i64,
    /// Description stored on the usage row.
    #[serde(default = "default_spend_description")]
    pub description: String,
}

/// Refund request.
#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    /// Identity-provider subject of the user being refunded.
    pub external_user_id: String,
    /// Credits to return (default: 1).
    #[serde(default = "default_credits")]
    pub credits: i64,
    /// Description stored on the refund row.
    #[serde(default = "default_refund_description")]
    pub description: String,
    /// The usage row being reversed, if known.
    #[serde(default)]
    pub reverses_transaction_id: Option<String>,
}

/// Response for a posted debit or refund.
#[derive(Debug, Serialize)]
pub struct LedgerEntryResponse {
    /// The appended row's ID.
    pub transaction_id: String,
    /// Balance right after the row was applied.
    pub credits_balance: i64,
}

/// Debit credits for a fusion generation.
pub async fn spend(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Json(body): Json<SpendRequest>,
) -> Result<Json<LedgerEntryResponse>, ApiError> {
    let user = provision_user(&state, &body.external_user_id).await?;

    match state
        .store
        .spend(&user.id, body.credits, &body.description)
        .await?
    {
        SpendOutcome::Posted(posted) => {
            tracing::info!(
                service = %auth.service_name,
                user_id = %user.id,
                transaction_id = %posted.transaction.id,
                credits = body.credits,
                balance = posted.balance,
                "Credits spent"
            );
            Ok(Json(LedgerEntryResponse {
                transaction_id: posted.transaction.id.to_string(),
                credits_balance: posted.balance,
            }))
        }
        SpendOutcome::InsufficientCredits { balance, required } => {
            tracing::info!(
                service = %auth.service_name,
                user_id = %user.id,
                balance,
                required,
                "Spend rejected: insufficient credits"
            );
            Err(ApiError::InsufficientCredits { balance, required })
        }
    }
}

/// Return credits after a failed generation.
pub async fn refund(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Json(body): Json<RefundRequest>,
) -> Result<Json<LedgerEntryResponse>, ApiError> {
    let reverses = body
        .reverses_transaction_id
        .as_deref()
        .map(str::parse::<TransactionId>)
        .transpose()
        .map_err(|_| ApiError::BadRequest("Invalid transaction ID".into()))?;

    let user = provision_user(&state, &body.external_user_id).await?;

    let posted = state
        .store
        .refund(&user.id, body.credits, &body.description, reverses)
        .await?;

    tracing::info!(
        service = %auth.service_name,
        user_id = %user.id,
        transaction_id = %posted.transaction.id,
        reverses = ?reverses,
        credits = body.credits,
        balance = posted.balance,
        "Credits refunded"
    );

    Ok(Json(LedgerEntryResponse {
        transaction_id: posted.transaction.id.to_string(),
        credits_balance: posted.balance,
    }))
}
