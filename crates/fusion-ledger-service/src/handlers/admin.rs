//! Operator endpoints: projection verification, reconciliation and manual
//! adjustments.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use fusion_ledger_core::{
    BalanceCorrection, BalanceSnapshot, ReconciliationReport, SpendOutcome,
};
use fusion_ledger_store::{reconcile_all, reconcile_user, verify_user};

use crate::auth::AdminAuth;
use crate::error::ApiError;
use crate::handlers::find_user;
use crate::state::AppState;

/// Compare a user's cached balance with their log sum. Read-only.
pub async fn verify_balance(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
    Path(external_id): Path<String>,
) -> Result<Json<BalanceSnapshot>, ApiError> {
    let user = find_user(&state, &external_id).await?;
    let snapshot = verify_user(&*state.store, &user.id).await?;
    Ok(Json(snapshot))
}

/// Reconciliation result for one user.
#[derive(Debug, Serialize)]
pub struct ReconcileUserResponse {
    /// Empty when the projection was already consistent.
    pub corrections: Vec<BalanceCorrection>,
}

/// Repair one user's projection.
pub async fn reconcile_one(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Path(external_id): Path<String>,
) -> Result<Json<ReconcileUserResponse>, ApiError> {
    let user = find_user(&state, &external_id).await?;
    let correction = reconcile_user(&*state.store, &user.id).await?;

    tracing::info!(
        admin_id = %admin.admin_id,
        user_id = %user.id,
        corrected = correction.is_some(),
        "Reconciled user"
    );

    Ok(Json(ReconcileUserResponse {
        corrections: correction.into_iter().collect(),
    }))
}

/// Repair every user's projection.
pub async fn reconcile_everyone(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
) -> Result<Json<ReconciliationReport>, ApiError> {
    let report = reconcile_all(&*state.store).await?;

    tracing::info!(
        admin_id = %admin.admin_id,
        users_checked = report.users_checked,
        corrections = report.corrections.len(),
        "Reconciled all users"
    );

    Ok(Json(report))
}

/// Manual adjustment request.
#[derive(Debug, Deserialize)]
pub struct AdjustmentRequest {
    /// Identity-provider subject of the user being adjusted.
    pub external_user_id: String,
    /// Signed credit amount; must be non-zero.
    pub amount: i64,
    /// Reason, stored on the adjustment row.
    pub description: String,
}

/// Adjustment response.
#[derive(Debug, Serialize)]
pub struct AdjustmentResponse {
    /// The appended row's ID.
    pub transaction_id: String,
    /// Balance right after the adjustment.
    pub credits_balance: i64,
}

/// Apply a signed adjustment. Negative adjustments cannot overdraw.
pub async fn create_adjustment(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Json(body): Json<AdjustmentRequest>,
) -> Result<Json<AdjustmentResponse>, ApiError> {
    if body.description.trim().is_empty() {
        return Err(ApiError::BadRequest("Adjustment needs a description".into()));
    }

    let user = find_user(&state, &body.external_user_id).await?;

    match state
        .store
        .adjust(&user.id, body.amount, &body.description)
        .await?
    {
        SpendOutcome::Posted(posted) => {
            tracing::info!(
                admin_id = %admin.admin_id,
                user_id = %user.id,
                transaction_id = %posted.transaction.id,
                amount = body.amount,
                balance = posted.balance,
                description = %body.description,
                "Manual adjustment applied"
            );
            Ok(Json(AdjustmentResponse {
                transaction_id: posted.transaction.id.to_string(),
                credits_balance: posted.balance,
            }))
        }
        SpendOutcome::InsufficientCredits { balance, required } => {
            Err(ApiError::InsufficientCredits { balance, required })
        }
    }
}
