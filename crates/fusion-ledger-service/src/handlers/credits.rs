//! Credit balance and transaction handlers for signed-in users.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use fusion_ledger_core::{CreditPackage, CreditTransaction};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Upper bound on `limit` for history pages.
const MAX_PAGE_SIZE: usize = 100;

/// Balance response.
#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    /// Internal user ID.
    pub user_id: String,
    /// Identity-provider subject.
    pub external_id: String,
    /// Credits available; one credit is one fusion.
    pub credits_balance: i64,
}

/// Get the caller's balance, provisioning their ledger row on first visit.
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<BalanceResponse>, ApiError> {
    let user = state.store.ensure_user(&auth.external_id).await?;

    Ok(Json(BalanceResponse {
        user_id: user.id.to_string(),
        external_id: user.external_id.to_string(),
        credits_balance: user.credits_balance,
    }))
}

/// Transaction list query parameters.
#[derive(Debug, Deserialize)]
pub struct ListTransactionsQuery {
    /// Maximum number of transactions to return (default: 50, max: 100).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination (default: 0).
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

/// Transaction response.
#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    /// Transaction ID.
    pub id: String,
    /// Signed credit amount (positive = credit, negative = debit).
    pub amount: i64,
    /// `purchase`, `usage`, `refund` or `adjustment`.
    pub transaction_type: String,
    /// Description.
    pub description: String,
    /// Payment reference, for purchases.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_reference: Option<String>,
    /// The usage row a refund reverses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reverses_transaction_id: Option<String>,
    /// Timestamp.
    pub created_at: String,
}

impl From<&CreditTransaction> for TransactionResponse {
    fn from(tx: &CreditTransaction) -> Self {
        Self {
            id: tx.id.to_string(),
            amount: tx.amount,
            transaction_type: tx.transaction_type.to_string(),
            description: tx.description.clone(),
            payment_reference: tx.payment_reference.clone(),
            reverses_transaction_id: tx.reverses_transaction_id.map(|id| id.to_string()),
            created_at: tx.created_at.to_rfc3339(),
        }
    }
}

/// List transactions response.
#[derive(Debug, Serialize)]
pub struct ListTransactionsResponse {
    /// Transactions (newest first).
    pub transactions: Vec<TransactionResponse>,
    /// Whether there are more transactions.
    pub has_more: bool,
}

/// List the caller's transaction history.
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<ListTransactionsQuery>,
) -> Result<Json<ListTransactionsResponse>, ApiError> {
    let user = state.store.ensure_user(&auth.external_id).await?;

    // Fetch one more than requested to determine has_more
    let limit = query.limit.min(MAX_PAGE_SIZE);
    let transactions = state
        .store
        .list_transactions(&user.id, limit + 1, query.offset)
        .await?;

    let has_more = transactions.len() > limit;
    let transactions: Vec<_> = transactions
        .iter()
        .take(limit)
        .map(TransactionResponse::from)
        .collect();

    Ok(Json(ListTransactionsResponse {
        transactions,
        has_more,
    }))
}

/// Package list response.
#[derive(Debug, Serialize)]
pub struct PackagesResponse {
    /// Packages on sale, cheapest first.
    pub packages: Vec<CreditPackage>,
}

/// List the credit packs on sale.
pub async fn list_packages(State(state): State<Arc<AppState>>) -> Json<PackagesResponse> {
    Json(PackagesResponse {
        packages: state.packages.packages().to_vec(),
    })
}
