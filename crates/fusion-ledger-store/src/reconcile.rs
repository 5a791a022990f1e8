//! Balance verification and reconciliation.
//!
//! Recomputes each user's balance from the transaction log and overwrites a
//! drifted projection with the recomputed value. The overwrite goes through
//! [`Store::write_balance`], so it is itself guarded: if a transaction lands
//! between the read and the write, the write is rejected and the user is
//! re-read instead of being clobbered with a stale sum.

use chrono::Utc;

use fusion_ledger_core::{BalanceCorrection, BalanceSnapshot, ReconciliationReport, UserId};

use crate::error::{Result, StoreError};
use crate::Store;

/// Attempts per user before a concurrent writer is treated as a failure.
const MAX_ATTEMPTS: u32 = 3;

/// Read-only consistency check for one user.
///
/// # Errors
///
/// Returns `StoreError::NotFound` if the user doesn't exist.
pub async fn verify_user<S: Store + ?Sized>(store: &S, user_id: &UserId) -> Result<BalanceSnapshot> {
    store.snapshot(user_id).await
}

/// Repair one user's projection if it has drifted.
///
/// Returns the correction applied, or `None` when the projection already
/// matched the log.
///
/// # Errors
///
/// Returns `StoreError::NotFound` for an unknown user, or the last
/// `ProjectionMismatch` if the user kept changing across every attempt.
pub async fn reconcile_user<S: Store + ?Sized>(
    store: &S,
    user_id: &UserId,
) -> Result<Option<BalanceCorrection>> {
    let mut attempt = 1;
    loop {
        let snapshot = store.snapshot(user_id).await?;
        let Some(correction) = snapshot.correction() else {
            return Ok(None);
        };

        match store.write_balance(user_id, correction.new_balance).await {
            Ok(()) => {
                tracing::warn!(
                    user_id = %user_id,
                    old_balance = correction.old_balance,
                    new_balance = correction.new_balance,
                    drift = snapshot.drift(),
                    "Balance projection corrected"
                );
                return Ok(Some(correction));
            }
            Err(StoreError::ProjectionMismatch { .. }) if attempt < MAX_ATTEMPTS => {
                tracing::debug!(user_id = %user_id, attempt, "Log changed during reconciliation, retrying");
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Reconcile every user.
///
/// A failure on one user is logged and skipped so one bad row cannot stall
/// the whole pass; storage outages abort the pass.
///
/// # Errors
///
/// Returns an error if the user list cannot be read or storage becomes unavailable.
pub async fn reconcile_all<S: Store + ?Sized>(store: &S) -> Result<ReconciliationReport> {
    let started_at = Utc::now();
    let user_ids = store.list_user_ids().await?;
    let mut corrections = Vec::new();

    for user_id in &user_ids {
        match reconcile_user(store, user_id).await {
            Ok(Some(correction)) => corrections.push(correction),
            Ok(None) => {}
            Err(e) if e.is_transient() => return Err(e),
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "Reconciliation failed for user");
            }
        }
    }

    let report = ReconciliationReport {
        users_checked: user_ids.len() as u64,
        corrections,
        started_at,
        finished_at: Utc::now(),
    };

    tracing::info!(
        users_checked = report.users_checked,
        corrected = report.corrections.len(),
        "Reconciliation pass finished"
    );

    Ok(report)
}
