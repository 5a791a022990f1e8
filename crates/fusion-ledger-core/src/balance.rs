//! Balance projection and reconciliation results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CreditTransaction, UserId};

/// Sum a user's transaction amounts: the true balance.
///
/// Saturates instead of wrapping; a log that overflows `i64` is already corrupt.
#[must_use]
pub fn ledger_sum<'a, I>(transactions: I) -> i64
where
    I: IntoIterator<Item = &'a CreditTransaction>,
{
    transactions
        .into_iter()
        .fold(0i64, |acc, tx| acc.saturating_add(tx.amount))
}

/// Cached and recomputed balance for one user at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    /// The user.
    pub user_id: UserId,
    /// Value stored in the projection.
    pub cached_balance: i64,
    /// `SUM(amount)` over the user's transactions.
    pub calculated_balance: i64,
    /// Number of rows in the user's log.
    pub transaction_count: u64,
}

impl BalanceSnapshot {
    /// Cached minus calculated; zero when consistent.
    #[must_use]
    pub const fn drift(&self) -> i64 {
        self.cached_balance.saturating_sub(self.calculated_balance)
    }

    /// Whether the projection matches the log.
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        self.cached_balance == self.calculated_balance
    }

    /// The correction reconciliation would apply, if any.
    #[must_use]
    pub const fn correction(&self) -> Option<BalanceCorrection> {
        if self.is_consistent() {
            None
        } else {
            Some(BalanceCorrection {
                user_id: self.user_id,
                old_balance: self.cached_balance,
                new_balance: self.calculated_balance,
            })
        }
    }
}

/// A drifted projection that reconciliation overwrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceCorrection {
    /// The user.
    pub user_id: UserId,
    /// Projection value before the repair.
    pub old_balance: i64,
    /// Recomputed value written by the repair.
    pub new_balance: i64,
}

/// Outcome of a reconciliation pass over all users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    /// Users inspected.
    pub users_checked: u64,
    /// Users whose projection was repaired.
    pub corrections: Vec<BalanceCorrection>,
    /// When the pass started.
    pub started_at: DateTime<Utc>,
    /// When the pass finished.
    pub finished_at: DateTime<Utc>,
}

impl ReconciliationReport {
    /// Whether the pass found no drift.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.corrections.is_empty()
    }
}
