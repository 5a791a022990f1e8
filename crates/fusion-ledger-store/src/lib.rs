//! Storage layer for the fusion credit ledger.
//!
//! The [`Store`] trait is the only way to change a balance: every write is an
//! append to the transaction log, and the backend recomputes the balance
//! projection in the same atomic unit. Three backends implement it:
//!
//! - [`MemoryStore`]: a single async mutex around in-process maps (tests, local dev)
//! - `PgStore` (feature `postgres`): tables, triggers and a unique index that
//!   enforce the projection and idempotency inside PostgreSQL
//! - `RocksStore` (feature `rocksdb-backend`): column families written with a
//!   `WriteBatch` under a store-wide write lock
//!
//! Reconciliation ([`reconcile`]) is written once against the trait.
//!
//! # Example
//!
//! ```no_run
//! use fusion_ledger_core::ExternalUserId;
//! use fusion_ledger_store::{MemoryStore, Store};
//!
//! # async fn demo() -> fusion_ledger_store::Result<()> {
//! let store = MemoryStore::new();
//! let user = store.ensure_user(&ExternalUserId::new("user_abc").unwrap()).await?;
//!
//! store.purchase(&user.id, 20, "cs_test_123", "Standard Pack").await?;
//! let outcome = store.spend(&user.id, 1, "fusion generation").await?;
//! assert_eq!(outcome.balance(), 19);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
mod guard;
pub mod memory;
pub mod reconcile;

#[cfg(feature = "postgres")]
pub mod pg;

#[cfg(feature = "rocksdb-backend")]
pub mod keys;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
#[cfg(feature = "rocksdb-backend")]
pub mod schema;

#[cfg(test)]
mod conformance;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use reconcile::{reconcile_all, reconcile_user, verify_user};

#[cfg(feature = "postgres")]
pub use pg::PgStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

use async_trait::async_trait;
use fusion_ledger_core::{
    BalanceSnapshot, CreditTransaction, ExternalUserId, Posted, PurchaseOutcome,
    SpendOutcome, TransactionId, User, UserId,
};

/// What happened to an appended transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendResult {
    /// The row was written and the projection updated.
    Posted(Posted),

    /// A debit would have taken the balance below zero; nothing was written.
    InsufficientCredits {
        /// Balance at the time of the check.
        balance: i64,
        /// Credits the debit asked for.
        required: i64,
    },

    /// `(user, payment_reference)` was already in the log; nothing was written.
    Duplicate {
        /// The row that holds the reference.
        transaction_id: TransactionId,
        /// Current balance.
        balance: i64,
    },
}

/// The storage trait defining all ledger operations.
///
/// Implementations must make [`Store::append_transaction`] atomic: the
/// insufficient-funds check, the idempotency check, the row insert and the
/// projection update either all happen or none do, and concurrent appends for
/// one user are serialized.
#[async_trait]
pub trait Store: Send + Sync {
    // =========================================================================
    // Users
    // =========================================================================

    /// Return the user mapped to `external_id`, provisioning one with a zero
    /// balance on first sight.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn ensure_user(&self, external_id: &ExternalUserId) -> Result<User>;

    /// Get a user by internal ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>>;

    /// Get a user by identity-provider subject, without provisioning.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn find_user(&self, external_id: &ExternalUserId) -> Result<Option<User>>;

    /// All user IDs, for batch reconciliation.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_user_ids(&self) -> Result<Vec<UserId>>;

    // =========================================================================
    // Transaction log
    // =========================================================================

    /// Append a transaction and update the projection atomically.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the user doesn't exist.
    /// - `StoreError::InvalidReversal` if a refund names a row it cannot reverse.
    /// - `StoreError::Database` on storage failure (nothing written).
    async fn append_transaction(&self, transaction: CreditTransaction) -> Result<AppendResult>;

    /// Get a transaction by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_transaction(&self, transaction_id: &TransactionId)
        -> Result<Option<CreditTransaction>>;

    /// List transactions for a user, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_transactions(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>>;

    // =========================================================================
    // Balance projection
    // =========================================================================

    /// Read the cached balance alongside the recomputed log sum.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the user doesn't exist.
    async fn snapshot(&self, user_id: &UserId) -> Result<BalanceSnapshot>;

    /// Write the projection directly. Rejected with
    /// `StoreError::ProjectionMismatch` unless `balance` equals the log sum.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ProjectionMismatch` or `StoreError::NotFound`.
    async fn write_balance(&self, user_id: &UserId, balance: i64) -> Result<()>;

    /// Overwrite the projection without consulting the log.
    ///
    /// Models writes that bypassed the ledger (legacy imports, manual
    /// fixes). Never called from a request path; reconciliation repairs
    /// whatever this leaves behind.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the user doesn't exist.
    async fn overwrite_balance_unchecked(&self, user_id: &UserId, balance: i64) -> Result<()>;

    // =========================================================================
    // Ledger operations
    // =========================================================================

    /// Current cached balance.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the user doesn't exist.
    async fn balance(&self, user_id: &UserId) -> Result<i64> {
        self.get_user(user_id)
            .await?
            .map(|u| u.credits_balance)
            .ok_or_else(|| StoreError::user_not_found(user_id))
    }

    /// Credit a confirmed payment, at most once per `(user, payment_reference)`.
    ///
    /// # Errors
    ///
    /// Returns an error for a non-positive amount, a blank reference, an
    /// unknown user, or a storage failure.
    async fn purchase(
        &self,
        user_id: &UserId,
        credits: i64,
        payment_reference: &str,
        description: &str,
    ) -> Result<PurchaseOutcome> {
        let tx = CreditTransaction::purchase(*user_id, credits, payment_reference, description)?;
        match self.append_transaction(tx).await? {
            AppendResult::Posted(posted) => Ok(PurchaseOutcome::Applied(posted)),
            AppendResult::Duplicate {
                transaction_id,
                balance,
            } => Ok(PurchaseOutcome::AlreadyApplied {
                transaction_id,
                balance,
            }),
            other @ AppendResult::InsufficientCredits { .. } => Err(StoreError::Inconsistent(
                format!("purchase was evaluated as a debit: {other:?}"),
            )),
        }
    }

    /// Debit `credits` if the balance covers them; otherwise write nothing.
    ///
    /// # Errors
    ///
    /// Returns an error for a non-positive amount, an unknown user, or a
    /// storage failure. Insufficient credits is an `Ok` outcome.
    async fn spend(&self, user_id: &UserId, credits: i64, description: &str) -> Result<SpendOutcome> {
        let tx = CreditTransaction::usage(*user_id, credits, description)?;
        self.append_transaction(tx).await.and_then(into_spend_outcome)
    }

    /// Return credits to a user, optionally reversing a specific usage row.
    ///
    /// # Errors
    ///
    /// Returns an error for a non-positive amount, an invalid reversal, an
    /// unknown user, or a storage failure.
    async fn refund(
        &self,
        user_id: &UserId,
        credits: i64,
        description: &str,
        reverses: Option<TransactionId>,
    ) -> Result<Posted> {
        let tx = CreditTransaction::refund(*user_id, credits, description, reverses)?;
        self.append_transaction(tx).await.and_then(into_posted)
    }

    /// Apply a signed manual adjustment. Negative adjustments are guarded
    /// exactly like [`Store::spend`].
    ///
    /// # Errors
    ///
    /// Returns an error for a zero amount, an unknown user, or a storage failure.
    async fn adjust(&self, user_id: &UserId, amount: i64, description: &str) -> Result<SpendOutcome> {
        let tx = CreditTransaction::adjustment(*user_id, amount, description)?;
        self.append_transaction(tx).await.and_then(into_spend_outcome)
    }
}

fn into_spend_outcome(result: AppendResult) -> Result<SpendOutcome> {
    match result {
        AppendResult::Posted(posted) => Ok(SpendOutcome::Posted(posted)),
        AppendResult::InsufficientCredits { balance, required } => {
            Ok(SpendOutcome::InsufficientCredits { balance, required })
        }
        AppendResult::Duplicate { transaction_id, .. } => Err(StoreError::Inconsistent(format!(
            "debit collided with payment reference of {transaction_id}"
        ))),
    }
}

/// Credits without a payment reference can only be posted.
fn into_posted(result: AppendResult) -> Result<Posted> {
    match result {
        AppendResult::Posted(posted) => Ok(posted),
        other => Err(StoreError::Inconsistent(format!(
            "refund was not applied: {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unposted_refund_is_inconsistent_not_transient() {
        let err = into_posted(AppendResult::InsufficientCredits {
            balance: 0,
            required: 5,
        })
        .unwrap_err();
        assert!(matches!(err, StoreError::Inconsistent(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn debit_reported_as_duplicate_is_inconsistent() {
        let err = into_spend_outcome(AppendResult::Duplicate {
            transaction_id: TransactionId::generate(),
            balance: 10,
        })
        .unwrap_err();
        assert!(matches!(err, StoreError::Inconsistent(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn insufficient_credits_is_a_spend_outcome() {
        let outcome = into_spend_outcome(AppendResult::InsufficientCredits {
            balance: 2,
            required: 3,
        })
        .unwrap();
        assert!(matches!(
            outcome,
            SpendOutcome::InsufficientCredits {
                balance: 2,
                required: 3
            }
        ));
    }
}
