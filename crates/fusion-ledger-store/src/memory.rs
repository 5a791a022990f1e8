//! In-process storage backend.
//!
//! One async mutex guards all state, so every append is trivially atomic and
//! appends for the same user are serialized. Nothing survives a restart.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use fusion_ledger_core::{
    ledger_sum, BalanceSnapshot, CreditTransaction, ExternalUserId, Posted, TransactionId, User,
    UserId,
};

use crate::error::{Result, StoreError};
use crate::guard::{evaluate, AppendContext, Verdict};
use crate::{AppendResult, Store};

#[derive(Default)]
struct Inner {
    users: HashMap<UserId, User>,
    users_by_external: HashMap<ExternalUserId, UserId>,
    transactions: HashMap<TransactionId, CreditTransaction>,
    /// Per-user log in append order.
    transactions_by_user: HashMap<UserId, Vec<TransactionId>>,
    payment_references: HashMap<(UserId, String), TransactionId>,
}

impl Inner {
    fn user_log(&self, user_id: &UserId) -> impl Iterator<Item = &CreditTransaction> {
        self.transactions_by_user
            .get(user_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.transactions.get(id))
    }

    fn user_mut(&mut self, user_id: &UserId) -> Result<&mut User> {
        self.users
            .get_mut(user_id)
            .ok_or_else(|| StoreError::user_not_found(user_id))
    }
}

/// In-memory storage implementation.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ensure_user(&self, external_id: &ExternalUserId) -> Result<User> {
        let mut inner = self.inner.lock().await;

        if let Some(user) = inner
            .users_by_external
            .get(external_id)
            .and_then(|id| inner.users.get(id))
        {
            return Ok(user.clone());
        }

        let user = User::new(external_id.clone());
        inner.users_by_external.insert(external_id.clone(), user.id);
        inner.users.insert(user.id, user.clone());
        tracing::debug!(user_id = %user.id, external_id = %external_id, "User provisioned");
        Ok(user)
    }

    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>> {
        Ok(self.inner.lock().await.users.get(user_id).cloned())
    }

    async fn find_user(&self, external_id: &ExternalUserId) -> Result<Option<User>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .users_by_external
            .get(external_id)
            .and_then(|id| inner.users.get(id))
            .cloned())
    }

    async fn list_user_ids(&self) -> Result<Vec<UserId>> {
        let inner = self.inner.lock().await;
        let mut ids: Vec<_> = inner.users.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn append_transaction(&self, transaction: CreditTransaction) -> Result<AppendResult> {
        let mut inner = self.inner.lock().await;
        let user_id = transaction.user_id;

        if !inner.users.contains_key(&user_id) {
            return Err(StoreError::user_not_found(user_id));
        }

        let balance = ledger_sum(inner.user_log(&user_id));
        let duplicate_of = transaction
            .payment_reference
            .as_ref()
            .and_then(|r| inner.payment_references.get(&(user_id, r.clone())))
            .copied();
        let reversed = transaction
            .reverses_transaction_id
            .and_then(|id| inner.transactions.get(&id));
        let already_refunded = transaction
            .reverses_transaction_id
            .map_or(0, |id| {
                ledger_sum(
                    inner
                        .user_log(&user_id)
                        .filter(|tx| tx.reverses_transaction_id == Some(id)),
                )
            });

        let verdict = evaluate(
            &transaction,
            &AppendContext {
                balance,
                duplicate_of,
                reversed,
                already_refunded,
            },
        )?;

        let new_balance = match verdict {
            Verdict::Accept { new_balance } => new_balance,
            Verdict::Reject(result) => return Ok(result),
        };

        if let Some(reference) = &transaction.payment_reference {
            inner
                .payment_references
                .insert((user_id, reference.clone()), transaction.id);
        }
        inner
            .transactions_by_user
            .entry(user_id)
            .or_default()
            .push(transaction.id);
        inner.transactions.insert(transaction.id, transaction.clone());

        let user = inner.user_mut(&user_id)?;
        user.credits_balance = new_balance;
        user.updated_at = Utc::now();

        Ok(AppendResult::Posted(Posted {
            transaction,
            balance: new_balance,
        }))
    }

    async fn get_transaction(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Option<CreditTransaction>> {
        Ok(self
            .inner
            .lock()
            .await
            .transactions
            .get(transaction_id)
            .cloned())
    }

    async fn list_transactions(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>> {
        let inner = self.inner.lock().await;
        let mut log: Vec<_> = inner.user_log(user_id).cloned().collect();
        log.reverse();
        Ok(log.into_iter().skip(offset).take(limit).collect())
    }

    async fn snapshot(&self, user_id: &UserId) -> Result<BalanceSnapshot> {
        let inner = self.inner.lock().await;
        let user = inner
            .users
            .get(user_id)
            .ok_or_else(|| StoreError::user_not_found(user_id))?;

        Ok(BalanceSnapshot {
            user_id: *user_id,
            cached_balance: user.credits_balance,
            calculated_balance: ledger_sum(inner.user_log(user_id)),
            transaction_count: inner.user_log(user_id).count() as u64,
        })
    }

    async fn write_balance(&self, user_id: &UserId, balance: i64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let expected = ledger_sum(inner.user_log(user_id));
        let user = inner.user_mut(user_id)?;

        if balance != expected {
            return Err(StoreError::ProjectionMismatch {
                user_id: *user_id,
                expected,
                attempted: balance,
            });
        }

        user.credits_balance = balance;
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn overwrite_balance_unchecked(&self, user_id: &UserId, balance: i64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let user = inner.user_mut(user_id)?;
        user.credits_balance = balance;
        user.updated_at = Utc::now();
        Ok(())
    }
}
