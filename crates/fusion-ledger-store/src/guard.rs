//! Append-time checks shared by every backend.
//!
//! A backend gathers the facts below inside its own critical section (mutex,
//! write lock, or locked row) and asks [`evaluate`] whether the row may be
//! written. Keeping the rules in one place keeps the backends in agreement.

use fusion_ledger_core::{CreditTransaction, LedgerError, TransactionId, TransactionType};

use crate::error::{Result, StoreError};
use crate::AppendResult;

/// Facts about the user's log at the moment of the append.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AppendContext<'a> {
    /// Current true balance.
    pub balance: i64,
    /// Row already holding this `(user, payment_reference)`, if any.
    pub duplicate_of: Option<TransactionId>,
    /// The row named by `reverses_transaction_id`, if it exists.
    pub reversed: Option<&'a CreditTransaction>,
    /// Sum of refunds already linked to `reversed`.
    pub already_refunded: i64,
}

/// Decision for a pending append.
#[derive(Debug)]
pub(crate) enum Verdict {
    /// Write the row; the projection becomes `new_balance`.
    Accept { new_balance: i64 },
    /// Write nothing and report this result.
    Reject(AppendResult),
}

pub(crate) fn evaluate(tx: &CreditTransaction, ctx: &AppendContext<'_>) -> Result<Verdict> {
    if let Some(transaction_id) = ctx.duplicate_of {
        return Ok(Verdict::Reject(AppendResult::Duplicate {
            transaction_id,
            balance: ctx.balance,
        }));
    }

    if let Some(reversed_id) = tx.reverses_transaction_id {
        check_reversal(tx, reversed_id, ctx)?;
    }

    let new_balance = ctx
        .balance
        .checked_add(tx.amount)
        .ok_or_else(|| LedgerError::InvalidAmount("balance overflow".into()))?;

    if tx.is_debit() && new_balance < 0 {
        return Ok(Verdict::Reject(AppendResult::InsufficientCredits {
            balance: ctx.balance,
            required: tx.amount.saturating_neg(),
        }));
    }

    Ok(Verdict::Accept { new_balance })
}

fn check_reversal(
    tx: &CreditTransaction,
    reversed_id: TransactionId,
    ctx: &AppendContext<'_>,
) -> Result<()> {
    if tx.transaction_type != TransactionType::Refund {
        return Err(StoreError::InvalidReversal(
            "only refunds may reverse a transaction".into(),
        ));
    }

    let debit = ctx
        .reversed
        .filter(|d| d.id == reversed_id && d.user_id == tx.user_id)
        .ok_or_else(|| {
            StoreError::InvalidReversal(format!("transaction {reversed_id} not found for user"))
        })?;

    if debit.transaction_type != TransactionType::Usage {
        return Err(StoreError::InvalidReversal(format!(
            "transaction {reversed_id} is a {}, not a usage debit",
            debit.transaction_type
        )));
    }

    let refundable = debit.amount.saturating_neg() - ctx.already_refunded;
    if tx.amount > refundable {
        return Err(StoreError::InvalidReversal(format!(
            "refund of {} exceeds the {refundable} credits still refundable on {reversed_id}",
            tx.amount
        )));
    }

    Ok(())
}
