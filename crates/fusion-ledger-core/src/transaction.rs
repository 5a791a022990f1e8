//! Credit transaction types.
//!
//! Every change to a user's balance is an appended [`CreditTransaction`].
//! Constructors validate sign and magnitude so a store only ever receives
//! rows that satisfy the log's invariants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};
use crate::{TransactionId, UserId};

/// An immutable credit-affecting event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditTransaction {
    /// Unique transaction ID (ULID for time-ordering).
    pub id: TransactionId,

    /// The user whose balance was affected.
    pub user_id: UserId,

    /// Signed amount in credits. Positive = credit, negative = debit. Never zero.
    pub amount: i64,

    /// Type of transaction.
    pub transaction_type: TransactionType,

    /// Human-readable audit note.
    pub description: String,

    /// External payment-session identifier; set on purchases only.
    pub payment_reference: Option<String>,

    /// Usage transaction this refund reverses, when known.
    pub reverses_transaction_id: Option<TransactionId>,

    /// When the transaction was created.
    pub created_at: DateTime<Utc>,
}

impl CreditTransaction {
    fn new(
        user_id: UserId,
        amount: i64,
        transaction_type: TransactionType,
        description: String,
    ) -> Self {
        Self {
            id: TransactionId::generate(),
            user_id,
            amount,
            transaction_type,
            description,
            payment_reference: None,
            reverses_transaction_id: None,
            created_at: Utc::now(),
        }
    }

    /// Create a purchase transaction for a confirmed payment.
    ///
    /// # Errors
    ///
    /// Returns an error if `credits` is not positive or `payment_reference` is blank.
    pub fn purchase(
        user_id: UserId,
        credits: i64,
        payment_reference: &str,
        description: impl Into<String>,
    ) -> Result<Self> {
        ensure_positive(credits)?;
        let payment_reference = payment_reference.trim();
        if payment_reference.is_empty() {
            return Err(LedgerError::MissingPaymentReference);
        }

        let mut tx = Self::new(user_id, credits, TransactionType::Purchase, description.into());
        tx.payment_reference = Some(payment_reference.to_string());
        Ok(tx)
    }

    /// Create a usage transaction (debit). The stored amount is `-credits`.
    ///
    /// # Errors
    ///
    /// Returns an error if `credits` is not positive.
    pub fn usage(user_id: UserId, credits: i64, description: impl Into<String>) -> Result<Self> {
        ensure_positive(credits)?;
        Ok(Self::new(
            user_id,
            -credits,
            TransactionType::Usage,
            description.into(),
        ))
    }

    /// Create a refund transaction, optionally linked to the debit it reverses.
    ///
    /// # Errors
    ///
    /// Returns an error if `credits` is not positive.
    pub fn refund(
        user_id: UserId,
        credits: i64,
        description: impl Into<String>,
        reverses: Option<TransactionId>,
    ) -> Result<Self> {
        ensure_positive(credits)?;
        let mut tx = Self::new(user_id, credits, TransactionType::Refund, description.into());
        tx.reverses_transaction_id = reverses;
        Ok(tx)
    }

    /// Create a manual adjustment (support grants, test credits, corrections).
    ///
    /// # Errors
    ///
    /// Returns an error if `amount` is zero.
    pub fn adjustment(user_id: UserId, amount: i64, description: impl Into<String>) -> Result<Self> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount(
                "adjustment amount must be non-zero".into(),
            ));
        }
        if amount == i64::MIN {
            return Err(LedgerError::InvalidAmount("adjustment amount out of range".into()));
        }
        Ok(Self::new(
            user_id,
            amount,
            TransactionType::Adjustment,
            description.into(),
        ))
    }

    /// Whether applying this row lowers the balance.
    #[must_use]
    pub const fn is_debit(&self) -> bool {
        self.amount < 0
    }
}

fn ensure_positive(credits: i64) -> Result<()> {
    if credits <= 0 {
        return Err(LedgerError::InvalidAmount(format!(
            "credits must be positive, got {credits}"
        )));
    }
    Ok(())
}

/// Type of credit transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Credits bought through the payment provider.
    Purchase,

    /// Credits consumed by a fusion generation.
    Usage,

    /// Credits returned after a failed generation.
    Refund,

    /// Manual or test adjustment of either sign.
    Adjustment,
}

impl TransactionType {
    /// Stable lowercase name, as stored in the database enum.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::Usage => "usage",
            Self::Refund => "refund",
            Self::Adjustment => "adjustment",
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransactionType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "purchase" => Ok(Self::Purchase),
            "usage" => Ok(Self::Usage),
            "refund" => Ok(Self::Refund),
            "adjustment" | "test" => Ok(Self::Adjustment),
            other => Err(LedgerError::UnknownTransactionType(other.to_owned())),
        }
    }
}

/// A transaction that was appended, with the balance right after it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posted {
    /// The appended row.
    pub transaction: CreditTransaction,
    /// Balance after the row was applied.
    pub balance: i64,
}

/// Result of a guarded debit (`spend`, or a negative adjustment).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SpendOutcome {
    /// The debit was written.
    Posted(Posted),

    /// Balance too low; nothing was written.
    InsufficientCredits {
        /// Balance at the time of the check.
        balance: i64,
        /// Credits that were requested.
        required: i64,
    },
}

impl SpendOutcome {
    /// Balance after the operation (unchanged when rejected).
    #[must_use]
    pub const fn balance(&self) -> i64 {
        match self {
            Self::Posted(posted) => posted.balance,
            Self::InsufficientCredits { balance, .. } => *balance,
        }
    }

    /// Whether the debit was written.
    #[must_use]
    pub const fn is_posted(&self) -> bool {
        matches!(self, Self::Posted(_))
    }
}

/// Result of applying a payment confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PurchaseOutcome {
    /// First delivery: the purchase row was written.
    Applied(Posted),

    /// The payment reference was already applied for this user; nothing was written.
    AlreadyApplied {
        /// The row written by the first delivery.
        transaction_id: TransactionId,
        /// Current balance.
        balance: i64,
    },
}

impl PurchaseOutcome {
    /// Current balance after the call.
    #[must_use]
    pub const fn balance(&self) -> i64 {
        match self {
            Self::Applied(posted) => posted.balance,
            Self::AlreadyApplied { balance, .. } => *balance,
        }
    }

    /// The purchase row's ID, whether written now or previously.
    #[must_use]
    pub const fn transaction_id(&self) -> TransactionId {
        match self {
            Self::Applied(posted) => posted.transaction.id,
            Self::AlreadyApplied { transaction_id, .. } => *transaction_id,
        }
    }

    /// Whether this call was a replay.
    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        matches!(self, Self::AlreadyApplied { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_type_names_parse() {
        for kind in [
            TransactionType::Purchase,
            TransactionType::Usage,
            TransactionType::Refund,
            TransactionType::Adjustment,
        ] {
            assert_eq!(kind.as_str().parse::<TransactionType>().unwrap(), kind);
        }
        assert_eq!(
            "test".parse::<TransactionType>().unwrap(),
            TransactionType::Adjustment
        );
        assert_eq!(
            "giveaway".parse::<TransactionType>(),
            Err(LedgerError::UnknownTransactionType("giveaway".into()))
        );
    }

    #[test]
    fn purchase_requires_reference() {
        let user_id = UserId::generate();
        let tx = CreditTransaction::purchase(user_id, 20, "pay_abc", "Standard Pack").unwrap();
        assert_eq!(tx.amount, 20);
        assert_eq!(tx.transaction_type, TransactionType::Purchase);
        assert_eq!(tx.payment_reference.as_deref(), Some("pay_abc"));

        assert_eq!(
            CreditTransaction::purchase(user_id, 20, "  ", "x"),
            Err(LedgerError::MissingPaymentReference)
        );
    }

    #[test]
    fn usage_is_stored_negative() {
        let tx = CreditTransaction::usage(UserId::generate(), 5, "fusion").unwrap();
        assert_eq!(tx.amount, -5);
        assert!(tx.is_debit());
        assert_eq!(tx.transaction_type, TransactionType::Usage);
    }

    #[test]
    fn non_positive_credits_rejected() {
        let user_id = UserId::generate();
        assert!(CreditTransaction::usage(user_id, 0, "x").is_err());
        assert!(CreditTransaction::usage(user_id, -1, "x").is_err());
        assert!(CreditTransaction::refund(user_id, 0, "x", None).is_err());
        assert!(CreditTransaction::purchase(user_id, -20, "pay", "x").is_err());
    }

    #[test]
    fn refund_carries_reversal_link() {
        let debit = CreditTransaction::usage(UserId::generate(), 1, "fusion").unwrap();
        let refund =
            CreditTransaction::refund(debit.user_id, 1, "refund", Some(debit.id)).unwrap();
        assert_eq!(refund.amount, 1);
        assert_eq!(refund.reverses_transaction_id, Some(debit.id));
    }

    #[test]
    fn adjustment_allows_either_sign_but_not_zero() {
        let user_id = UserId::generate();
        assert_eq!(CreditTransaction::adjustment(user_id, -3, "fix").unwrap().amount, -3);
        assert_eq!(CreditTransaction::adjustment(user_id, 7, "grant").unwrap().amount, 7);
        assert!(CreditTransaction::adjustment(user_id, 0, "noop").is_err());
    }

    #[test]
    fn transaction_type_names() {
        assert_eq!(TransactionType::Usage.as_str(), "usage");
        assert_eq!("test".parse::<TransactionType>().unwrap(), TransactionType::Adjustment);
        assert!("bogus".parse::<TransactionType>().is_err());
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let outcome = SpendOutcome::InsufficientCredits {
            balance: 0,
            required: 1,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "insufficient_credits");
        assert_eq!(outcome.balance(), 0);
        assert!(!outcome.is_posted());
    }
}
