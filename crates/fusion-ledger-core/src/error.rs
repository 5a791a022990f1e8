//! Error types for the credit ledger.

use crate::ids::IdError;

/// Result type for ledger validation.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors raised while validating ledger inputs.
///
/// Insufficient credits and duplicate payments are not errors: they are
/// reported through [`crate::SpendOutcome`] and [`crate::PurchaseOutcome`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// Amount was zero, negative where a positive value is required, or overflowed.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// A purchase was submitted without a payment reference.
    #[error("payment reference must not be empty")]
    MissingPaymentReference,

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    /// Stored transaction type name this build does not know.
    #[error("unknown transaction type: {0}")]
    UnknownTransactionType(String),

    /// Credit package id not present in the catalog.
    #[error("unknown credit package: {0}")]
    UnknownPackage(String),
}
