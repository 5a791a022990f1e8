//! Core types for the fusion credit ledger.
//!
//! This crate provides the foundational types shared by the store and the service:
//!
//! - **Identifiers**: `UserId`, `TransactionId`, `ExternalUserId`
//! - **Users**: `User`, carrying the cached balance projection
//! - **Transactions**: `CreditTransaction`, `TransactionType`, `SpendOutcome`, `PurchaseOutcome`
//! - **Balances**: `BalanceSnapshot`, `BalanceCorrection`, `ReconciliationReport`
//! - **Packages**: `CreditPackage`, `PackageCatalog`
//!
//! # Credits
//!
//! One credit pays for one fusion image. Amounts are signed `i64` credit
//! counts: purchases and refunds are positive, usage is negative. A user's
//! true balance is always the sum of their transaction amounts.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod balance;
pub mod error;
pub mod ids;
pub mod packages;
pub mod transaction;
pub mod user;

pub use balance::{ledger_sum, BalanceCorrection, BalanceSnapshot, ReconciliationReport};
pub use error::{LedgerError, Result};
pub use ids::{ExternalUserId, IdError, TransactionId, UserId, MAX_EXTERNAL_ID_LEN};
pub use packages::{CreditPackage, PackageCatalog};
pub use transaction::{CreditTransaction, Posted, PurchaseOutcome, SpendOutcome, TransactionType};
pub use user::User;
