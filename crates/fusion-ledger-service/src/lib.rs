//! HTTP API for the fusion credit ledger.
//!
//! This crate exposes the ledger to three kinds of caller:
//!
//! - **Users**, with an identity-provider JWT: read their balance, history
//!   and the package catalog
//! - **The fusion workflow**, with a service API key: debit one credit per
//!   generation and refund it if generation fails
//! - **Operators**, with an admin key: verify and reconcile balance
//!   projections, and post manual adjustments
//!
//! Purchased credits arrive only through the Stripe webhook, keyed by the
//! checkout session ID so redeliveries never credit twice.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // health handler has nothing to await

pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;
pub mod stripe;
pub mod tasks;

pub use config::{ServiceConfig, StorageBackend};
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
pub use tasks::spawn_reconciliation;
