//! Stripe webhook boundary: signature verification and the event payloads
//! the ledger consumes.

pub mod signature;
pub mod types;

pub use signature::{sign_payload, verify_signature, SignatureError, DEFAULT_TOLERANCE_SECONDS};
pub use types::{CheckoutSession, Event, EventData, CHECKOUT_SESSION_COMPLETED};
