//! Stripe event payloads.

use std::collections::HashMap;

use serde::Deserialize;

/// Event type that grants credits.
pub const CHECKOUT_SESSION_COMPLETED: &str = "checkout.session.completed";

/// A webhook event envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct Event {
    /// Event ID.
    pub id: String,
    /// Event type, e.g. `checkout.session.completed`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event data.
    pub data: EventData,
}

/// Event data container.
#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    /// The object the event is about; its shape depends on `event_type`.
    pub object: serde_json::Value,
}

/// Stripe Checkout session object.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    /// Session ID. Used as the purchase's payment reference.
    pub id: String,
    /// `paid`, `unpaid` or `no_payment_required`.
    #[serde(default)]
    pub payment_status: Option<String>,
    /// Our identity-provider subject, set when the session was created.
    #[serde(default)]
    pub client_reference_id: Option<String>,
    /// Total amount in cents.
    #[serde(default)]
    pub amount_total: Option<i64>,
    /// Session metadata; carries `credits` or `package_id`.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl CheckoutSession {
    /// Whether the customer has paid.
    #[must_use]
    pub fn is_paid(&self) -> bool {
        self.payment_status.as_deref() == Some("paid")
    }
}
