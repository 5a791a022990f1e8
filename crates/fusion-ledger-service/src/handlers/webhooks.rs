//! Stripe webhook handler.
//!
//! A paid `checkout.session.completed` event is the only thing that grants
//! purchased credits. The session ID is the payment reference, so Stripe's
//! redeliveries land on the ledger's idempotency check and are acknowledged
//! without a second credit.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;

use crate::error::ApiError;
use crate::handlers::parse_external_id;
use crate::state::AppState;
use crate::stripe::{verify_signature, CheckoutSession, Event, CHECKOUT_SESSION_COMPLETED};

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Whether the webhook was processed.
    pub received: bool,
    /// Set when the event had already been applied.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub duplicate: bool,
}

/// Handle Stripe webhooks.
pub async fn stripe_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookResponse>, ApiError> {
    let Some(secret) = &state.config.stripe_webhook_secret else {
        tracing::error!("Stripe webhook secret not configured - rejecting webhook");
        return Err(ApiError::Forbidden);
    };

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("Missing Stripe signature".into()))?;

    verify_signature(
        &body,
        signature,
        secret,
        state.config.stripe_signature_tolerance_seconds,
        chrono::Utc::now().timestamp(),
    )
    .map_err(|e| {
        tracing::warn!(error = %e, "Invalid Stripe webhook signature");
        ApiError::BadRequest("Invalid webhook signature".into())
    })?;

    let event: Event =
        serde_json::from_str(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    tracing::info!(
        event_type = %event.event_type,
        event_id = %event.id,
        "Received Stripe webhook"
    );

    let duplicate = if event.event_type == CHECKOUT_SESSION_COMPLETED {
        handle_checkout_completed(&state, event.data.object).await?
    } else {
        tracing::debug!(event_type = %event.event_type, "Unhandled Stripe event");
        false
    };

    Ok(Json(WebhookResponse {
        received: true,
        duplicate,
    }))
}

/// Credit a completed checkout. Returns whether it was a redelivery.
async fn handle_checkout_completed(
    state: &AppState,
    object: serde_json::Value,
) -> Result<bool, ApiError> {
    let session: CheckoutSession = serde_json::from_value(object)
        .map_err(|e| ApiError::BadRequest(format!("Invalid checkout session: {e}")))?;

    if !session.is_paid() {
        tracing::info!(
            session_id = %session.id,
            payment_status = ?session.payment_status,
            "Checkout completed without payment, nothing to credit"
        );
        return Ok(false);
    }

    let external_id = session
        .client_reference_id
        .as_deref()
        .ok_or_else(|| ApiError::BadRequest("Missing client_reference_id".into()))
        .and_then(parse_external_id)?;

    let (credits, description) = credits_for_session(state, &session)?;

    let user = state.store.ensure_user(&external_id).await?;
    let outcome = state
        .store
        .purchase(&user.id, credits, &session.id, &description)
        .await?;

    if outcome.is_duplicate() {
        tracing::info!(
            session_id = %session.id,
            user_id = %user.id,
            transaction_id = %outcome.transaction_id(),
            "Checkout already applied"
        );
    } else {
        tracing::info!(
            session_id = %session.id,
            user_id = %user.id,
            transaction_id = %outcome.transaction_id(),
            credits,
            amount_total = ?session.amount_total,
            balance = outcome.balance(),
            "Credits purchased"
        );
    }

    Ok(outcome.is_duplicate())
}

/// Credits granted by a session: an explicit `credits` metadata value wins,
/// otherwise `package_id` is looked up in the catalog.
fn credits_for_session(
    state: &AppState,
    session: &CheckoutSession,
) -> Result<(i64, String), ApiError> {
    if let Some(raw) = session.metadata.get("credits") {
        let credits: i64 = raw
            .parse()
            .map_err(|_| ApiError::BadRequest(format!("Invalid credits metadata: {raw}")))?;
        return Ok((credits, format!("Purchased {credits} credits")));
    }

    if let Some(package_id) = session.metadata.get("package_id") {
        let package = state.packages.get(package_id)?;
        return Ok((package.credits, package.name.clone()));
    }

    Err(ApiError::BadRequest(
        "Checkout session metadata names neither credits nor package_id".into(),
    ))
}
