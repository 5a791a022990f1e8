//! `Stripe-Signature` header verification.
//!
//! The header has the form `t=<unix seconds>,v1=<hex hmac>[,v1=...]`, where
//! each `v1` is HMAC-SHA256 over `"{t}.{raw body}"` keyed by the endpoint's
//! signing secret.

use crate::crypto::{constant_time_eq, hmac_sha256_hex};

/// Default maximum age of a signed event.
pub const DEFAULT_TOLERANCE_SECONDS: i64 = 300;

/// Why a webhook signature was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    /// The header lacks a timestamp or any `v1` signature.
    #[error("malformed signature header")]
    Malformed,

    /// The signed timestamp is outside the tolerance window.
    #[error("signature timestamp outside tolerance ({age_seconds}s)")]
    Expired {
        /// Distance between the signed timestamp and now.
        age_seconds: i64,
    },

    /// No `v1` signature matched.
    #[error("signature mismatch")]
    Mismatch,
}

/// Verify `header` against the raw request body.
///
/// # Errors
///
/// Returns a [`SignatureError`] describing the first check that failed.
pub fn verify_signature(
    payload: &str,
    header: &str,
    secret: &str,
    tolerance_seconds: i64,
    now: i64,
) -> Result<(), SignatureError> {
    let mut timestamp: Option<&str> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", ts)) => timestamp = Some(ts),
            Some(("v1", sig)) => signatures.push(sig),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    let signed_at: i64 = timestamp.parse().map_err(|_| SignatureError::Malformed)?;
    if signatures.is_empty() {
        return Err(SignatureError::Malformed);
    }

    let age_seconds = now.saturating_sub(signed_at);
    if age_seconds.abs() > tolerance_seconds {
        return Err(SignatureError::Expired { age_seconds });
    }

    let expected = hmac_sha256_hex(secret, &format!("{timestamp}.{payload}"));
    if signatures.iter().any(|sig| constant_time_eq(&expected, sig)) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Build a `Stripe-Signature` header for `payload` signed at `timestamp`.
///
/// Used to replay events against a local instance.
#[must_use]
pub fn sign_payload(payload: &str, secret: &str, timestamp: i64) -> String {
    let signature = hmac_sha256_hex(secret, &format!("{timestamp}.{payload}"));
    format!("t={timestamp},v1={signature}")
}
