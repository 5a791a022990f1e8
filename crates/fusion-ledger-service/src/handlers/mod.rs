//! API handlers.

pub mod admin;
pub mod credits;
pub mod health;
pub mod usage;
pub mod webhooks;

use fusion_ledger_core::{ExternalUserId, User};

use crate::error::ApiError;
use crate::state::AppState;

/// Parse an identity-provider subject supplied by a trusted caller.
pub(crate) fn parse_external_id(raw: &str) -> Result<ExternalUserId, ApiError> {
    ExternalUserId::new(raw).map_err(|e| ApiError::BadRequest(format!("Invalid user ID: {e}")))
}

/// Resolve a user for a ledger write, provisioning a zero-balance user on first sight.
pub(crate) async fn provision_user(state: &AppState, raw: &str) -> Result<User, ApiError> {
    let external_id = parse_external_id(raw)?;
    Ok(state.store.ensure_user(&external_id).await?)
}

/// Resolve a user an admin names. Unknown users are never provisioned here.
pub(crate) async fn find_user(state: &AppState, raw: &str) -> Result<User, ApiError> {
    let external_id = parse_external_id(raw)?;
    state
        .store
        .find_user(&external_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("user not found: {external_id}")))
}
