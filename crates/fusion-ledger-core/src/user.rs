//! Ledger user records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ExternalUserId, UserId};

/// A user known to the ledger.
///
/// `credits_balance` is the balance projection: a cached copy of the sum of
/// the user's transactions. It is only ever written by the store while
/// appending a transaction, or by reconciliation with the recomputed sum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Internal user ID.
    pub id: UserId,

    /// Identity-provider subject this user maps to (1:1).
    pub external_id: ExternalUserId,

    /// Cached balance in credits.
    pub credits_balance: i64,

    /// When the user was first seen.
    pub created_at: DateTime<Utc>,

    /// When the projection was last written.
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Create a freshly provisioned user with zero balance.
    #[must_use]
    pub fn new(external_id: ExternalUserId) -> Self {
        let now = Utc::now();
        Self {
            id: UserId::generate(),
            external_id,
            credits_balance: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
