//! Key encoding for the `RocksDB` column families.

use fusion_ledger_core::{ExternalUserId, TransactionId, UserId};

/// Length of a user-log key: `user_id (16) || seq (8, big-endian)`.
pub const USER_LOG_KEY_LEN: usize = 24;

/// Key of a user record.
#[must_use]
pub fn user_key(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// Key of the subject -> user index.
#[must_use]
pub fn external_key(external_id: &ExternalUserId) -> Vec<u8> {
    external_id.as_str().as_bytes().to_vec()
}

/// Key of a transaction record.
#[must_use]
pub fn transaction_key(transaction_id: &TransactionId) -> Vec<u8> {
    transaction_id.to_bytes().to_vec()
}

/// Key of the `seq`-th entry in a user's log.
///
/// Big-endian `seq` keeps a forward scan in append order, independent of
/// how ULIDs minted in the same millisecond happen to sort.
#[must_use]
pub fn user_log_key(user_id: &UserId, seq: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(USER_LOG_KEY_LEN);
    key.extend_from_slice(user_id.as_bytes());
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

/// Prefix shared by every entry of a user's log.
#[must_use]
pub fn user_log_prefix(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// Key of the `(user, payment_reference)` idempotency index.
#[must_use]
pub fn payment_reference_key(user_id: &UserId, payment_reference: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(16 + payment_reference.len());
    key.extend_from_slice(user_id.as_bytes());
    key.extend_from_slice(payment_reference.as_bytes());
    key
}

/// Decode a 16-byte user ID.
#[must_use]
pub fn decode_user_id(bytes: &[u8]) -> Option<UserId> {
    <[u8; 16]>::try_from(bytes).ok().map(UserId::from_bytes)
}

/// Decode a 16-byte transaction ID.
#[must_use]
pub fn decode_transaction_id(bytes: &[u8]) -> Option<TransactionId> {
    <[u8; 16]>::try_from(bytes).ok().map(TransactionId::from_bytes)
}
