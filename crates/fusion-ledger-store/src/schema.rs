//! Column families of the `RocksDB` backend.

/// Column family names.
pub mod cf {
    /// User records (CBOR), keyed by `user_id`.
    pub const USERS: &str = "users";

    /// Index: identity-provider subject -> `user_id`.
    pub const USERS_BY_EXTERNAL: &str = "users_by_external";

    /// Credit transactions (CBOR), keyed by `transaction_id` (ULID).
    pub const TRANSACTIONS: &str = "transactions";

    /// Per-user log in append order, keyed by `user_id || seq`.
    /// Value is the transaction ID.
    pub const TRANSACTIONS_BY_USER: &str = "transactions_by_user";

    /// Idempotency index, keyed by `user_id || payment_reference`.
    /// Value is the transaction ID holding the reference.
    pub const PAYMENT_REFERENCES: &str = "payment_references";
}

/// Every column family, for opening the database.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::USERS,
        cf::USERS_BY_EXTERNAL,
        cf::TRANSACTIONS,
        cf::TRANSACTIONS_BY_USER,
        cf::PAYMENT_REFERENCES,
    ]
}
