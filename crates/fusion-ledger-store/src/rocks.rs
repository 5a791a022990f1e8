//! `RocksDB` storage backend.
//!
//! Every mutation takes a store-wide write lock, reads what the append guard
//! needs, and commits all of its keys in one `WriteBatch`. Reads never take
//! the lock.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};

use fusion_ledger_core::{
    ledger_sum, BalanceSnapshot, CreditTransaction, ExternalUserId, Posted, TransactionId, User,
    UserId,
};

use crate::error::{Result, StoreError};
use crate::guard::{evaluate, AppendContext, Verdict};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::{AppendResult, Store};

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
        })
    }

    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| StoreError::Database("write lock poisoned".into()))
    }

    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn get<T: serde::de::DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn get_transaction_id(&self, cf_name: &str, key: &[u8]) -> Result<Option<TransactionId>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)?
            .map(|raw| {
                keys::decode_transaction_id(&raw).ok_or_else(|| {
                    StoreError::Serialization(format!("malformed transaction id in {cf_name}"))
                })
            })
            .transpose()
    }

    fn load_user(&self, user_id: &UserId) -> Result<User> {
        self.get(cf::USERS, &keys::user_key(user_id))?
            .ok_or_else(|| StoreError::user_not_found(user_id))
    }

    fn load_transaction(&self, transaction_id: &TransactionId) -> Result<Option<CreditTransaction>> {
        self.get(cf::TRANSACTIONS, &keys::transaction_key(transaction_id))
    }

    /// The user's log in append order.
    fn user_log(&self, user_id: &UserId) -> Result<Vec<CreditTransaction>> {
        let cf_log = self.cf(cf::TRANSACTIONS_BY_USER)?;
        let prefix = keys::user_log_prefix(user_id);
        let iter = self
            .db
            .iterator_cf(&cf_log, IteratorMode::From(&prefix, Direction::Forward));

        let mut log = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let tx_id = keys::decode_transaction_id(&value).ok_or_else(|| {
                StoreError::Serialization("malformed user log entry".into())
            })?;
            let tx = self.load_transaction(&tx_id)?.ok_or_else(|| {
                StoreError::Serialization(format!("user log points at missing transaction {tx_id}"))
            })?;
            log.push(tx);
        }
        Ok(log)
    }

    fn put_user(&self, batch: &mut WriteBatch, user: &User) -> Result<()> {
        let cf_users = self.cf(cf::USERS)?;
        batch.put_cf(&cf_users, keys::user_key(&user.id), Self::serialize(user)?);
        Ok(())
    }

    fn ensure_user_blocking(&self, external_id: &ExternalUserId) -> Result<User> {
        let _guard = self.lock()?;

        let cf_external = self.cf(cf::USERS_BY_EXTERNAL)?;
        let external_key = keys::external_key(external_id);
        if let Some(raw) = self.db.get_cf(&cf_external, &external_key)? {
            let user_id = keys::decode_user_id(&raw).ok_or_else(|| {
                StoreError::Serialization(format!("malformed user id for {external_id}"))
            })?;
            return self.load_user(&user_id);
        }

        let user = User::new(external_id.clone());
        let mut batch = WriteBatch::default();
        self.put_user(&mut batch, &user)?;
        batch.put_cf(&cf_external, &external_key, user.id.as_bytes());
        self.db.write(batch)?;

        tracing::debug!(user_id = %user.id, external_id = %external_id, "User provisioned");
        Ok(user)
    }

    fn append_blocking(&self, transaction: CreditTransaction) -> Result<AppendResult> {
        let _guard = self.lock()?;
        let user_id = transaction.user_id;

        let mut user = self.load_user(&user_id)?;
        let log = self.user_log(&user_id)?;
        let balance = ledger_sum(&log);

        let reference_key = transaction
            .payment_reference
            .as_deref()
            .map(|r| keys::payment_reference_key(&user_id, r));
        let duplicate_of = match &reference_key {
            Some(key) => self.get_transaction_id(cf::PAYMENT_REFERENCES, key)?,
            None => None,
        };

        let reversed = match &transaction.reverses_transaction_id {
            Some(id) => self.load_transaction(id)?,
            None => None,
        };
        let already_refunded = transaction.reverses_transaction_id.map_or(0, |id| {
            ledger_sum(log.iter().filter(|tx| tx.reverses_transaction_id == Some(id)))
        });

        let verdict = evaluate(
            &transaction,
            &AppendContext {
                balance,
                duplicate_of,
                reversed: reversed.as_ref(),
                already_refunded,
            },
        )?;

        let new_balance = match verdict {
            Verdict::Accept { new_balance } => new_balance,
            Verdict::Reject(result) => return Ok(result),
        };

        user.credits_balance = new_balance;
        user.updated_at = Utc::now();

        let cf_tx = self.cf(cf::TRANSACTIONS)?;
        let cf_log = self.cf(cf::TRANSACTIONS_BY_USER)?;
        let tx_id_bytes = transaction.id.to_bytes();

        let mut batch = WriteBatch::default();
        batch.put_cf(
            &cf_tx,
            keys::transaction_key(&transaction.id),
            Self::serialize(&transaction)?,
        );
        batch.put_cf(&cf_log, keys::user_log_key(&user_id, log.len() as u64), tx_id_bytes);
        if let Some(key) = reference_key {
            let cf_refs = self.cf(cf::PAYMENT_REFERENCES)?;
            batch.put_cf(&cf_refs, key, tx_id_bytes);
        }
        self.put_user(&mut batch, &user)?;
        self.db.write(batch)?;

        Ok(AppendResult::Posted(Posted {
            transaction,
            balance: new_balance,
        }))
    }

    fn write_balance_blocking(&self, user_id: &UserId, balance: i64, checked: bool) -> Result<()> {
        let _guard = self.lock()?;
        let mut user = self.load_user(user_id)?;

        if checked {
            let expected = ledger_sum(&self.user_log(user_id)?);
            if balance != expected {
                return Err(StoreError::ProjectionMismatch {
                    user_id: *user_id,
                    expected,
                    attempted: balance,
                });
            }
        }

        user.credits_balance = balance;
        user.updated_at = Utc::now();
        let mut batch = WriteBatch::default();
        self.put_user(&mut batch, &user)?;
        self.db.write(batch)?;
        Ok(())
    }
}

#[async_trait]
impl Store for RocksStore {
    async fn ensure_user(&self, external_id: &ExternalUserId) -> Result<User> {
        self.ensure_user_blocking(external_id)
    }

    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>> {
        self.get(cf::USERS, &keys::user_key(user_id))
    }

    async fn find_user(&self, external_id: &ExternalUserId) -> Result<Option<User>> {
        let cf_external = self.cf(cf::USERS_BY_EXTERNAL)?;
        let Some(raw) = self.db.get_cf(&cf_external, keys::external_key(external_id))? else {
            return Ok(None);
        };
        let user_id = keys::decode_user_id(&raw)
            .ok_or_else(|| StoreError::Serialization(format!("malformed user id for {external_id}")))?;
        self.get(cf::USERS, &keys::user_key(&user_id))
    }

    async fn list_user_ids(&self) -> Result<Vec<UserId>> {
        let cf_users = self.cf(cf::USERS)?;
        let mut ids = Vec::new();
        for item in self.db.iterator_cf(&cf_users, IteratorMode::Start) {
            let (key, _) = item?;
            let user_id = keys::decode_user_id(&key)
                .ok_or_else(|| StoreError::Serialization("malformed user key".into()))?;
            ids.push(user_id);
        }
        ids.sort_unstable();
        Ok(ids)
    }

    async fn append_transaction(&self, transaction: CreditTransaction) -> Result<AppendResult> {
        self.append_blocking(transaction)
    }

    async fn get_transaction(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Option<CreditTransaction>> {
        self.load_transaction(transaction_id)
    }

    async fn list_transactions(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>> {
        let mut log = self.user_log(user_id)?;
        log.reverse();
        Ok(log.into_iter().skip(offset).take(limit).collect())
    }

    async fn snapshot(&self, user_id: &UserId) -> Result<BalanceSnapshot> {
        let user = self.load_user(user_id)?;
        let log = self.user_log(user_id)?;
        Ok(BalanceSnapshot {
            user_id: *user_id,
            cached_balance: user.credits_balance,
            calculated_balance: ledger_sum(&log),
            transaction_count: log.len() as u64,
        })
    }

    async fn write_balance(&self, user_id: &UserId, balance: i64) -> Result<()> {
        self.write_balance_blocking(user_id, balance, true)
    }

    async fn overwrite_balance_unchecked(&self, user_id: &UserId, balance: i64) -> Result<()> {
        self.write_balance_blocking(user_id, balance, false)
    }
}
