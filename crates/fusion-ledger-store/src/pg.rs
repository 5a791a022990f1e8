//! PostgreSQL storage backend.
//!
//! The database enforces the ledger on its own: an `AFTER INSERT` trigger
//! refreshes `users.credits_balance` from `SUM(amount)`, a `BEFORE UPDATE`
//! trigger rejects any projection write that disagrees with the log, and a
//! partial unique index holds `(user_id, payment_reference)`. Appends call
//! `ledger_append_context`, which locks the user row and returns the guard's
//! inputs in one statement, then insert and commit.

use async_trait::async_trait;
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{PgConnection, Row};
use uuid::Uuid;

use fusion_ledger_core::{
    BalanceSnapshot, CreditTransaction, ExternalUserId, Posted, TransactionId, User, UserId,
};

use crate::error::{Result, StoreError};
use crate::guard::{evaluate, AppendContext, Verdict};
use crate::{AppendResult, Store};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLSTATE raised by the projection guard trigger.
const PROJECTION_MISMATCH: &str = "LD001";

const TRANSACTION_COLUMNS: &str = "id, user_id, amount, transaction_type, description, \
     payment_reference, reverses_transaction_id, created_at";

const USER_COLUMNS: &str = "id, external_id, credits_balance, created_at, updated_at";

/// PostgreSQL-backed storage implementation.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to `database_url` with a pool of up to `max_connections`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is unreachable.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the embedded schema migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn ledger_sum(conn: &mut PgConnection, user_id: &UserId) -> Result<i64> {
        let sum: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0)::BIGINT FROM credit_transactions WHERE user_id = $1",
        )
        .bind(*user_id.as_uuid())
        .fetch_one(conn)
        .await?;
        Ok(sum)
    }

    async fn fetch_transaction(
        conn: &mut PgConnection,
        transaction_id: &TransactionId,
    ) -> Result<Option<CreditTransaction>> {
        let sql = format!("SELECT {TRANSACTION_COLUMNS} FROM credit_transactions WHERE id = $1");
        sqlx::query(&sql)
            .bind(transaction_id.to_string())
            .fetch_optional(conn)
            .await?
            .map(|row| transaction_from_row(&row))
            .transpose()
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ensure_user(&self, external_id: &ExternalUserId) -> Result<User> {
        let candidate = User::new(external_id.clone());
        let inserted = sqlx::query(
            "INSERT INTO users (id, external_id, credits_balance, created_at, updated_at) \
             VALUES ($1, $2, 0, $3, $3) \
             ON CONFLICT (external_id) DO NOTHING",
        )
        .bind(*candidate.id.as_uuid())
        .bind(external_id.as_str())
        .bind(candidate.created_at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 1 {
            tracing::debug!(user_id = %candidate.id, external_id = %external_id, "User provisioned");
        }

        self.find_user(external_id)
            .await?
            .ok_or_else(|| StoreError::user_not_found(external_id))
    }

    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        sqlx::query(&sql)
            .bind(*user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .map(|row| user_from_row(&row))
            .transpose()
    }

    async fn find_user(&self, external_id: &ExternalUserId) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE external_id = $1");
        sqlx::query(&sql)
            .bind(external_id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .map(|row| user_from_row(&row))
            .transpose()
    }

    async fn list_user_ids(&self) -> Result<Vec<UserId>> {
        let ids: Vec<Uuid> = sqlx::query_scalar("SELECT id FROM users ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.into_iter().map(UserId::from_uuid).collect())
    }

    async fn append_transaction(&self, transaction: CreditTransaction) -> Result<AppendResult> {
        let user_id = transaction.user_id;
        let mut tx = self.pool.begin().await?;

        // Takes the user row lock, then reads the guard's inputs. The lock is
        // held until commit, so appends for one user run one at a time.
        let context = sqlx::query("SELECT * FROM ledger_append_context($1, $2, $3)")
            .bind(*user_id.as_uuid())
            .bind(transaction.payment_reference.as_deref())
            .bind(transaction.reverses_transaction_id.as_ref().map(ToString::to_string))
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::user_not_found(user_id))?;

        let balance: i64 = context.try_get("balance")?;
        let already_refunded: i64 = context.try_get("already_refunded")?;
        let duplicate_of = context
            .try_get::<Option<String>, _>("duplicate_of")?
            .as_deref()
            .map(parse_transaction_id)
            .transpose()?;
        let reversed = match context.try_get::<Option<String>, _>("id")? {
            Some(_) => Some(transaction_from_row(&context)?),
            None => None,
        };

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
            Verdict::Reject(result) => {
                tx.rollback().await?;
                return Ok(result);
            }
        };

        sqlx::query(
            "INSERT INTO credit_transactions \
             (id, user_id, amount, transaction_type, description, payment_reference, \
              reverses_transaction_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(transaction.id.to_string())
        .bind(*user_id.as_uuid())
        .bind(transaction.amount)
        .bind(transaction.transaction_type.as_str())
        .bind(&transaction.description)
        .bind(transaction.payment_reference.as_deref())
        .bind(transaction.reverses_transaction_id.map(|id| id.to_string()))
        .bind(transaction.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(AppendResult::Posted(Posted {
            transaction,
            balance: new_balance,
        }))
    }

    async fn get_transaction(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Option<CreditTransaction>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_transaction(&mut conn, transaction_id).await
    }

    async fn list_transactions(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM credit_transactions \
             WHERE user_id = $1 ORDER BY seq DESC LIMIT $2 OFFSET $3"
        );
        sqlx::query(&sql)
            .bind(*user_id.as_uuid())
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .bind(i64::try_from(offset).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(transaction_from_row)
            .collect()
    }

    async fn snapshot(&self, user_id: &UserId) -> Result<BalanceSnapshot> {
        let row = sqlx::query(
            "SELECT u.credits_balance, \
                    COALESCE(SUM(t.amount), 0)::BIGINT AS calculated_balance, \
                    COUNT(t.id) AS transaction_count \
             FROM users u \
             LEFT JOIN credit_transactions t ON t.user_id = u.id \
             WHERE u.id = $1 \
             GROUP BY u.id",
        )
        .bind(*user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::user_not_found(user_id))?;

        let count: i64 = row.try_get("transaction_count")?;
        Ok(BalanceSnapshot {
            user_id: *user_id,
            cached_balance: row.try_get("credits_balance")?,
            calculated_balance: row.try_get("calculated_balance")?,
            transaction_count: u64::try_from(count).unwrap_or_default(),
        })
    }

    async fn write_balance(&self, user_id: &UserId, balance: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE users SET credits_balance = $2, updated_at = now() WHERE id = $1",
        )
        .bind(*user_id.as_uuid())
        .bind(balance)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => Err(StoreError::user_not_found(user_id)),
            Ok(_) => Ok(()),
            Err(e) if is_projection_mismatch(&e) => {
                let mut conn = self.pool.acquire().await?;
                let expected = Self::ledger_sum(&mut conn, user_id).await?;
                Err(StoreError::ProjectionMismatch {
                    user_id: *user_id,
                    expected,
                    attempted: balance,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn overwrite_balance_unchecked(&self, user_id: &UserId, balance: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET LOCAL fusion_ledger.unchecked_balance = 'on'")
            .execute(&mut *tx)
            .await?;

        let updated = sqlx::query(
            "UPDATE users SET credits_balance = $2, updated_at = now() WHERE id = $1",
        )
        .bind(*user_id.as_uuid())
        .bind(balance)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(StoreError::user_not_found(user_id));
        }
        tx.commit().await?;
        Ok(())
    }
}

fn is_projection_mismatch(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == PROJECTION_MISMATCH)
}

fn parse_transaction_id(raw: &str) -> Result<TransactionId> {
    raw.parse()
        .map_err(|e| StoreError::Serialization(format!("stored transaction id {raw:?}: {e}")))
}

fn user_from_row(row: &PgRow) -> Result<User> {
    let external_id: String = row.try_get("external_id")?;
    Ok(User {
        id: UserId::from_uuid(row.try_get("id")?),
        external_id: ExternalUserId::new(external_id)
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        credits_balance: row.try_get("credits_balance")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<CreditTransaction> {
    let id: String = row.try_get("id")?;
    let transaction_type: String = row.try_get("transaction_type")?;
    let reverses: Option<String> = row.try_get("reverses_transaction_id")?;

    Ok(CreditTransaction {
        id: parse_transaction_id(&id)?,
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        amount: row.try_get("amount")?,
        transaction_type: transaction_type
            .parse()
            .map_err(|e| StoreError::Serialization(format!("stored row {id}: {e}")))?,
        description: row.try_get("description")?,
        payment_reference: row.try_get("payment_reference")?,
        reverses_transaction_id: reverses.as_deref().map(parse_transaction_id).transpose()?,
        created_at: row.try_get("created_at")?,
    })
}
