//! Postgres-backed store.
//!
//! Every mutation is a single atomic statement (or one transaction for the
//! flag-gated credit), so concurrent callers are serialized by the database
//! rather than by process-local locks.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::error::{PaymentError, PaymentResult};
use crate::model::{
    ConsumptionEntry, PaymentStatus, PaymentTransaction, ServiceKind, UserBalance,
};
use crate::store::{CreditOutcome, DebitOutcome, StatusTransition, TokenStore};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS user_balances (
    user_key        TEXT PRIMARY KEY,
    balance         BIGINT NOT NULL DEFAULT 0 CHECK (balance >= 0),
    total_purchased BIGINT NOT NULL DEFAULT 0,
    total_consumed  BIGINT NOT NULL DEFAULT 0,
    last_purchase_at TIMESTAMPTZ,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS payment_transactions (
    reference       TEXT PRIMARY KEY,
    user_key        TEXT NOT NULL,
    amount          NUMERIC(12, 2) NOT NULL,
    currency        TEXT NOT NULL,
    token_qty       BIGINT NOT NULL,
    status          TEXT NOT NULL DEFAULT 'pending',
    credited        BOOLEAN NOT NULL DEFAULT FALSE,
    gateway_payload JSONB,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    completed_at    TIMESTAMPTZ
);

CREATE INDEX IF NOT EXISTS idx_transactions_pending_age
    ON payment_transactions (created_at) WHERE status = 'pending';

CREATE TABLE IF NOT EXISTS consumption_log (
    id           BIGSERIAL PRIMARY KEY,
    user_key     TEXT NOT NULL,
    token_qty    BIGINT NOT NULL,
    service_kind TEXT NOT NULL,
    work_item_id TEXT,
    description  TEXT,
    consumed_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_consumption_user_time
    ON consumption_log (user_key, consumed_at DESC);
"#;

const TRANSACTION_COLUMNS: &str = "reference, user_key, amount, currency, token_qty, \
     status, credited, gateway_payload, created_at, updated_at, completed_at";

const BALANCE_COLUMNS: &str = "user_key, balance, total_purchased, total_consumed, \
     last_purchase_at, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    reference: String,
    user_key: String,
    amount: Decimal,
    currency: String,
    token_qty: i64,
    status: String,
    credited: bool,
    gateway_payload: Option<serde_json::Value>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
    completed_at: Option<OffsetDateTime>,
}

impl TryFrom<TransactionRow> for PaymentTransaction {
    type Error = PaymentError;

    fn try_from(row: TransactionRow) -> PaymentResult<Self> {
        let status = PaymentStatus::from_str(&row.status).ok_or_else(|| {
            PaymentError::Storage(format!(
                "transaction {} has unknown status {:?}",
                row.reference, row.status
            ))
        })?;
        Ok(PaymentTransaction {
            reference: row.reference,
            user_key: row.user_key,
            amount: row.amount,
            currency: row.currency,
            token_qty: row.token_qty,
            status,
            credited: row.credited,
            gateway_payload: row.gateway_payload,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ConsumptionRow {
    user_key: String,
    token_qty: i64,
    service_kind: String,
    work_item_id: Option<String>,
    description: Option<String>,
    consumed_at: OffsetDateTime,
}

impl TryFrom<ConsumptionRow> for ConsumptionEntry {
    type Error = PaymentError;

    fn try_from(row: ConsumptionRow) -> PaymentResult<Self> {
        let service_kind = ServiceKind::from_str(&row.service_kind).ok_or_else(|| {
            PaymentError::Storage(format!("unknown service kind {:?}", row.service_kind))
        })?;
        Ok(ConsumptionEntry {
            user_key: row.user_key,
            token_qty: row.token_qty,
            service_kind,
            work_item_id: row.work_item_id,
            description: row.description,
            consumed_at: row.consumed_at,
        })
    }
}

/// Postgres [`TokenStore`].
#[derive(Clone)]
pub struct PgTokenStore {
    pool: PgPool,
}

impl PgTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create tables and indexes if they do not exist yet.
    pub async fn ensure_schema(&self) -> PaymentResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    async fn fetch_balance(&self, user_key: &str) -> PaymentResult<Option<UserBalance>> {
        let row: Option<UserBalance> = sqlx::query_as(&format!(
            "SELECT {BALANCE_COLUMNS} FROM user_balances WHERE user_key = $1"
        ))
        .bind(user_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn get_or_create_balance(
        &self,
        user_key: &str,
        free_grant: i64,
    ) -> PaymentResult<(UserBalance, bool)> {
        // At-most-one insert wins; the loser falls through to the SELECT.
        let inserted: Option<UserBalance> = sqlx::query_as(&format!(
            r#"
            INSERT INTO user_balances (user_key, balance, total_purchased, total_consumed)
            VALUES ($1, $2, $2, 0)
            ON CONFLICT (user_key) DO NOTHING
            RETURNING {BALANCE_COLUMNS}
            "#
        ))
        .bind(user_key)
        .bind(free_grant)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok((row, true));
        }

        let existing = self
            .fetch_balance(user_key)
            .await?
            .ok_or_else(|| PaymentError::Storage(format!("balance row for {user_key} vanished")))?;
        Ok((existing, false))
    }

    async fn credit(
        &self,
        user_key: &str,
        qty: i64,
        purchase_at: OffsetDateTime,
    ) -> PaymentResult<UserBalance> {
        let row: UserBalance = sqlx::query_as(&format!(
            r#"
            INSERT INTO user_balances
                (user_key, balance, total_purchased, total_consumed, last_purchase_at)
            VALUES ($1, $2, $2, 0, $3)
            ON CONFLICT (user_key) DO UPDATE SET
                balance = user_balances.balance + $2,
                total_purchased = user_balances.total_purchased + $2,
                last_purchase_at = $3,
                updated_at = NOW()
            RETURNING {BALANCE_COLUMNS}
            "#
        ))
        .bind(user_key)
        .bind(qty)
        .bind(purchase_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn try_debit(&self, user_key: &str, qty: i64) -> PaymentResult<DebitOutcome> {
        let updated: Option<(i64,)> = sqlx::query_as(
            r#"
            UPDATE user_balances
            SET balance = balance - $2,
                total_consumed = total_consumed + $2,
                updated_at = NOW()
            WHERE user_key = $1 AND balance >= $2
            RETURNING balance
            "#,
        )
        .bind(user_key)
        .bind(qty)
        .fetch_optional(&self.pool)
        .await?;

        if let Some((new_balance,)) = updated {
            return Ok(DebitOutcome::Ok { new_balance });
        }

        let current_balance = self
            .fetch_balance(user_key)
            .await?
            .map(|b| b.balance)
            .unwrap_or(0);
        Ok(DebitOutcome::Insufficient { current_balance })
    }

    async fn insert_transaction(&self, tx: &PaymentTransaction) -> PaymentResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO payment_transactions
                (reference, user_key, amount, currency, token_qty, status, credited,
                 gateway_payload, created_at, updated_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(&tx.reference)
        .bind(&tx.user_key)
        .bind(tx.amount)
        .bind(&tx.currency)
        .bind(tx.token_qty)
        .bind(tx.status.as_str())
        .bind(tx.credited)
        .bind(&tx.gateway_payload)
        .bind(tx.created_at)
        .bind(tx.updated_at)
        .bind(tx.completed_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.as_database_error().is_some_and(|db| db.is_unique_violation()) => {
                Err(PaymentError::ReferenceCollision(tx.reference.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_transaction(
        &self,
        reference: &str,
    ) -> PaymentResult<Option<PaymentTransaction>> {
        let row: Option<TransactionRow> = sqlx::query_as(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM payment_transactions WHERE reference = $1"
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;
        row.map(PaymentTransaction::try_from).transpose()
    }

    async fn update_transaction_status(
        &self,
        reference: &str,
        status: PaymentStatus,
        gateway_payload: Option<serde_json::Value>,
        completed_at: Option<OffsetDateTime>,
    ) -> PaymentResult<StatusTransition> {
        let updated: Option<TransactionRow> = sqlx::query_as(&format!(
            r#"
            UPDATE payment_transactions
            SET status = $2,
                gateway_payload = COALESCE($3, gateway_payload),
                completed_at = COALESCE($4, completed_at),
                updated_at = NOW()
            WHERE reference = $1 AND status = 'pending'
            RETURNING {TRANSACTION_COLUMNS}
            "#
        ))
        .bind(reference)
        .bind(status.as_str())
        .bind(&gateway_payload)
        .bind(completed_at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = updated {
            return Ok(StatusTransition {
                tx: row.try_into()?,
                applied: true,
            });
        }

        let current = self
            .get_transaction(reference)
            .await?
            .ok_or_else(|| PaymentError::UnknownReference(reference.to_string()))?;
        if current.status == status {
            return Ok(StatusTransition {
                tx: current,
                applied: false,
            });
        }
        Err(PaymentError::ConflictingState {
            reference: reference.to_string(),
            current: current.status.to_string(),
            requested: status.to_string(),
        })
    }

    async fn apply_credit(&self, reference: &str) -> PaymentResult<CreditOutcome> {
        let mut txn = self.pool.begin().await?;

        // Claim the credit; exactly one caller per reference ever gets a row
        // back here.
        let claimed: Option<(String, i64)> = sqlx::query_as(
            r#"
            UPDATE payment_transactions
            SET credited = TRUE, updated_at = NOW()
            WHERE reference = $1 AND credited = FALSE
            RETURNING user_key, token_qty
            "#,
        )
        .bind(reference)
        .fetch_optional(&mut *txn)
        .await?;

        if let Some((user_key, token_qty)) = claimed {
            let balance: UserBalance = sqlx::query_as(&format!(
                r#"
                INSERT INTO user_balances
                    (user_key, balance, total_purchased, total_consumed, last_purchase_at)
                VALUES ($1, $2, $2, 0, NOW())
                ON CONFLICT (user_key) DO UPDATE SET
                    balance = user_balances.balance + $2,
                    total_purchased = user_balances.total_purchased + $2,
                    last_purchase_at = NOW(),
                    updated_at = NOW()
                RETURNING {BALANCE_COLUMNS}
                "#
            ))
            .bind(&user_key)
            .bind(token_qty)
            .fetch_one(&mut *txn)
            .await?;
            txn.commit().await?;
            return Ok(CreditOutcome {
                balance,
                newly_applied: true,
            });
        }

        txn.rollback().await?;

        let tx = self
            .get_transaction(reference)
            .await?
            .ok_or_else(|| PaymentError::UnknownReference(reference.to_string()))?;
        let balance = self
            .fetch_balance(&tx.user_key)
            .await?
            .ok_or(PaymentError::UnknownUser(tx.user_key))?;
        Ok(CreditOutcome {
            balance,
            newly_applied: false,
        })
    }

    async fn append_consumption(&self, entry: &ConsumptionEntry) -> PaymentResult<()> {
        sqlx::query(
            r#"
            INSERT INTO consumption_log
                (user_key, token_qty, service_kind, work_item_id, description, consumed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&entry.user_key)
        .bind(entry.token_qty)
        .bind(entry.service_kind.as_str())
        .bind(&entry.work_item_id)
        .bind(&entry.description)
        .bind(entry.consumed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_consumption(
        &self,
        user_key: &str,
        limit: i64,
    ) -> PaymentResult<Vec<ConsumptionEntry>> {
        let rows: Vec<ConsumptionRow> = sqlx::query_as(
            r#"
            SELECT user_key, token_qty, service_kind, work_item_id, description, consumed_at
            FROM consumption_log
            WHERE user_key = $1
            ORDER BY consumed_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_key)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ConsumptionEntry::try_from).collect()
    }

    async fn sweep_expired(&self, ttl: Duration) -> PaymentResult<u64> {
        let cutoff = OffsetDateTime::now_utc() - ttl;
        let result = sqlx::query(
            r#"
            UPDATE payment_transactions
            SET status = 'cancelled', updated_at = NOW()
            WHERE status = 'pending' AND created_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
