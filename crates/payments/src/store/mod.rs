//! Persistence contract for balances, transactions, and the consumption log.
//!
//! The concrete backend is behind the [`TokenStore`] trait so the
//! orchestration layer can be exercised without a database. Two
//! implementations ship with the crate: [`PgTokenStore`] for production and
//! [`InMemoryTokenStore`] for tests and database-less development runs.

mod memory;
mod postgres;

pub use memory::InMemoryTokenStore;
pub use postgres::PgTokenStore;

use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::error::PaymentResult;
use crate::model::{ConsumptionEntry, PaymentStatus, PaymentTransaction, UserBalance};

/// Outcome of a compare-and-decrement debit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitOutcome {
    Ok { new_balance: i64 },
    Insufficient { current_balance: i64 },
}

/// Result of a conditional status transition.
///
/// `applied` is false when the row was already in the target state, which a
/// concurrent caller treats as "someone else won the race".
#[derive(Debug, Clone)]
pub struct StatusTransition {
    pub tx: PaymentTransaction,
    pub applied: bool,
}

/// Result of the flag-gated purchase credit.
#[derive(Debug, Clone)]
pub struct CreditOutcome {
    pub balance: UserBalance,
    /// True only for the single caller that flipped the `credited` flag.
    pub newly_applied: bool,
}

/// Durable store for the token/payment core.
///
/// Every mutation is atomic: it either fully applies or fully does not, and
/// `credit` / `try_debit` on the same user key are linearizable.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Atomic create-if-absent. At most one concurrent caller inserts; both
    /// observe the same row, and the free grant is applied exactly once.
    async fn get_or_create_balance(
        &self,
        user_key: &str,
        free_grant: i64,
    ) -> PaymentResult<(UserBalance, bool)>;

    /// Atomic increment of `balance` and `total_purchased`.
    async fn credit(
        &self,
        user_key: &str,
        qty: i64,
        purchase_at: OffsetDateTime,
    ) -> PaymentResult<UserBalance>;

    /// Atomic compare-and-decrement; never drives the balance negative.
    async fn try_debit(&self, user_key: &str, qty: i64) -> PaymentResult<DebitOutcome>;

    /// Insert a new transaction row. A duplicate reference surfaces as
    /// [`crate::PaymentError::ReferenceCollision`].
    async fn insert_transaction(&self, tx: &PaymentTransaction) -> PaymentResult<()>;

    async fn get_transaction(&self, reference: &str)
        -> PaymentResult<Option<PaymentTransaction>>;

    /// Conditional transition out of `pending`. Re-entering with the target
    /// status is a no-op returning the existing row (`applied == false`);
    /// any other terminal mismatch is a
    /// [`crate::PaymentError::ConflictingState`].
    async fn update_transaction_status(
        &self,
        reference: &str,
        status: PaymentStatus,
        gateway_payload: Option<serde_json::Value>,
        completed_at: Option<OffsetDateTime>,
    ) -> PaymentResult<StatusTransition>;

    /// Credit the transaction's `token_qty` to its user, flipping the row's
    /// `credited` flag in the same atomic step. Idempotent per reference.
    async fn apply_credit(&self, reference: &str) -> PaymentResult<CreditOutcome>;

    /// Unconditional append to the consumption log.
    async fn append_consumption(&self, entry: &ConsumptionEntry) -> PaymentResult<()>;

    /// Consumption entries for one user, newest first.
    async fn list_consumption(
        &self,
        user_key: &str,
        limit: i64,
    ) -> PaymentResult<Vec<ConsumptionEntry>>;

    /// Move pending transactions older than `ttl` to `cancelled`. Returns
    /// the number of rows swept; terminal rows are never touched.
    async fn sweep_expired(&self, ttl: Duration) -> PaymentResult<u64>;
}
