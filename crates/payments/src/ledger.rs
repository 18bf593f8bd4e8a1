//! Token ledger: balance lifecycle over the store.
//!
//! The ledger is the only code path that applies the first-use grant; every
//! balance read goes through [`TokenLedger::balance_of`], so a user key is
//! materialized (and granted) the first time anything touches it.

use std::sync::Arc;

use time::OffsetDateTime;

use crate::error::{PaymentError, PaymentResult};
use crate::model::{ConsumptionEntry, UserBalance};
use crate::store::{CreditOutcome, DebitOutcome, TokenStore};

#[derive(Clone)]
pub struct TokenLedger {
    store: Arc<dyn TokenStore>,
    free_grant_tokens: i64,
}

impl TokenLedger {
    pub fn new(store: Arc<dyn TokenStore>, free_grant_tokens: i64) -> Self {
        Self {
            store,
            free_grant_tokens,
        }
    }

    /// Current balance, creating the account with the free grant on first
    /// observation of the user key.
    pub async fn balance_of(&self, user_key: &str) -> PaymentResult<UserBalance> {
        let (balance, created) = self
            .store
            .get_or_create_balance(user_key, self.free_grant_tokens)
            .await?;
        if created && self.free_grant_tokens > 0 {
            tracing::info!(
                user_key,
                free_grant = self.free_grant_tokens,
                "created token account with free grant"
            );
        }
        Ok(balance)
    }

    /// Credit purchased tokens. `qty` must be positive.
    pub async fn credit(&self, user_key: &str, qty: i64) -> PaymentResult<UserBalance> {
        if qty <= 0 {
            return Err(PaymentError::Validation(
                "credit quantity must be positive".to_string(),
            ));
        }
        self.store
            .credit(user_key, qty, OffsetDateTime::now_utc())
            .await
    }

    /// Attempt to debit `qty` tokens; never drives the balance negative.
    pub async fn debit(&self, user_key: &str, qty: i64) -> PaymentResult<DebitOutcome> {
        if qty <= 0 {
            return Err(PaymentError::Validation(
                "debit quantity must be positive".to_string(),
            ));
        }
        self.store.try_debit(user_key, qty).await
    }

    /// Idempotent, flag-gated credit of a purchase transaction.
    pub async fn apply_purchase_credit(&self, reference: &str) -> PaymentResult<CreditOutcome> {
        self.store.apply_credit(reference).await
    }

    pub async fn consumption_history(
        &self,
        user_key: &str,
        limit: i64,
    ) -> PaymentResult<Vec<ConsumptionEntry>> {
        self.store.list_consumption(user_key, limit).await
    }
}
