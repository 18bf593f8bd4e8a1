//! Consumption guard: debit-then-do for paid operations.

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;

use crate::error::{PaymentError, PaymentResult};
use crate::ledger::TokenLedger;
use crate::model::{ConsumptionEntry, ServiceKind};
use crate::pricing::PricingPolicy;
use crate::store::{DebitOutcome, TokenStore};

/// Billing summary attached to a successful guarded operation.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct UsageInfo {
    pub tokens_consumed: i64,
    pub remaining_balance: i64,
}

/// Failure of a guarded operation: either the payment precondition or the
/// wrapped work itself.
#[derive(Debug)]
pub enum ConsumeError<E> {
    Payment(PaymentError),
    Work(E),
}

impl<E> From<PaymentError> for ConsumeError<E> {
    fn from(e: PaymentError) -> Self {
        ConsumeError::Payment(e)
    }
}

/// Wraps paid operations: reserve tokens, run the work, log the usage.
#[derive(Clone)]
pub struct ConsumptionGuard {
    store: Arc<dyn TokenStore>,
    ledger: TokenLedger,
    pricing: PricingPolicy,
}

impl ConsumptionGuard {
    pub fn new(store: Arc<dyn TokenStore>, ledger: TokenLedger, pricing: PricingPolicy) -> Self {
        Self {
            store,
            ledger,
            pricing,
        }
    }

    /// Debit the service cost, run `do_work`, and append a consumption
    /// entry once the work succeeds.
    ///
    /// An insufficient balance fails before `do_work` is invoked. A failure
    /// of `do_work` is surfaced unchanged and the debit is NOT reversed:
    /// the work may already have consumed real external resources, so
    /// compensation is an explicit operator action.
    pub async fn consume<F, Fut, T, E>(
        &self,
        user_key: &str,
        service_kind: ServiceKind,
        work_item_id: Option<&str>,
        description: Option<&str>,
        do_work: F,
    ) -> Result<(T, UsageInfo), ConsumeError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let cost = self.pricing.cost_of(service_kind);

        // Materialize the account first so a brand-new user spends their
        // free grant rather than failing on a missing row.
        self.ledger.balance_of(user_key).await?;

        let new_balance = match self.ledger.debit(user_key, cost).await? {
            DebitOutcome::Ok { new_balance } => new_balance,
            DebitOutcome::Insufficient { current_balance } => {
                return Err(ConsumeError::Payment(PaymentError::InsufficientTokens {
                    required: cost,
                    current_balance,
                }));
            }
        };

        let result = do_work().await.map_err(ConsumeError::Work)?;

        let entry = ConsumptionEntry {
            user_key: user_key.to_string(),
            token_qty: cost,
            service_kind,
            work_item_id: work_item_id.map(str::to_string),
            description: description.map(str::to_string),
            consumed_at: OffsetDateTime::now_utc(),
        };
        if let Err(e) = self.store.append_consumption(&entry).await {
            // The debit already happened and the work is done; a lost log
            // entry is reconciled offline rather than failing the caller.
            tracing::error!(user_key, %service_kind, error = %e, "failed to log consumption");
        }

        tracing::info!(
            user_key,
            %service_kind,
            tokens_consumed = cost,
            remaining_balance = new_balance,
            "tokens consumed"
        );

        Ok((
            result,
            UsageInfo {
                tokens_consumed: cost,
                remaining_balance: new_balance,
            },
        ))
    }
}
