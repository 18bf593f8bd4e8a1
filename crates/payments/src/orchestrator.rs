//! Purchase and verification state machine.
//!
//! All transaction references are minted here, and the credit for a
//! successful payment is applied exactly once per reference no matter how
//! many verifiers race: the status transition is conditional on `pending`,
//! and the credit itself is flag-gated in the store.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Serialize;
use time::macros::format_description;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{PaymentError, PaymentResult};
use crate::gateway::CheckoutGateway;
use crate::ledger::TokenLedger;
use crate::model::{PaymentStatus, PaymentTransaction, VerifyStatus};
use crate::pricing::PricingPolicy;
use crate::store::TokenStore;

/// Hex characters kept from the random suffix; 12 nibbles = 48 bits.
const REFERENCE_SUFFIX_LEN: usize = 12;

/// Response to a purchase request. The user completes payment out-of-band
/// via `payment_url`.
#[derive(Debug, Clone, Serialize)]
pub struct PurchaseReceipt {
    pub reference: String,
    pub token_qty: i64,
    pub amount: Decimal,
    pub currency: String,
    pub payment_url: String,
    pub status: PaymentStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// Response to a verification request.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyReceipt {
    pub reference: String,
    pub status: PaymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_credited: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_balance: Option<i64>,
    pub message: String,
}

pub struct PaymentOrchestrator {
    store: Arc<dyn TokenStore>,
    gateway: Arc<dyn CheckoutGateway>,
    ledger: TokenLedger,
    pricing: PricingPolicy,
}

impl PaymentOrchestrator {
    pub fn new(
        store: Arc<dyn TokenStore>,
        gateway: Arc<dyn CheckoutGateway>,
        ledger: TokenLedger,
        pricing: PricingPolicy,
    ) -> Self {
        Self {
            store,
            gateway,
            ledger,
            pricing,
        }
    }

    /// Mint a transaction reference: configured prefix, UTC timestamp to the
    /// second, and 48 bits of random hex. Roughly time-ordered, opaque, and
    /// unique with overwhelming probability; an insert collision is
    /// surfaced to the caller as retryable.
    pub fn new_reference(&self) -> String {
        let timestamp = OffsetDateTime::now_utc()
            .format(format_description!(
                "[year][month][day][hour][minute][second]"
            ))
            .unwrap_or_default();
        let suffix: String = Uuid::new_v4()
            .simple()
            .to_string()
            .chars()
            .take(REFERENCE_SUFFIX_LEN)
            .collect::<String>()
            .to_uppercase();
        format!(
            "{}{}{}",
            self.pricing.config().reference_prefix,
            timestamp,
            suffix
        )
    }

    /// Start a token purchase: price it, record a pending transaction, and
    /// hand back the checkout URL. No gateway network I/O happens here.
    pub async fn purchase(
        &self,
        user_key: &str,
        token_qty: i64,
        currency: &str,
    ) -> PaymentResult<PurchaseReceipt> {
        if user_key.trim().is_empty() {
            return Err(PaymentError::Validation(
                "user_key must not be empty".to_string(),
            ));
        }
        if currency != self.pricing.currency() {
            return Err(PaymentError::Validation(format!(
                "unsupported currency {currency}; this deployment sells in {}",
                self.pricing.currency()
            )));
        }

        let amount = self.pricing.validate_purchase_qty(token_qty)?;

        // Materialize the account (and free grant) before money moves.
        self.ledger.balance_of(user_key).await?;

        let reference = self.new_reference();
        let tx = PaymentTransaction::pending(
            reference.clone(),
            user_key.to_string(),
            amount,
            currency.to_string(),
            token_qty,
        );
        self.store.insert_transaction(&tx).await?;

        let payment_url = self
            .gateway
            .payment_url(&reference, amount, currency, user_key)?;

        tracing::info!(%reference, user_key, token_qty, %amount, "purchase initiated");

        Ok(PurchaseReceipt {
            reference,
            token_qty,
            amount,
            currency: currency.to_string(),
            payment_url,
            status: PaymentStatus::Pending,
            expires_at: OffsetDateTime::now_utc() + self.pricing.config().transaction_ttl,
        })
    }

    /// Inline-widget configuration for a prepared transaction, sharing the
    /// reference minting with `purchase`.
    pub fn inline_checkout(
        &self,
        token_qty: i64,
        user_key: &str,
    ) -> PaymentResult<(String, serde_json::Value, String)> {
        let amount = self.pricing.validate_purchase_qty(token_qty)?;
        let reference = self.new_reference();
        let config =
            self.gateway
                .inline_config(&reference, amount, self.pricing.currency(), user_key)?;
        Ok((reference, config, self.gateway.checkout_script_url()))
    }

    /// Verify a transaction with the gateway and credit tokens on success.
    ///
    /// Idempotent per reference: a transaction already in a terminal state
    /// short-circuits without another gateway call, and repeated verifies of
    /// a successful payment return the cached outcome.
    pub async fn verify(&self, reference: &str) -> PaymentResult<VerifyReceipt> {
        let tx = self
            .store
            .get_transaction(reference)
            .await?
            .ok_or_else(|| PaymentError::UnknownReference(reference.to_string()))?;

        match tx.status {
            PaymentStatus::Successful => {
                // Replays a lost credit if the original winner crashed
                // between the status transition and the credit.
                let outcome = self.ledger.apply_purchase_credit(reference).await?;
                return Ok(VerifyReceipt {
                    reference: reference.to_string(),
                    status: PaymentStatus::Successful,
                    tokens_credited: Some(tx.token_qty),
                    current_balance: Some(outcome.balance.balance),
                    message: "Payment already verified and tokens credited".to_string(),
                });
            }
            PaymentStatus::Failed | PaymentStatus::Cancelled => {
                return Ok(VerifyReceipt {
                    reference: reference.to_string(),
                    status: tx.status,
                    tokens_credited: None,
                    current_balance: None,
                    message: format!("Payment {}", tx.status),
                });
            }
            PaymentStatus::Pending => {}
        }

        let outcome = self.gateway.verify(reference, tx.amount).await?;

        match outcome.status {
            VerifyStatus::Successful => {
                let transition = self
                    .store
                    .update_transaction_status(
                        reference,
                        PaymentStatus::Successful,
                        Some(outcome.gateway_payload),
                        Some(OffsetDateTime::now_utc()),
                    )
                    .await?;
                if !transition.applied {
                    tracing::debug!(reference, "concurrent verifier completed the transaction");
                }

                let credit = self.ledger.apply_purchase_credit(reference).await?;
                if credit.newly_applied {
                    tracing::info!(
                        reference,
                        user_key = %tx.user_key,
                        token_qty = tx.token_qty,
                        "payment verified, tokens credited"
                    );
                }

                Ok(VerifyReceipt {
                    reference: reference.to_string(),
                    status: PaymentStatus::Successful,
                    tokens_credited: Some(tx.token_qty),
                    current_balance: Some(credit.balance.balance),
                    message: "Payment successful and tokens credited".to_string(),
                })
            }
            VerifyStatus::Pending => Ok(VerifyReceipt {
                reference: reference.to_string(),
                status: PaymentStatus::Pending,
                tokens_credited: None,
                current_balance: None,
                message: "Payment is still pending. Please try again later.".to_string(),
            }),
            VerifyStatus::Failed => {
                self.store
                    .update_transaction_status(
                        reference,
                        PaymentStatus::Failed,
                        Some(outcome.gateway_payload),
                        None,
                    )
                    .await?;
                tracing::info!(reference, "payment failed at the gateway");
                Ok(VerifyReceipt {
                    reference: reference.to_string(),
                    status: PaymentStatus::Failed,
                    tokens_credited: None,
                    current_balance: None,
                    message: "Payment failed".to_string(),
                })
            }
        }
    }

    pub async fn get_transaction(&self, reference: &str) -> PaymentResult<PaymentTransaction> {
        self.store
            .get_transaction(reference)
            .await?
            .ok_or_else(|| PaymentError::UnknownReference(reference.to_string()))
    }

    /// Cancel pending transactions older than the configured TTL.
    pub async fn sweep_expired(&self) -> PaymentResult<u64> {
        let ttl: Duration = self.pricing.config().transaction_ttl;
        let swept = self.store.sweep_expired(ttl).await?;
        if swept > 0 {
            tracing::info!(swept, "cancelled expired pending transactions");
        }
        Ok(swept)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::model::VerifyOutcome;

    /// Gateway double with a programmable verification outcome.
    pub struct MockGateway {
        status: Mutex<VerifyStatus>,
        pub verify_calls: AtomicUsize,
    }

    impl MockGateway {
        pub fn reporting(status: VerifyStatus) -> Self {
            Self {
                status: Mutex::new(status),
                verify_calls: AtomicUsize::new(0),
            }
        }

        pub fn set_status(&self, status: VerifyStatus) {
            *self.status.lock().unwrap() = status;
        }

        pub fn calls(&self) -> usize {
            self.verify_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CheckoutGateway for MockGateway {
        fn payment_url(
            &self,
            reference: &str,
            amount: Decimal,
            _currency: &str,
            _user_key: &str,
        ) -> PaymentResult<String> {
            Ok(format!("https://gateway.test/pay?txn_ref={reference}&amount={amount}"))
        }

        async fn verify(
            &self,
            _reference: &str,
            _amount: Decimal,
        ) -> PaymentResult<VerifyOutcome> {
            self.verify_calls.fetch_add(1, Ordering::SeqCst);
            let status = *self.status.lock().unwrap();
            let code = match status {
                VerifyStatus::Successful => "00",
                VerifyStatus::Pending => "09",
                VerifyStatus::Failed => "Z6",
            };
            Ok(VerifyOutcome {
                status,
                gateway_payload: serde_json::json!({"ResponseCode": code}),
            })
        }

        fn inline_config(
            &self,
            reference: &str,
            _amount: Decimal,
            _currency: &str,
            _user_key: &str,
        ) -> PaymentResult<serde_json::Value> {
            Ok(serde_json::json!({"txn_ref": reference}))
        }

        fn checkout_script_url(&self) -> String {
            "https://gateway.test/inline-checkout.js".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::MockGateway;
    use super::*;
    use crate::config::PricingConfig;
    use crate::store::InMemoryTokenStore;

    fn orchestrator(gateway: Arc<MockGateway>) -> PaymentOrchestrator {
        let store: Arc<dyn TokenStore> = Arc::new(InMemoryTokenStore::new());
        let config = PricingConfig::default();
        let ledger = TokenLedger::new(store.clone(), config.free_grant_tokens);
        PaymentOrchestrator::new(store, gateway, ledger, PricingPolicy::new(config))
    }

    #[test]
    fn references_are_prefixed_and_unique() {
        let orchestrator = orchestrator(Arc::new(MockGateway::reporting(VerifyStatus::Pending)));
        let a = orchestrator.new_reference();
        let b = orchestrator.new_reference();
        assert!(a.starts_with("SEN"));
        assert_eq!(a.len(), "SEN".len() + 14 + 12);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn purchase_prices_and_records_a_pending_transaction() {
        let gateway = Arc::new(MockGateway::reporting(VerifyStatus::Pending));
        let orchestrator = orchestrator(gateway);

        let receipt = orchestrator.purchase("u2", 1000, "NGN").await.unwrap();
        assert_eq!(receipt.amount, Decimal::from(500));
        assert_eq!(receipt.status, PaymentStatus::Pending);
        assert!(receipt.payment_url.contains(&receipt.reference));

        let tx = orchestrator.get_transaction(&receipt.reference).await.unwrap();
        assert_eq!(tx.token_qty, 1000);
        assert_eq!(tx.status, PaymentStatus::Pending);
        assert!(!tx.credited);
    }

    #[tokio::test]
    async fn purchase_rejects_bad_input() {
        let orchestrator = orchestrator(Arc::new(MockGateway::reporting(VerifyStatus::Pending)));
        assert!(orchestrator.purchase("", 1000, "NGN").await.is_err());
        assert!(orchestrator.purchase("u1", 1000, "USD").await.is_err());
        // Below the minimum purchase
        assert!(orchestrator.purchase("u1", 2, "NGN").await.is_err());
    }

    #[tokio::test]
    async fn verify_unknown_reference_is_a_404_kind() {
        let orchestrator = orchestrator(Arc::new(MockGateway::reporting(VerifyStatus::Pending)));
        let result = orchestrator.verify("SENnope").await;
        assert!(matches!(result, Err(PaymentError::UnknownReference(_))));
    }

    #[tokio::test]
    async fn verify_success_credits_once_and_replays_from_cache() {
        let gateway = Arc::new(MockGateway::reporting(VerifyStatus::Successful));
        let orchestrator = orchestrator(gateway.clone());

        let receipt = orchestrator.purchase("u2", 1000, "NGN").await.unwrap();
        let first = orchestrator.verify(&receipt.reference).await.unwrap();
        assert_eq!(first.status, PaymentStatus::Successful);
        assert_eq!(first.tokens_credited, Some(1000));
        // 100 free grant + 1000 purchased
        assert_eq!(first.current_balance, Some(1100));
        assert_eq!(gateway.calls(), 1);

        let second = orchestrator.verify(&receipt.reference).await.unwrap();
        assert_eq!(second.status, PaymentStatus::Successful);
        assert_eq!(second.tokens_credited, Some(1000));
        assert_eq!(second.current_balance, Some(1100));
        // Cached success: the gateway is not asked again.
        assert_eq!(gateway.calls(), 1);
    }

    #[tokio::test]
    async fn verify_pending_leaves_the_transaction_open() {
        let gateway = Arc::new(MockGateway::reporting(VerifyStatus::Pending));
        let orchestrator = orchestrator(gateway.clone());

        let receipt = orchestrator.purchase("u5", 1000, "NGN").await.unwrap();
        let pending = orchestrator.verify(&receipt.reference).await.unwrap();
        assert_eq!(pending.status, PaymentStatus::Pending);
        assert_eq!(pending.tokens_credited, None);

        // Gateway later reports failure; the transaction terminates.
        gateway.set_status(VerifyStatus::Failed);
        let failed = orchestrator.verify(&receipt.reference).await.unwrap();
        assert_eq!(failed.status, PaymentStatus::Failed);

        // Terminal state short-circuits without another gateway round trip,
        // even if the gateway would now report success.
        gateway.set_status(VerifyStatus::Successful);
        let still_failed = orchestrator.verify(&receipt.reference).await.unwrap();
        assert_eq!(still_failed.status, PaymentStatus::Failed);
        assert_eq!(gateway.calls(), 2);
    }

    #[tokio::test]
    async fn inline_checkout_mints_a_reference() {
        let orchestrator = orchestrator(Arc::new(MockGateway::reporting(VerifyStatus::Pending)));
        let (reference, config, script_url) = orchestrator.inline_checkout(1000, "u1").unwrap();
        assert!(reference.starts_with("SEN"));
        assert_eq!(config["txn_ref"], reference.as_str());
        assert!(script_url.ends_with("inline-checkout.js"));
    }
}
