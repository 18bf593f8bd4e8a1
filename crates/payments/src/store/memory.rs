//! In-memory store used by tests and database-less development runs.
//!
//! A single async mutex over the maps makes every operation trivially
//! linearizable, matching the isolation the Postgres backend gets from
//! single-statement atomic SQL.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::error::{PaymentError, PaymentResult};
use crate::model::{ConsumptionEntry, PaymentStatus, PaymentTransaction, UserBalance};
use crate::store::{CreditOutcome, DebitOutcome, StatusTransition, TokenStore};

#[derive(Default)]
struct Inner {
    balances: HashMap<String, UserBalance>,
    transactions: HashMap<String, PaymentTransaction>,
    consumption: Vec<ConsumptionEntry>,
}

/// Map-backed [`TokenStore`].
#[derive(Default)]
pub struct InMemoryTokenStore {
    inner: Mutex<Inner>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn credit_balance(
    balances: &mut HashMap<String, UserBalance>,
    user_key: &str,
    qty: i64,
    purchase_at: OffsetDateTime,
) -> UserBalance {
    let now = OffsetDateTime::now_utc();
    let row = balances
        .entry(user_key.to_string())
        .or_insert_with(|| UserBalance {
            user_key: user_key.to_string(),
            balance: 0,
            total_purchased: 0,
            total_consumed: 0,
            last_purchase_at: None,
            created_at: now,
            updated_at: now,
        });
    row.balance += qty;
    row.total_purchased += qty;
    row.last_purchase_at = Some(purchase_at);
    row.updated_at = now;
    row.clone()
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn get_or_create_balance(
        &self,
        user_key: &str,
        free_grant: i64,
    ) -> PaymentResult<(UserBalance, bool)> {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.balances.get(user_key) {
            return Ok((existing.clone(), false));
        }
        let now = OffsetDateTime::now_utc();
        let row = UserBalance {
            user_key: user_key.to_string(),
            balance: free_grant,
            total_purchased: free_grant,
            total_consumed: 0,
            last_purchase_at: None,
            created_at: now,
            updated_at: now,
        };
        inner.balances.insert(user_key.to_string(), row.clone());
        Ok((row, true))
    }

    async fn credit(
        &self,
        user_key: &str,
        qty: i64,
        purchase_at: OffsetDateTime,
    ) -> PaymentResult<UserBalance> {
        let mut inner = self.inner.lock().await;
        Ok(credit_balance(&mut inner.balances, user_key, qty, purchase_at))
    }

    async fn try_debit(&self, user_key: &str, qty: i64) -> PaymentResult<DebitOutcome> {
        let mut inner = self.inner.lock().await;
        let Some(row) = inner.balances.get_mut(user_key) else {
            return Ok(DebitOutcome::Insufficient { current_balance: 0 });
        };
        if row.balance < qty {
            return Ok(DebitOutcome::Insufficient {
                current_balance: row.balance,
            });
        }
        row.balance -= qty;
        row.total_consumed += qty;
        row.updated_at = OffsetDateTime::now_utc();
        Ok(DebitOutcome::Ok {
            new_balance: row.balance,
        })
    }

    async fn insert_transaction(&self, tx: &PaymentTransaction) -> PaymentResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.transactions.contains_key(&tx.reference) {
            return Err(PaymentError::ReferenceCollision(tx.reference.clone()));
        }
        inner.transactions.insert(tx.reference.clone(), tx.clone());
        Ok(())
    }

    async fn get_transaction(
        &self,
        reference: &str,
    ) -> PaymentResult<Option<PaymentTransaction>> {
        let inner = self.inner.lock().await;
        Ok(inner.transactions.get(reference).cloned())
    }

    async fn update_transaction_status(
        &self,
        reference: &str,
        status: PaymentStatus,
        gateway_payload: Option<serde_json::Value>,
        completed_at: Option<OffsetDateTime>,
    ) -> PaymentResult<StatusTransition> {
        let mut inner = self.inner.lock().await;
        let Some(row) = inner.transactions.get_mut(reference) else {
            return Err(PaymentError::UnknownReference(reference.to_string()));
        };
        if row.status == status {
            return Ok(StatusTransition {
                tx: row.clone(),
                applied: false,
            });
        }
        if row.status != PaymentStatus::Pending {
            return Err(PaymentError::ConflictingState {
                reference: reference.to_string(),
                current: row.status.to_string(),
                requested: status.to_string(),
            });
        }
        row.status = status;
        if gateway_payload.is_some() {
            row.gateway_payload = gateway_payload;
        }
        if completed_at.is_some() {
            row.completed_at = completed_at;
        }
        row.updated_at = OffsetDateTime::now_utc();
        Ok(StatusTransition {
            tx: row.clone(),
            applied: true,
        })
    }

    async fn apply_credit(&self, reference: &str) -> PaymentResult<CreditOutcome> {
        let mut inner = self.inner.lock().await;
        let (user_key, token_qty, already_credited) = match inner.transactions.get(reference) {
            None => return Err(PaymentError::UnknownReference(reference.to_string())),
            Some(row) => (row.user_key.clone(), row.token_qty, row.credited),
        };
        if already_credited {
            let balance = inner
                .balances
                .get(&user_key)
                .cloned()
                .ok_or(PaymentError::UnknownUser(user_key))?;
            return Ok(CreditOutcome {
                balance,
                newly_applied: false,
            });
        }
        let now = OffsetDateTime::now_utc();
        if let Some(row) = inner.transactions.get_mut(reference) {
            row.credited = true;
            row.updated_at = now;
        }
        let balance = credit_balance(&mut inner.balances, &user_key, token_qty, now);
        Ok(CreditOutcome {
            balance,
            newly_applied: true,
        })
    }

    async fn append_consumption(&self, entry: &ConsumptionEntry) -> PaymentResult<()> {
        let mut inner = self.inner.lock().await;
        inner.consumption.push(entry.clone());
        Ok(())
    }

    async fn list_consumption(
        &self,
        user_key: &str,
        limit: i64,
    ) -> PaymentResult<Vec<ConsumptionEntry>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .consumption
            .iter()
            .rev()
            .filter(|e| e.user_key == user_key)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn sweep_expired(&self, ttl: Duration) -> PaymentResult<u64> {
        let mut inner = self.inner.lock().await;
        let cutoff = OffsetDateTime::now_utc() - ttl;
        let mut swept = 0;
        for row in inner.transactions.values_mut() {
            if row.status == PaymentStatus::Pending && row.created_at < cutoff {
                row.status = PaymentStatus::Cancelled;
                row.updated_at = OffsetDateTime::now_utc();
                swept += 1;
            }
        }
        Ok(swept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn pending_tx(reference: &str, user_key: &str, qty: i64) -> PaymentTransaction {
        PaymentTransaction::pending(
            reference.to_string(),
            user_key.to_string(),
            Decimal::from(qty) / Decimal::from(2),
            "NGN".to_string(),
            qty,
        )
    }

    #[tokio::test]
    async fn create_if_absent_applies_grant_once() {
        let store = InMemoryTokenStore::new();
        let (row, created) = store.get_or_create_balance("u1", 100).await.unwrap();
        assert!(created);
        assert_eq!(row.balance, 100);
        assert_eq!(row.total_purchased, 100);

        let (row, created) = store.get_or_create_balance("u1", 100).await.unwrap();
        assert!(!created);
        assert_eq!(row.total_purchased, 100);
    }

    #[tokio::test]
    async fn debit_floors_at_zero() {
        let store = InMemoryTokenStore::new();
        store.get_or_create_balance("u1", 10).await.unwrap();

        match store.try_debit("u1", 10).await.unwrap() {
            DebitOutcome::Ok { new_balance } => assert_eq!(new_balance, 0),
            other => panic!("expected ok, got {other:?}"),
        }
        match store.try_debit("u1", 1).await.unwrap() {
            DebitOutcome::Insufficient { current_balance } => assert_eq!(current_balance, 0),
            other => panic!("expected insufficient, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn duplicate_reference_is_a_collision() {
        let store = InMemoryTokenStore::new();
        let tx = pending_tx("R1", "u1", 1000);
        store.insert_transaction(&tx).await.unwrap();
        match store.insert_transaction(&tx).await {
            Err(PaymentError::ReferenceCollision(r)) => assert_eq!(r, "R1"),
            other => panic!("expected collision, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn status_transition_is_one_shot() {
        let store = InMemoryTokenStore::new();
        store
            .insert_transaction(&pending_tx("R1", "u1", 1000))
            .await
            .unwrap();

        let now = OffsetDateTime::now_utc();
        let first = store
            .update_transaction_status("R1", PaymentStatus::Successful, None, Some(now))
            .await
            .unwrap();
        assert!(first.applied);
        assert_eq!(first.tx.status, PaymentStatus::Successful);
        assert!(first.tx.completed_at.is_some());

        // Same target again: no-op, not an error.
        let second = store
            .update_transaction_status("R1", PaymentStatus::Successful, None, Some(now))
            .await
            .unwrap();
        assert!(!second.applied);

        // Different terminal target: defect.
        let conflict = store
            .update_transaction_status("R1", PaymentStatus::Failed, None, None)
            .await;
        assert!(matches!(conflict, Err(PaymentError::ConflictingState { .. })));
    }

    #[tokio::test]
    async fn apply_credit_is_idempotent() {
        let store = InMemoryTokenStore::new();
        store.get_or_create_balance("u1", 100).await.unwrap();
        store
            .insert_transaction(&pending_tx("R1", "u1", 1000))
            .await
            .unwrap();

        let first = store.apply_credit("R1").await.unwrap();
        assert!(first.newly_applied);
        assert_eq!(first.balance.balance, 1100);

        let second = store.apply_credit("R1").await.unwrap();
        assert!(!second.newly_applied);
        assert_eq!(second.balance.balance, 1100);
    }

    #[tokio::test]
    async fn consumption_is_newest_first_and_limited() {
        let store = InMemoryTokenStore::new();
        for i in 0..5 {
            store
                .append_consumption(&ConsumptionEntry {
                    user_key: "u1".to_string(),
                    token_qty: 10,
                    service_kind: crate::model::ServiceKind::Analysis,
                    work_item_id: Some(format!("d{i}")),
                    description: None,
                    consumed_at: OffsetDateTime::now_utc(),
                })
                .await
                .unwrap();
        }
        let history = store.list_consumption("u1", 3).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].work_item_id.as_deref(), Some("d4"));
    }

    #[tokio::test]
    async fn sweep_only_touches_old_pending_rows() {
        let store = InMemoryTokenStore::new();
        let mut old = pending_tx("OLD", "u1", 1000);
        old.created_at = OffsetDateTime::now_utc() - Duration::from_secs(7200);
        store.insert_transaction(&old).await.unwrap();
        store
            .insert_transaction(&pending_tx("FRESH", "u1", 1000))
            .await
            .unwrap();

        let swept = store.sweep_expired(Duration::from_secs(3600)).await.unwrap();
        assert_eq!(swept, 1);
        let old = store.get_transaction("OLD").await.unwrap().unwrap();
        assert_eq!(old.status, PaymentStatus::Cancelled);
        let fresh = store.get_transaction("FRESH").await.unwrap().unwrap();
        assert_eq!(fresh.status, PaymentStatus::Pending);
    }
}
