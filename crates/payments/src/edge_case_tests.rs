// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for the Payment Core
//!
//! Tests critical boundary conditions and race conditions in:
//! - First-use grant semantics
//! - Purchase / verify lifecycle and idempotent crediting
//! - Concurrent verification of the same transaction
//! - Concurrent debits exhausting a balance
//! - Reference collisions and purchase bounds

use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::Barrier;

use crate::config::PricingConfig;
use crate::consumption::{ConsumeError, ConsumptionGuard};
use crate::error::PaymentError;
use crate::ledger::TokenLedger;
use crate::model::{PaymentStatus, PaymentTransaction, ServiceKind, VerifyStatus};
use crate::orchestrator::test_support::MockGateway;
use crate::orchestrator::PaymentOrchestrator;
use crate::pricing::PricingPolicy;
use crate::store::{DebitOutcome, InMemoryTokenStore, TokenStore};

struct Harness {
    store: Arc<InMemoryTokenStore>,
    gateway: Arc<MockGateway>,
    ledger: TokenLedger,
    orchestrator: Arc<PaymentOrchestrator>,
    guard: ConsumptionGuard,
}

fn harness(gateway_status: VerifyStatus) -> Harness {
    let store = Arc::new(InMemoryTokenStore::new());
    let dyn_store: Arc<dyn TokenStore> = store.clone();
    let gateway = Arc::new(MockGateway::reporting(gateway_status));
    let config = PricingConfig::default();
    let pricing = PricingPolicy::new(config.clone());
    let ledger = TokenLedger::new(dyn_store.clone(), config.free_grant_tokens);
    let orchestrator = Arc::new(PaymentOrchestrator::new(
        dyn_store.clone(),
        gateway.clone(),
        ledger.clone(),
        pricing.clone(),
    ));
    let guard = ConsumptionGuard::new(dyn_store, ledger.clone(), pricing);
    Harness {
        store,
        gateway,
        ledger,
        orchestrator,
        guard,
    }
}

// =============================================================================
// First-use grant, then consume
// =============================================================================
#[tokio::test]
async fn first_use_grant_then_analysis() {
    let h = harness(VerifyStatus::Pending);

    let balance = h.ledger.balance_of("u1").await.unwrap();
    assert_eq!(balance.balance, 100);
    assert_eq!(balance.total_purchased, 100);
    assert_eq!(balance.total_consumed, 0);

    let (_, usage) = h
        .guard
        .consume("u1", ServiceKind::Analysis, Some("d1"), None, || async {
            Ok::<_, std::convert::Infallible>(())
        })
        .await
        .unwrap();
    assert_eq!(usage.tokens_consumed, 10);
    assert_eq!(usage.remaining_balance, 90);

    let history = h.store.list_consumption("u1", 50).await.unwrap();
    assert_eq!(history.len(), 1);
}

// =============================================================================
// Concurrent first lookups grant exactly once
// =============================================================================
#[tokio::test]
async fn concurrent_first_lookups_grant_once() {
    let h = harness(VerifyStatus::Pending);
    let barrier = Arc::new(Barrier::new(10));
    let mut handles = vec![];

    for _ in 0..10 {
        let ledger = h.ledger.clone();
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            ledger.balance_of("u1").await.unwrap()
        }));
    }

    for handle in handles {
        let balance = handle.await.unwrap();
        assert_eq!(balance.total_purchased, 100, "grant applied exactly once");
    }

    let final_balance = h.ledger.balance_of("u1").await.unwrap();
    assert_eq!(final_balance.balance, 100);
}

// =============================================================================
// Purchase and credit, verify is idempotent
// =============================================================================
#[tokio::test]
async fn purchase_then_verify_credits_exactly_once() {
    let h = harness(VerifyStatus::Successful);

    let receipt = h.orchestrator.purchase("u2", 1000, "NGN").await.unwrap();
    assert_eq!(receipt.amount, Decimal::from(500));
    assert_eq!(receipt.status, PaymentStatus::Pending);

    let first = h.orchestrator.verify(&receipt.reference).await.unwrap();
    assert_eq!(first.status, PaymentStatus::Successful);
    assert_eq!(first.tokens_credited, Some(1000));
    assert_eq!(first.current_balance, Some(1100));

    let second = h.orchestrator.verify(&receipt.reference).await.unwrap();
    assert_eq!(second.tokens_credited, Some(1000));
    assert_eq!(second.current_balance, Some(1100), "no double credit");
}

// =============================================================================
// Ten concurrent verifies credit exactly once
// =============================================================================
#[tokio::test]
async fn concurrent_verifies_credit_exactly_once() {
    let h = harness(VerifyStatus::Successful);
    let receipt = h.orchestrator.purchase("u2", 1000, "NGN").await.unwrap();
    let pre_race = h.ledger.balance_of("u2").await.unwrap().balance;

    let barrier = Arc::new(Barrier::new(10));
    let mut handles = vec![];
    for _ in 0..10 {
        let orchestrator = Arc::clone(&h.orchestrator);
        let barrier = Arc::clone(&barrier);
        let reference = receipt.reference.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            orchestrator.verify(&reference).await.unwrap()
        }));
    }

    for handle in handles {
        let verify = handle.await.unwrap();
        assert_eq!(verify.status, PaymentStatus::Successful);
        assert_eq!(verify.tokens_credited, Some(1000));
    }

    let final_balance = h.ledger.balance_of("u2").await.unwrap();
    assert_eq!(final_balance.balance, pre_race + 1000);
    assert!(
        h.store.list_consumption("u2", 50).await.unwrap().is_empty(),
        "verification never touches the consumption log"
    );
}

// =============================================================================
// Three concurrent analyses against a 25-token balance
// =============================================================================
#[tokio::test]
async fn concurrent_analyses_exhaust_balance_without_going_negative() {
    let h = harness(VerifyStatus::Pending);
    // u3 starts at exactly 25 tokens.
    h.store.get_or_create_balance("u3", 25).await.unwrap();

    let barrier = Arc::new(Barrier::new(3));
    let mut handles = vec![];
    for _ in 0..3 {
        let guard = h.guard.clone();
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            guard
                .consume("u3", ServiceKind::Analysis, None, None, || async {
                    Ok::<_, std::convert::Infallible>(())
                })
                .await
        }));
    }

    let mut succeeded = 0;
    let mut insufficient = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(ConsumeError::Payment(PaymentError::InsufficientTokens {
                required,
                current_balance,
            })) => {
                assert_eq!(required, 10);
                assert_eq!(current_balance, 5);
                insufficient += 1;
            }
            Err(other) => panic!("unexpected failure: {other:?}"),
        }
    }

    assert_eq!(succeeded, 2);
    assert_eq!(insufficient, 1);

    let balance = h.ledger.balance_of("u3").await.unwrap();
    assert_eq!(balance.balance, 5);
    assert_eq!(balance.total_consumed, 20);
    assert_eq!(h.store.list_consumption("u3", 50).await.unwrap().len(), 2);
}

// =============================================================================
// Pending stays open, then terminates as failed
// =============================================================================
#[tokio::test]
async fn pending_then_failed_never_credits() {
    let h = harness(VerifyStatus::Pending);
    let receipt = h.orchestrator.purchase("u5", 1000, "NGN").await.unwrap();

    let pending = h.orchestrator.verify(&receipt.reference).await.unwrap();
    assert_eq!(pending.status, PaymentStatus::Pending);

    h.gateway.set_status(VerifyStatus::Failed);
    let failed = h.orchestrator.verify(&receipt.reference).await.unwrap();
    assert_eq!(failed.status, PaymentStatus::Failed);

    // Terminal state is cached; no further gateway calls.
    let calls_after_failure = h.gateway.calls();
    let replay = h.orchestrator.verify(&receipt.reference).await.unwrap();
    assert_eq!(replay.status, PaymentStatus::Failed);
    assert_eq!(h.gateway.calls(), calls_after_failure);

    let balance = h.ledger.balance_of("u5").await.unwrap();
    assert_eq!(balance.balance, 100, "only the free grant, never credited");
}

// =============================================================================
// Purchase bounds: exactly min accepted, below rejected
// =============================================================================
#[tokio::test]
async fn purchase_bounds_are_enforced_before_any_row_exists() {
    let h = harness(VerifyStatus::Pending);

    // 1000 tokens == the 500-money minimum.
    assert!(h.orchestrator.purchase("u6", 1000, "NGN").await.is_ok());

    // 998 tokens == 499 money, one unit below the minimum.
    let result = h.orchestrator.purchase("u7", 998, "NGN").await;
    assert!(matches!(result, Err(PaymentError::Validation(_))));
    // Validation fires before account creation.
    let (balance, created) = h.store.get_or_create_balance("u7", 100).await.unwrap();
    assert!(created, "rejected purchase must not have touched u7");
    assert_eq!(balance.total_consumed, 0);
}

// =============================================================================
// Reference collision is retryable
// =============================================================================
#[tokio::test]
async fn reference_collision_surfaces_as_retryable() {
    let h = harness(VerifyStatus::Pending);
    let tx = PaymentTransaction::pending(
        "SEN20250101000000AAAAAAAAAAAA".to_string(),
        "u1".to_string(),
        Decimal::from(500),
        "NGN".to_string(),
        1000,
    );
    h.store.insert_transaction(&tx).await.unwrap();

    let collision = h.store.insert_transaction(&tx).await.unwrap_err();
    assert!(matches!(collision, PaymentError::ReferenceCollision(_)));
    assert!(collision.is_retryable());
}

// =============================================================================
// Balance never goes negative under mixed concurrent traffic
// =============================================================================
#[tokio::test]
async fn mixed_concurrent_credits_and_debits_keep_the_invariant() {
    let h = harness(VerifyStatus::Pending);
    h.store.get_or_create_balance("u8", 50).await.unwrap();

    let barrier = Arc::new(Barrier::new(8));
    let mut handles = vec![];
    for i in 0..8 {
        let ledger = h.ledger.clone();
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            if i % 2 == 0 {
                ledger.credit("u8", 10).await.map(|_| ())
            } else {
                ledger.debit("u8", 30).await.map(|_| ())
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let balance = h.ledger.balance_of("u8").await.unwrap();
    assert!(balance.balance >= 0);
    assert_eq!(
        balance.balance,
        balance.total_purchased - balance.total_consumed
    );
}

// =============================================================================
// Debit outcome reports the observed balance on refusal
// =============================================================================
#[tokio::test]
async fn refused_debit_reports_current_balance() {
    let h = harness(VerifyStatus::Pending);
    h.store.get_or_create_balance("u9", 7).await.unwrap();

    match h.ledger.debit("u9", 10).await.unwrap() {
        DebitOutcome::Insufficient { current_balance } => assert_eq!(current_balance, 7),
        other => panic!("expected refusal, got {other:?}"),
    }
}
