// Payments crate clippy configuration
#![allow(clippy::result_large_err)] // PaymentError carries context for API mapping
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Senalign Payments Module
//!
//! Token-metered payment core: balances, purchases, and service consumption.
//!
//! ## Features
//!
//! - **Token Ledger**: Per-user balances with an atomic credit/debit
//!   contract and a one-time free grant for new accounts
//! - **Checkout Gateway**: OAuth2 client-credentials auth, redirect checkout
//!   URLs, and server-side payment verification
//! - **Payment Orchestration**: Purchase and verify flows with exactly-once
//!   crediting, idempotent per transaction reference
//! - **Consumption Guard**: Balance-gated execution of paid operations with
//!   an append-only usage log
//! - **Pluggable Store**: Postgres in production, in-memory for tests and
//!   database-less development

pub mod config;
pub mod consumption;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod model;
pub mod orchestrator;
pub mod pricing;
pub mod store;

#[cfg(test)]
mod edge_case_tests;

// Config
pub use config::{currency_numeric_code, GatewayConfig, GatewayMode, PricingConfig};

// Consumption
pub use consumption::{ConsumeError, ConsumptionGuard, UsageInfo};

// Error
pub use error::{PaymentError, PaymentResult};

// Gateway
pub use gateway::{minor_units, CheckoutGateway, InterswitchGateway};

// Ledger
pub use ledger::TokenLedger;

// Model
pub use model::{
    ConsumptionEntry, PaymentStatus, PaymentTransaction, ServiceKind, UserBalance, VerifyOutcome,
    VerifyStatus,
};

// Orchestrator
pub use orchestrator::{PaymentOrchestrator, PurchaseReceipt, VerifyReceipt};

// Pricing
pub use pricing::PricingPolicy;

// Store
pub use store::{
    CreditOutcome, DebitOutcome, InMemoryTokenStore, PgTokenStore, StatusTransition, TokenStore,
};

use std::sync::Arc;

/// Main payment service combining the ledger, orchestrator, and guard over
/// shared store and gateway handles.
pub struct PaymentService {
    pub pricing: PricingPolicy,
    pub ledger: TokenLedger,
    pub orchestrator: PaymentOrchestrator,
    pub guard: ConsumptionGuard,
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn TokenStore>,
        gateway: Arc<dyn CheckoutGateway>,
        config: PricingConfig,
    ) -> Self {
        let pricing = PricingPolicy::new(config.clone());
        let ledger = TokenLedger::new(store.clone(), config.free_grant_tokens);
        let orchestrator = PaymentOrchestrator::new(
            store.clone(),
            gateway,
            ledger.clone(),
            pricing.clone(),
        );
        let guard = ConsumptionGuard::new(store, ledger.clone(), pricing.clone());

        Self {
            pricing,
            ledger,
            orchestrator,
            guard,
        }
    }

    /// Create a service from environment variables with a live gateway
    /// client.
    pub fn from_env(store: Arc<dyn TokenStore>) -> PaymentResult<Self> {
        let pricing_config = PricingConfig::from_env()?;
        let gateway_config = GatewayConfig::from_env()?;
        let gateway = Arc::new(InterswitchGateway::new(gateway_config));
        Ok(Self::new(store, gateway, pricing_config))
    }
}
