//! Pure pricing arithmetic: money <-> token conversion and service costs.
//!
//! Pricing is strict: a token quantity whose price is not representable at
//! two decimal places is rejected rather than rounded, so
//! `tokens_for(amount_for(q)) == q` holds for every accepted quantity.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::config::PricingConfig;
use crate::error::{PaymentError, PaymentResult};
use crate::model::ServiceKind;

/// Pure pricing functions over a loaded [`PricingConfig`]. No I/O.
#[derive(Debug, Clone)]
pub struct PricingPolicy {
    config: PricingConfig,
}

impl PricingPolicy {
    pub fn new(config: PricingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PricingConfig {
        &self.config
    }

    pub fn currency(&self) -> &str {
        &self.config.currency
    }

    /// Tokens bought by `amount` of money: `floor(amount * rate)`.
    pub fn tokens_for(&self, amount: Decimal) -> i64 {
        (amount * self.config.tokens_per_unit_money)
            .floor()
            .to_i64()
            .unwrap_or(0)
    }

    /// Exact price of `token_qty` tokens at two-decimal precision.
    ///
    /// Rejects quantities that do not divide cleanly.
    pub fn amount_for(&self, token_qty: i64) -> PaymentResult<Decimal> {
        if token_qty <= 0 {
            return Err(PaymentError::Validation(
                "token quantity must be positive".to_string(),
            ));
        }
        let exact = Decimal::from(token_qty) / self.config.tokens_per_unit_money;
        let rounded = exact.round_dp(2);
        if rounded * self.config.tokens_per_unit_money != Decimal::from(token_qty) {
            return Err(PaymentError::Validation(format!(
                "{token_qty} tokens has no exact price at the configured rate"
            )));
        }
        Ok(rounded.normalize())
    }

    /// Token cost of one invocation of a paid service.
    pub fn cost_of(&self, kind: ServiceKind) -> i64 {
        self.config.cost_of(kind)
    }

    /// Check a monetary amount against the configured purchase bounds.
    pub fn validate_purchase_amount(&self, amount: Decimal) -> PaymentResult<()> {
        if amount < self.config.min_purchase_money {
            return Err(PaymentError::Validation(format!(
                "amount {amount} is below the minimum purchase of {}",
                self.config.min_purchase_money
            )));
        }
        if amount > self.config.max_purchase_money {
            return Err(PaymentError::Validation(format!(
                "amount {amount} exceeds the maximum purchase of {}",
                self.config.max_purchase_money
            )));
        }
        Ok(())
    }

    /// Price a token purchase request, enforcing the purchase bounds.
    pub fn validate_purchase_qty(&self, token_qty: i64) -> PaymentResult<Decimal> {
        let amount = self.amount_for(token_qty)?;
        self.validate_purchase_amount(amount)?;
        Ok(amount)
    }
}
