//! Pricing and gateway configuration, read once at startup.

use std::time::Duration;

use rust_decimal::Decimal;

use crate::error::{PaymentError, PaymentResult};
use crate::model::ServiceKind;

/// Process-wide pricing configuration.
#[derive(Debug, Clone)]
pub struct PricingConfig {
    /// The single supported currency code (e.g. "NGN").
    pub currency: String,
    pub tokens_per_unit_money: Decimal,
    pub min_purchase_money: Decimal,
    pub max_purchase_money: Decimal,
    /// Tokens deposited on first observation of a user key. May be 0.
    pub free_grant_tokens: i64,
    pub analysis_cost: i64,
    pub transform_cost: i64,
    pub premium_insights_cost: i64,
    /// Pending transactions older than this are swept to cancelled.
    pub transaction_ttl: Duration,
    /// Prefix for generated transaction references.
    pub reference_prefix: String,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            currency: "NGN".to_string(),
            tokens_per_unit_money: Decimal::from(2),
            min_purchase_money: Decimal::from(500),
            max_purchase_money: Decimal::from(100_000),
            free_grant_tokens: 100,
            analysis_cost: 10,
            transform_cost: 5,
            premium_insights_cost: 20,
            transaction_ttl: Duration::from_secs(3600),
            reference_prefix: "SEN".to_string(),
        }
    }
}

impl PricingConfig {
    /// Load from environment variables, falling back to defaults.
    pub fn from_env() -> PaymentResult<Self> {
        let defaults = Self::default();

        let config = Self {
            currency: env_or("CURRENCY", &defaults.currency),
            tokens_per_unit_money: env_decimal(
                "TOKENS_PER_UNIT_MONEY",
                defaults.tokens_per_unit_money,
            )?,
            min_purchase_money: env_decimal("MIN_PURCHASE_MONEY", defaults.min_purchase_money)?,
            max_purchase_money: env_decimal("MAX_PURCHASE_MONEY", defaults.max_purchase_money)?,
            free_grant_tokens: env_i64("FREE_GRANT_TOKENS", defaults.free_grant_tokens)?,
            analysis_cost: env_i64("ANALYSIS_COST_TOKENS", defaults.analysis_cost)?,
            transform_cost: env_i64("TRANSFORM_COST_TOKENS", defaults.transform_cost)?,
            premium_insights_cost: env_i64(
                "PREMIUM_INSIGHTS_COST_TOKENS",
                defaults.premium_insights_cost,
            )?,
            transaction_ttl: Duration::from_secs(
                env_i64("TRANSACTION_TTL_SECS", 3600)?.max(0) as u64
            ),
            reference_prefix: env_or("REFERENCE_PREFIX", &defaults.reference_prefix),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> PaymentResult<()> {
        if self.tokens_per_unit_money <= Decimal::ZERO {
            return Err(PaymentError::Validation(
                "TOKENS_PER_UNIT_MONEY must be positive".to_string(),
            ));
        }
        if self.min_purchase_money <= Decimal::ZERO
            || self.max_purchase_money < self.min_purchase_money
        {
            return Err(PaymentError::Validation(
                "purchase bounds must satisfy 0 < min <= max".to_string(),
            ));
        }
        if self.free_grant_tokens < 0 {
            return Err(PaymentError::Validation(
                "FREE_GRANT_TOKENS must be non-negative".to_string(),
            ));
        }
        if currency_numeric_code(&self.currency).is_none() {
            return Err(PaymentError::Validation(format!(
                "unsupported currency: {}",
                self.currency
            )));
        }
        Ok(())
    }

    pub fn cost_of(&self, kind: ServiceKind) -> i64 {
        match kind {
            ServiceKind::Analysis => self.analysis_cost,
            ServiceKind::Transform => self.transform_cost,
            ServiceKind::PremiumInsights => self.premium_insights_cost,
        }
    }
}

/// ISO 4217 numeric code for the currencies the gateway accepts.
pub fn currency_numeric_code(currency: &str) -> Option<&'static str> {
    match currency {
        "NGN" => Some("566"),
        "USD" => Some("840"),
        _ => None,
    }
}

/// Gateway mode selects the base URL set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayMode {
    Test,
    Live,
}

impl GatewayMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayMode::Test => "TEST",
            GatewayMode::Live => "LIVE",
        }
    }
}

/// Credentials and endpoints for the checkout gateway.
#[derive(Clone)]
pub struct GatewayConfig {
    pub client_id: String,
    pub secret_key: String,
    pub merchant_code: String,
    pub pay_item_id: String,
    pub mode: GatewayMode,
    /// Where the gateway redirects the browser after checkout.
    pub return_url: String,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("client_id", &self.client_id)
            .field("secret_key", &"<redacted>")
            .field("merchant_code", &self.merchant_code)
            .field("pay_item_id", &self.pay_item_id)
            .field("mode", &self.mode)
            .field("return_url", &self.return_url)
            .finish()
    }
}

/// Publicly documented sandbox credentials, used when TEST mode has no
/// explicit configuration.
const TEST_CLIENT_ID: &str = "IKIAB23A4E2756605C1ABC33CE3C287E27267F660D61";
const TEST_SECRET_KEY: &str = "secret";
const TEST_MERCHANT_CODE: &str = "MX6072";
const TEST_PAY_ITEM_ID: &str = "9405967";

impl GatewayConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let mode = match env_or("GATEWAY_MODE", "TEST").to_uppercase().as_str() {
            "LIVE" => GatewayMode::Live,
            "TEST" => GatewayMode::Test,
            other => {
                return Err(PaymentError::Validation(format!(
                    "GATEWAY_MODE must be TEST or LIVE, got {other}"
                )))
            }
        };

        // LIVE deployments must be configured explicitly; TEST falls back to
        // the gateway's sandbox credentials.
        let (client_id, secret_key, merchant_code, pay_item_id, default_return) = match mode {
            GatewayMode::Live => (
                env_required("GATEWAY_CLIENT_ID")?,
                env_required("GATEWAY_SECRET_KEY")?,
                env_required("GATEWAY_MERCHANT_CODE")?,
                env_required("GATEWAY_PAY_ITEM_ID")?,
                "https://senalign.com/payment/callback",
            ),
            GatewayMode::Test => (
                env_or("GATEWAY_CLIENT_ID", TEST_CLIENT_ID),
                env_or("GATEWAY_SECRET_KEY", TEST_SECRET_KEY),
                env_or("GATEWAY_MERCHANT_CODE", TEST_MERCHANT_CODE),
                env_or("GATEWAY_PAY_ITEM_ID", TEST_PAY_ITEM_ID),
                "http://localhost:3000/payment-success",
            ),
        };

        let config = Self {
            client_id,
            secret_key,
            merchant_code,
            pay_item_id,
            mode,
            return_url: env_or("PAYMENT_RETURN_URL", default_return),
        };

        config.reject_placeholders()?;
        Ok(config)
    }

    /// OAuth2 token endpoint host.
    pub fn passport_base(&self) -> &'static str {
        match self.mode {
            GatewayMode::Live => "https://passport.interswitchng.com",
            GatewayMode::Test => "https://passport.k8.isw.la",
        }
    }

    /// Browser-facing checkout host.
    pub fn checkout_base(&self) -> &'static str {
        match self.mode {
            GatewayMode::Live => "https://newwebpay.interswitchng.com",
            GatewayMode::Test => "https://newwebpay.qa.interswitchng.com",
        }
    }

    /// Server-to-server API host for verification.
    pub fn api_base(&self) -> &'static str {
        match self.mode {
            GatewayMode::Live => "https://webpay.interswitchng.com",
            GatewayMode::Test => "https://qa.interswitchng.com",
        }
    }

    /// Catch copy-pasted `.env.example` values before the first request does.
    fn reject_placeholders(&self) -> PaymentResult<()> {
        const PLACEHOLDERS: [&str; 3] = ["your_", "changeme", "example"];
        for (name, value) in [
            ("GATEWAY_CLIENT_ID", &self.client_id),
            ("GATEWAY_SECRET_KEY", &self.secret_key),
            ("GATEWAY_MERCHANT_CODE", &self.merchant_code),
            ("GATEWAY_PAY_ITEM_ID", &self.pay_item_id),
        ] {
            let lower = value.to_lowercase();
            if PLACEHOLDERS.iter().any(|p| lower.contains(p)) {
                return Err(PaymentError::Validation(format!(
                    "{name} contains placeholder text; set real gateway credentials"
                )));
            }
        }
        Ok(())
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_required(name: &str) -> PaymentResult<String> {
    std::env::var(name)
        .map_err(|_| PaymentError::Validation(format!("{name} must be set")))
        .and_then(|v| {
            if v.trim().is_empty() {
                Err(PaymentError::Validation(format!("{name} must not be empty")))
            } else {
                Ok(v)
            }
        })
}

fn env_i64(name: &str, default: i64) -> PaymentResult<i64> {
    match std::env::var(name) {
        Ok(v) => v
            .parse()
            .map_err(|_| PaymentError::Validation(format!("{name} must be an integer"))),
        Err(_) => Ok(default),
    }
}

fn env_decimal(name: &str, default: Decimal) -> PaymentResult<Decimal> {
    match std::env::var(name) {
        Ok(v) => v
            .parse()
            .map_err(|_| PaymentError::Validation(format!("{name} must be a decimal number"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_gateway_config() -> GatewayConfig {
        GatewayConfig {
            client_id: "IKIA000TEST".to_string(),
            secret_key: "secret".to_string(),
            merchant_code: "MX6072".to_string(),
            pay_item_id: "9405967".to_string(),
            mode: GatewayMode::Test,
            return_url: "http://localhost:3000/payment-success".to_string(),
        }
    }

    #[test]
    fn defaults_are_valid() {
        PricingConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_unsupported_currency() {
        let config = PricingConfig {
            currency: "EUR".to_string(),
            ..PricingConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn placeholder_credentials_are_rejected() {
        let config = GatewayConfig {
            secret_key: "your_secret_key".to_string(),
            ..test_gateway_config()
        };
        assert!(config.reject_placeholders().is_err());
        assert!(test_gateway_config().reject_placeholders().is_ok());
    }

    #[test]
    fn mode_selects_hosts() {
        let test = test_gateway_config();
        assert!(test.checkout_base().contains("qa"));
        let live = GatewayConfig {
            mode: GatewayMode::Live,
            ..test
        };
        assert!(!live.checkout_base().contains("qa"));
    }

    #[test]
    fn debug_redacts_secret_key() {
        let config = GatewayConfig {
            secret_key: "s3kr3t-value".to_string(),
            ..test_gateway_config()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("s3kr3t-value"));
        assert!(rendered.contains("<redacted>"));
    }
}
