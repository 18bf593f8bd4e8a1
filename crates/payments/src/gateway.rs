//! Checkout gateway protocol adapter.
//!
//! Speaks the gateway's three-legged flow: OAuth2 client-credentials token
//! acquisition (cached process-wide, refresh serialized), deterministic
//! checkout URL construction with a SHA-512 transaction hash, and
//! server-to-server verification. The adapter carries no orchestration
//! state; transaction transitions are decided by the caller.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::header;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::{Digest, Sha512};
use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock};

use crate::config::{currency_numeric_code, GatewayConfig};
use crate::error::{PaymentError, PaymentResult};
use crate::model::{VerifyOutcome, VerifyStatus};

/// Refresh the cached access token when less than this much validity remains.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(300);

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Protocol adapter for the payment gateway.
///
/// `payment_url` and `inline_config` are pure computation; only `verify`
/// performs network I/O.
#[async_trait]
pub trait CheckoutGateway: Send + Sync {
    /// Browser-facing checkout URL for a prepared transaction.
    fn payment_url(
        &self,
        reference: &str,
        amount: Decimal,
        currency: &str,
        user_key: &str,
    ) -> PaymentResult<String>;

    /// Ask the gateway for the transaction's outcome.
    ///
    /// Network failures surface as [`PaymentError::GatewayUnavailable`] and
    /// are retryable; a gateway-reported failure comes back as a
    /// [`VerifyStatus::Failed`] outcome, not an error.
    async fn verify(&self, reference: &str, amount: Decimal) -> PaymentResult<VerifyOutcome>;

    /// Field set for the gateway's inline browser widget.
    fn inline_config(
        &self,
        reference: &str,
        amount: Decimal,
        currency: &str,
        user_key: &str,
    ) -> PaymentResult<serde_json::Value>;

    /// Script URL the inline widget is loaded from.
    fn checkout_script_url(&self) -> String;
}

#[derive(Clone)]
struct CachedToken {
    access_token: String,
    expires_at: OffsetDateTime,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Interswitch web-checkout implementation of [`CheckoutGateway`].
pub struct InterswitchGateway {
    config: GatewayConfig,
    http: reqwest::Client,
    token: RwLock<Option<CachedToken>>,
    refresh_lock: Mutex<()>,
}

impl InterswitchGateway {
    pub fn new(config: GatewayConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            config,
            http,
            token: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Cached access token, refreshed when close to expiry. Readers that
    /// observe a fresh token never touch the refresh lock; at most one
    /// refresh is in flight.
    async fn access_token(&self) -> PaymentResult<String> {
        if let Some(token) = self.fresh_token().await {
            return Ok(token);
        }

        let _guard = self.refresh_lock.lock().await;
        // Another caller may have refreshed while we waited.
        if let Some(token) = self.fresh_token().await {
            return Ok(token);
        }

        let fetched = self.fetch_token().await?;
        let access_token = fetched.access_token.clone();
        *self.token.write().await = Some(fetched);
        Ok(access_token)
    }

    async fn fresh_token(&self) -> Option<String> {
        let guard = self.token.read().await;
        guard
            .as_ref()
            .filter(|t| t.expires_at > OffsetDateTime::now_utc() + TOKEN_REFRESH_MARGIN)
            .map(|t| t.access_token.clone())
    }

    async fn fetch_token(&self) -> PaymentResult<CachedToken> {
        let url = format!("{}/passport/oauth/token", self.config.passport_base());
        let credentials =
            BASE64.encode(format!("{}:{}", self.config.client_id, self.config.secret_key));

        let response = self
            .http
            .post(&url)
            .header(header::AUTHORIZATION, format!("Basic {credentials}"))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| PaymentError::GatewayUnavailable(format!("token request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(PaymentError::GatewayUnavailable(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }

        let body: TokenResponse = response.json().await.map_err(|e| {
            PaymentError::GatewayUnavailable(format!("malformed token response: {e}"))
        })?;

        let expires_in = body.expires_in.unwrap_or(86_400);
        tracing::info!(expires_in, "gateway access token refreshed");

        Ok(CachedToken {
            access_token: body.access_token,
            expires_at: OffsetDateTime::now_utc() + Duration::from_secs(expires_in),
        })
    }

    fn transaction_hash(&self, reference: &str, amount_minor: i64) -> String {
        sha512_hex(&format!(
            "{}{}{}{}{}",
            self.config.pay_item_id,
            reference,
            amount_minor,
            self.config.return_url,
            self.config.secret_key
        ))
    }

    fn verification_hash(&self, reference: &str, amount_minor: i64) -> String {
        sha512_hex(&format!(
            "{}{}{}",
            self.config.secret_key, amount_minor, reference
        ))
    }
}

#[async_trait]
impl CheckoutGateway for InterswitchGateway {
    fn payment_url(
        &self,
        reference: &str,
        amount: Decimal,
        currency: &str,
        user_key: &str,
    ) -> PaymentResult<String> {
        let minor = minor_units(amount)?;
        let code = currency_numeric_code(currency)
            .ok_or_else(|| PaymentError::Validation(format!("unsupported currency: {currency}")))?;
        let hash = self.transaction_hash(reference, minor);

        let mut url =
            reqwest::Url::parse(&format!("{}/collections/w/pay", self.config.checkout_base()))
                .map_err(|e| PaymentError::Validation(format!("bad checkout base URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("merchant_code", &self.config.merchant_code)
            .append_pair("pay_item_id", &self.config.pay_item_id)
            .append_pair("amount", &minor.to_string())
            .append_pair("currency", code)
            .append_pair("site_redirect_url", &self.config.return_url)
            .append_pair("txn_ref", reference)
            .append_pair("cust_id", user_key)
            .append_pair("hash", &hash);
        Ok(url.to_string())
    }

    async fn verify(&self, reference: &str, amount: Decimal) -> PaymentResult<VerifyOutcome> {
        let minor = minor_units(amount)?;
        let access_token = self.access_token().await?;
        let url = format!(
            "{}/collections/api/v1/gettransaction.json",
            self.config.api_base()
        );

        let response = self
            .http
            .get(&url)
            .query(&[
                ("merchantcode", self.config.merchant_code.as_str()),
                ("transactionreference", reference),
                ("amount", &minor.to_string()),
            ])
            .bearer_auth(&access_token)
            .header("Hash", self.verification_hash(reference, minor))
            .send()
            .await
            .map_err(|e| {
                PaymentError::GatewayUnavailable(format!("verification request failed: {e}"))
            })?;

        if !response.status().is_success() {
            return Err(PaymentError::GatewayUnavailable(format!(
                "verification endpoint returned {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response.json().await.map_err(|e| {
            PaymentError::GatewayUnavailable(format!("malformed verification response: {e}"))
        })?;

        let status = interpret_verification(&body, minor, reference);
        Ok(VerifyOutcome {
            status,
            gateway_payload: body,
        })
    }

    fn inline_config(
        &self,
        reference: &str,
        amount: Decimal,
        currency: &str,
        user_key: &str,
    ) -> PaymentResult<serde_json::Value> {
        let minor = minor_units(amount)?;
        let code = currency_numeric_code(currency)
            .ok_or_else(|| PaymentError::Validation(format!("unsupported currency: {currency}")))?;
        Ok(serde_json::json!({
            "merchant_code": self.config.merchant_code,
            "pay_item_id": self.config.pay_item_id,
            "txn_ref": reference,
            "amount": minor,
            "currency": code,
            "cust_id": user_key,
            "site_redirect_url": self.config.return_url,
            "mode": self.config.mode.as_str(),
        }))
    }

    fn checkout_script_url(&self) -> String {
        format!("{}/inline-checkout.js", self.config.checkout_base())
    }
}

/// Monetary amount in minor units (two-decimal money × 100).
pub fn minor_units(amount: Decimal) -> PaymentResult<i64> {
    let minor = amount * Decimal::from(100);
    if minor != minor.trunc() {
        return Err(PaymentError::Validation(format!(
            "amount {amount} has more than two decimal places"
        )));
    }
    minor
        .to_i64()
        .ok_or_else(|| PaymentError::Validation(format!("amount {amount} out of range")))
}

fn sha512_hex(input: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Map the gateway's response-code field to a verification status.
///
/// `"00"` is success, `"09"` and `"Z1"` are still-in-progress; everything
/// else is failure. A success whose echoed amount does not match the
/// expected minor-unit amount is downgraded to failure.
fn interpret_verification(
    body: &serde_json::Value,
    expected_minor: i64,
    reference: &str,
) -> VerifyStatus {
    let code = body
        .get("ResponseCode")
        .and_then(|v| v.as_str())
        .unwrap_or("");

    let status = match code {
        "00" => VerifyStatus::Successful,
        "09" | "Z1" => VerifyStatus::Pending,
        _ => VerifyStatus::Failed,
    };

    if status == VerifyStatus::Successful {
        let returned = body.get("Amount").and_then(|v| v.as_i64()).unwrap_or(0);
        if returned != expected_minor {
            tracing::warn!(
                reference,
                expected = expected_minor,
                returned,
                "gateway reported success with mismatched amount"
            );
            return VerifyStatus::Failed;
        }
    }

    status
}
