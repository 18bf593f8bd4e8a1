//! Payment and token-balance endpoints.

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use senalign_payments::{
    ConsumptionEntry, PaymentTransaction, PurchaseReceipt, ServiceKind, UserBalance, VerifyReceipt,
};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const HISTORY_DEFAULT_LIMIT: i64 = 50;
const HISTORY_MAX_LIMIT: i64 = 200;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/pricing", get(get_pricing))
        .route("/purchase", post(purchase_tokens))
        .route("/verify/:reference", post(verify_payment))
        .route("/balance/:user_key", get(get_balance))
        .route("/balance/:user_key/history", get(get_history))
        .route("/transaction/:reference", get(get_transaction))
        .route("/inline-config", get(get_inline_config))
}

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Serialize)]
struct ServiceCosts {
    analysis: i64,
    transform: i64,
    premium_insights: i64,
}

#[derive(Debug, Serialize)]
struct PricingExample {
    amount: Decimal,
    tokens: i64,
    analyses: i64,
}

#[derive(Debug, Serialize)]
struct PricingResponse {
    tokens_per_unit_money: Decimal,
    min_purchase_money: Decimal,
    max_purchase_money: Decimal,
    currency: String,
    service_costs: ServiceCosts,
    examples: Vec<PricingExample>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PurchaseRequest {
    pub token_qty: i64,
    pub user_key: String,
    pub currency: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
struct HistoryResponse {
    user_key: String,
    history: Vec<ConsumptionEntry>,
    total_records: usize,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InlineConfigQuery {
    pub token_qty: i64,
    pub user_key: String,
}

#[derive(Debug, Serialize)]
struct InlineConfigResponse {
    reference: String,
    config: serde_json::Value,
    script_url: String,
}

// =============================================================================
// Handlers
// =============================================================================

/// Token pricing, service costs, and worked purchase examples.
async fn get_pricing(State(state): State<AppState>) -> ApiResult<Json<PricingResponse>> {
    let pricing = &state.payments.pricing;
    let config = pricing.config();

    let examples = [500, 1000, 5000]
        .into_iter()
        .map(|amount| {
            let amount = Decimal::from(amount);
            let tokens = pricing.tokens_for(amount);
            PricingExample {
                amount,
                tokens,
                analyses: tokens / config.analysis_cost.max(1),
            }
        })
        .collect();

    Ok(Json(PricingResponse {
        tokens_per_unit_money: config.tokens_per_unit_money,
        min_purchase_money: config.min_purchase_money,
        max_purchase_money: config.max_purchase_money,
        currency: config.currency.clone(),
        service_costs: ServiceCosts {
            analysis: pricing.cost_of(ServiceKind::Analysis),
            transform: pricing.cost_of(ServiceKind::Transform),
            premium_insights: pricing.cost_of(ServiceKind::PremiumInsights),
        },
        examples,
    }))
}

/// Start a token purchase and hand back the checkout URL.
async fn purchase_tokens(
    State(state): State<AppState>,
    Json(request): Json<PurchaseRequest>,
) -> ApiResult<Json<PurchaseReceipt>> {
    let receipt = state
        .payments
        .orchestrator
        .purchase(&request.user_key, request.token_qty, &request.currency)
        .await?;
    Ok(Json(receipt))
}

/// Verify a payment with the gateway and credit tokens on success.
///
/// Idempotent: repeated calls after success return the cached outcome. A
/// gateway-reported failure is a 200 with a failed-status body so clients
/// can render the outcome.
async fn verify_payment(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> ApiResult<Json<VerifyReceipt>> {
    let receipt = state.payments.orchestrator.verify(&reference).await?;
    Ok(Json(receipt))
}

/// Current balance, creating the account (with the free grant) on first
/// sight of the user key.
async fn get_balance(
    State(state): State<AppState>,
    Path(user_key): Path<String>,
) -> ApiResult<Json<UserBalance>> {
    if user_key.trim().is_empty() {
        return Err(ApiError::Validation("user_key must not be empty".to_string()));
    }
    let balance = state.payments.ledger.balance_of(&user_key).await?;
    Ok(Json(balance))
}

/// Recent token consumption, newest first.
async fn get_history(
    State(state): State<AppState>,
    Path(user_key): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<HistoryResponse>> {
    let limit = query
        .limit
        .unwrap_or(HISTORY_DEFAULT_LIMIT)
        .clamp(1, HISTORY_MAX_LIMIT);
    let history = state
        .payments
        .ledger
        .consumption_history(&user_key, limit)
        .await?;
    Ok(Json(HistoryResponse {
        total_records: history.len(),
        user_key,
        history,
    }))
}

/// Transaction details and status.
async fn get_transaction(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> ApiResult<Json<PaymentTransaction>> {
    let tx = state
        .payments
        .orchestrator
        .get_transaction(&reference)
        .await?;
    Ok(Json(tx))
}

/// Configuration for the gateway's inline checkout widget.
async fn get_inline_config(
    State(state): State<AppState>,
    Query(query): Query<InlineConfigQuery>,
) -> ApiResult<Json<InlineConfigResponse>> {
    if query.user_key.trim().is_empty() {
        return Err(ApiError::Validation("user_key must not be empty".to_string()));
    }
    let (reference, config, script_url) = state
        .payments
        .orchestrator
        .inline_checkout(query.token_qty, &query.user_key)?;
    Ok(Json(InlineConfigResponse {
        reference,
        config,
        script_url,
    }))
}
