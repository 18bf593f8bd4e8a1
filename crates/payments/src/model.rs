//! Core data model: balances, transactions, consumption log entries.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Per-user token account.
///
/// Maintains the invariant `balance == total_purchased - total_consumed` at
/// every externally observable moment; the free first-use grant is counted
/// inside `total_purchased`.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UserBalance {
    pub user_key: String,
    pub balance: i64,
    pub total_purchased: i64,
    pub total_consumed: i64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_purchase_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Lifecycle of a purchase attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Successful,
    Failed,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Successful => "successful",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "successful" => Some(PaymentStatus::Successful),
            "failed" => Some(PaymentStatus::Failed),
            "cancelled" => Some(PaymentStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal states can never transition again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One purchase attempt, keyed by its opaque reference.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentTransaction {
    pub reference: String,
    pub user_key: String,
    pub amount: Decimal,
    pub currency: String,
    pub token_qty: i64,
    pub status: PaymentStatus,
    /// Set exactly once, atomically with the balance credit.
    pub credited: bool,
    /// Last verification response from the gateway. Opaque storage only;
    /// may contain masked card data and must never be logged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_payload: Option<serde_json::Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

impl PaymentTransaction {
    /// A fresh pending transaction for a purchase request.
    pub fn pending(
        reference: String,
        user_key: String,
        amount: Decimal,
        currency: String,
        token_qty: i64,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            reference,
            user_key,
            amount,
            currency,
            token_qty,
            status: PaymentStatus::Pending,
            credited: false,
            gateway_payload: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// Paid operations that consume tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Analysis,
    Transform,
    PremiumInsights,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Analysis => "analysis",
            ServiceKind::Transform => "transform",
            ServiceKind::PremiumInsights => "premium_insights",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "analysis" => Some(ServiceKind::Analysis),
            "transform" => Some(ServiceKind::Transform),
            "premium_insights" => Some(ServiceKind::PremiumInsights),
            _ => None,
        }
    }
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only record of one paid operation.
#[derive(Debug, Clone, Serialize)]
pub struct ConsumptionEntry {
    pub user_key: String,
    pub token_qty: i64,
    pub service_kind: ServiceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_item_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub consumed_at: OffsetDateTime,
}

/// Gateway-reported outcome of a verification call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyStatus {
    Successful,
    Pending,
    Failed,
}

/// Verification result together with the raw gateway payload.
#[derive(Debug, Clone)]
pub struct VerifyOutcome {
    pub status: VerifyStatus,
    pub gateway_payload: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            PaymentStatus::Pending,
            PaymentStatus::Successful,
            PaymentStatus::Failed,
            PaymentStatus::Cancelled,
        ] {
            assert_eq!(PaymentStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(PaymentStatus::from_str("refunded"), None);
    }

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!PaymentStatus::Pending.is_terminal());
        assert!(PaymentStatus::Successful.is_terminal());
        assert!(PaymentStatus::Failed.is_terminal());
        assert!(PaymentStatus::Cancelled.is_terminal());
    }

    #[test]
    fn service_kind_parses_wire_names() {
        assert_eq!(ServiceKind::from_str("analysis"), Some(ServiceKind::Analysis));
        assert_eq!(
            ServiceKind::from_str("premium_insights"),
            Some(ServiceKind::PremiumInsights)
        );
        assert_eq!(ServiceKind::from_str("export"), None);
    }
}
