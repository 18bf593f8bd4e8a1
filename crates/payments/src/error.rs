//! Error types for the payments crate.

use thiserror::Error;

/// Result type alias for payment operations
pub type PaymentResult<T> = std::result::Result<T, PaymentError>;

/// Errors that can occur in the token/payment core.
#[derive(Error, Debug)]
pub enum PaymentError {
    /// Malformed or out-of-range input
    #[error("validation error: {0}")]
    Validation(String),

    /// No transaction exists for the given reference
    #[error("unknown transaction reference: {0}")]
    UnknownReference(String),

    /// No balance row exists for the given user key
    #[error("unknown user: {0}")]
    UnknownUser(String),

    /// Debit refused because the balance is too low
    #[error("insufficient tokens: required {required}, current balance {current_balance}")]
    InsufficientTokens { required: i64, current_balance: i64 },

    /// Network failure, 5xx, or token-acquisition failure talking to the
    /// payment gateway. The transaction stays pending and the caller may
    /// retry.
    #[error("payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    /// A freshly generated reference collided with an existing row.
    /// Retryable by the caller.
    #[error("transaction reference collision: {0}")]
    ReferenceCollision(String),

    /// A conditional status update found the row in a terminal state other
    /// than the target. Should be unreachable under the orchestrator's
    /// logic; logged as a defect.
    #[error("conflicting transaction state for {reference}: {current} -> {requested}")]
    ConflictingState {
        reference: String,
        current: String,
        requested: String,
    },

    /// Any store-level fault
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for PaymentError {
    fn from(e: sqlx::Error) -> Self {
        PaymentError::Storage(e.to_string())
    }
}

impl PaymentError {
    /// True when the operation may be retried without operator intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PaymentError::GatewayUnavailable(_) | PaymentError::ReferenceCollision(_)
        )
    }
}
