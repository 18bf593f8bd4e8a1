//! API error type and HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use senalign_payments::PaymentError;
use serde_json::json;

pub type ApiResult<T> = Result<T, ApiError>;

/// Errors surfaced by the HTTP layer. Each variant maps to one status code
/// and one `{error, detail}` body kind.
#[derive(Debug)]
pub enum ApiError {
    /// 400 - malformed input, out-of-range amounts, unknown enum values
    Validation(String),
    /// 404 - unknown reference or user
    NotFound(String),
    /// 402 - dedicated insufficient-balance shape
    InsufficientTokens {
        required_tokens: i64,
        current_balance: i64,
    },
    /// 502 - the payment gateway could not be reached; retryable
    GatewayUnavailable(String),
    /// 503 - a collaborator is not configured or temporarily refused
    ServiceUnavailable(String),
    /// 500 - conditional update found an impossible state; a defect
    Conflict(String),
    /// 500 - store-level fault
    Storage(String),
}

impl From<PaymentError> for ApiError {
    fn from(e: PaymentError) -> Self {
        match e {
            PaymentError::Validation(msg) => ApiError::Validation(msg),
            PaymentError::UnknownReference(r) => {
                ApiError::NotFound(format!("transaction {r} not found"))
            }
            PaymentError::UnknownUser(u) => ApiError::NotFound(format!("user {u} not found")),
            PaymentError::InsufficientTokens {
                required,
                current_balance,
            } => ApiError::InsufficientTokens {
                required_tokens: required,
                current_balance,
            },
            PaymentError::GatewayUnavailable(msg) => ApiError::GatewayUnavailable(msg),
            PaymentError::ReferenceCollision(r) => {
                ApiError::ServiceUnavailable(format!("reference {r} collided; retry the purchase"))
            }
            PaymentError::ConflictingState {
                reference,
                current,
                requested,
            } => ApiError::Conflict(format!(
                "transaction {reference} is {current}, cannot become {requested}"
            )),
            PaymentError::Storage(msg) => ApiError::Storage(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Validation(detail) => (
                StatusCode::BAD_REQUEST,
                json!({"error": "ValidationError", "detail": detail}),
            ),
            ApiError::NotFound(detail) => (
                StatusCode::NOT_FOUND,
                json!({"error": "NotFound", "detail": detail}),
            ),
            ApiError::InsufficientTokens {
                required_tokens,
                current_balance,
            } => (
                StatusCode::PAYMENT_REQUIRED,
                json!({
                    "error": "InsufficientTokens",
                    "required_tokens": required_tokens,
                    "current_balance": current_balance,
                    "message": format!(
                        "This operation costs {required_tokens} tokens but the balance is {current_balance}. Purchase more tokens to continue."
                    ),
                }),
            ),
            ApiError::GatewayUnavailable(detail) => {
                tracing::error!(%detail, "payment gateway unavailable");
                (
                    StatusCode::BAD_GATEWAY,
                    json!({"error": "GatewayUnavailable", "detail": detail}),
                )
            }
            ApiError::ServiceUnavailable(detail) => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({"error": "ServiceUnavailable", "detail": detail}),
            ),
            ApiError::Conflict(detail) => {
                tracing::error!(%detail, "conflicting transaction state");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"error": "ConflictingStateError", "detail": detail}),
                )
            }
            ApiError::Storage(detail) => {
                tracing::error!(%detail, "storage error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"error": "StorageError", "detail": "internal storage failure"}),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_errors_map_to_the_right_kinds() {
        let e: ApiError = PaymentError::UnknownReference("R1".to_string()).into();
        assert!(matches!(e, ApiError::NotFound(_)));

        let e: ApiError = PaymentError::InsufficientTokens {
            required: 10,
            current_balance: 5,
        }
        .into();
        assert!(matches!(
            e,
            ApiError::InsufficientTokens {
                required_tokens: 10,
                current_balance: 5,
            }
        ));

        let e: ApiError = PaymentError::GatewayUnavailable("timeout".to_string()).into();
        assert!(matches!(e, ApiError::GatewayUnavailable(_)));
    }
}
