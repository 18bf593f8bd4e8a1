//! Dataset analysis endpoint, guarded by the token consumption layer.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;
use senalign_payments::{ConsumeError, ServiceKind};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/analyze/:work_item_id", post(analyze_work_item))
}

#[derive(Debug, Serialize)]
struct AnalyzeResponse {
    work_item_id: String,
    report: serde_json::Value,
    tokens_consumed: i64,
    remaining_balance: i64,
}

/// Run the analysis pipeline for one uploaded work item.
///
/// Costs `analysis` tokens, debited before the pipeline runs. The debit is
/// not reversed if the pipeline fails.
async fn analyze_work_item(
    State(state): State<AppState>,
    Path(work_item_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<AnalyzeResponse>> {
    let user_key = headers
        .get("user-key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::Validation("user-key header is required".to_string()))?
        .to_string();

    let Some(engine) = state.engine.clone() else {
        return Err(ApiError::ServiceUnavailable(
            "analysis engine is not configured".to_string(),
        ));
    };

    let (report, usage) = state
        .payments
        .guard
        .consume(
            &user_key,
            ServiceKind::Analysis,
            Some(&work_item_id),
            Some("Dataset analysis"),
            || async { engine.analyze(&work_item_id).await },
        )
        .await
        .map_err(|e| match e {
            ConsumeError::Payment(p) => ApiError::from(p),
            ConsumeError::Work(err) => {
                tracing::error!(work_item_id = %work_item_id, error = %err, "analysis pipeline failed");
                ApiError::ServiceUnavailable(format!("analysis failed: {err}"))
            }
        })?;

    Ok(Json(AnalyzeResponse {
        work_item_id,
        report,
        tokens_consumed: usage.tokens_consumed,
        remaining_balance: usage.remaining_balance,
    }))
}
