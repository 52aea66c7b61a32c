//! Payment gateway webhook endpoint.

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
};
use tracing::{error, info, warn};

use crate::{adapters::http::app_state::AppState, app_error::AppError};

pub const SIGNATURE_HEADER: &str = "stripe-signature";

pub fn router() -> Router<AppState> {
    Router::new().route("/webhook", post(handle_webhook))
}

/// POST /api/billing/webhook
///
/// Every handled outcome, including skipped and degraded ones, is acknowledged with 200.
/// Only a bad signature (400) or a transient failure (500, so the gateway redelivers)
/// is reported as an error.
async fn handle_webhook(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    match app_state.webhook_processor.handle(&body, signature).await {
        Ok(outcome) => {
            info!(outcome = outcome.as_str(), "Webhook acknowledged");
            acknowledge(outcome.as_str())
        }
        Err(AppError::InvalidSignature) => AppError::InvalidSignature.into_response(),
        Err(e) if e.is_retryable() => {
            error!(
                error = %e,
                retryable = true,
                "Webhook processing failed, returning 500 for gateway retry"
            );
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Err(e) => {
            warn!(
                error = %e,
                retryable = false,
                "Webhook processing failed permanently, acknowledging"
            );
            acknowledge("rejected")
        }
    }
}

fn acknowledge(outcome: &str) -> Response {
    (
        StatusCode::OK,
        Json(serde_json::json!({ "received": true, "outcome": outcome })),
    )
        .into_response()
}
