use axum::{
    Json, Router, extract::State, http::HeaderMap, response::IntoResponse, routing::post,
};
use serde::Serialize;

use crate::{
    adapters::http::{app_state::AppState, auth::require_cron_secret},
    app_error::AppResult,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/apply-deferred-downgrades", post(apply_deferred_downgrades))
}

#[derive(Serialize)]
struct ApplyDowngradesResponse {
    applied: i64,
}

/// POST /api/cron/apply-deferred-downgrades
/// Called by the external renewal scheduler.
async fn apply_deferred_downgrades(
    State(app_state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    require_cron_secret(&headers, &app_state)?;

    let applied = app_state
        .renewal_use_cases
        .apply_deferred_downgrades()
        .await?;

    Ok(Json(ApplyDowngradesResponse { applied }))
}
