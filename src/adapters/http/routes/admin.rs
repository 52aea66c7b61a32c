use axum::{
    Json, Router,
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::{get, post, put},
};
use axum_extra::extract::cookie::CookieJar;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::billing::SubscriptionResponse;
use crate::{
    adapters::http::{app_state::AppState, auth::current_admin},
    app_error::AppResult,
    domain::{
        entities::{
            credit::{CreditEvent, CreditSource, current_period_month},
            plan_tier::PlanTier,
        },
        reconciliation::PlanChange,
    },
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{retailer_id}/plan", put(set_plan))
        .route("/{retailer_id}/close", post(close_account))
        .route("/{retailer_id}/restore", post(restore_account))
        .route("/{retailer_id}/credit-events", get(list_credit_events))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetPlanPayload {
    plan_tier: PlanTier,
    included_override: Option<i32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SetPlanResponse {
    subscription: SubscriptionResponse,
    previous_tier: PlanTier,
    change: PlanChange,
    credited: Option<i32>,
}

/// PUT /api/admin/retailers/{retailer_id}/plan
/// Immediate assignment, no gateway involvement.
async fn set_plan(
    State(app_state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
    Path(retailer_id): Path<Uuid>,
    Json(payload): Json<SetPlanPayload>,
) -> AppResult<impl IntoResponse> {
    let admin_id = current_admin(&jar, &headers, &app_state)?;

    let assignment = app_state
        .subscription_use_cases
        .set_plan(retailer_id, payload.plan_tier, payload.included_override)
        .await?;

    tracing::info!(
        admin_id = %admin_id,
        retailer_id = %retailer_id,
        plan_tier = %payload.plan_tier,
        "Admin set retailer plan"
    );

    Ok(Json(SetPlanResponse {
        subscription: SubscriptionResponse::from(&assignment.record),
        previous_tier: assignment.previous_tier,
        change: assignment.change,
        credited: assignment.credited,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AccountStateResponse {
    retailer_id: Uuid,
    is_active: bool,
    subscription: Option<SubscriptionResponse>,
}

/// POST /api/admin/retailers/{retailer_id}/close
async fn close_account(
    State(app_state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
    Path(retailer_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let admin_id = current_admin(&jar, &headers, &app_state)?;

    let scheduled = app_state
        .subscription_use_cases
        .close_account(retailer_id)
        .await?;

    tracing::info!(admin_id = %admin_id, retailer_id = %retailer_id, "Admin closed account");

    Ok(Json(AccountStateResponse {
        retailer_id,
        is_active: false,
        subscription: scheduled.as_ref().map(SubscriptionResponse::from),
    }))
}

/// POST /api/admin/retailers/{retailer_id}/restore
async fn restore_account(
    State(app_state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
    Path(retailer_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let admin_id = current_admin(&jar, &headers, &app_state)?;

    let restored = app_state
        .subscription_use_cases
        .restore_account(retailer_id)
        .await?;

    tracing::info!(admin_id = %admin_id, retailer_id = %retailer_id, "Admin restored account");

    Ok(Json(AccountStateResponse {
        retailer_id,
        is_active: true,
        subscription: restored.as_ref().map(SubscriptionResponse::from),
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreditEventResponse {
    id: Uuid,
    period_month: NaiveDate,
    delta: i32,
    source: CreditSource,
    external_ref: String,
    created_at: Option<NaiveDateTime>,
}

impl From<CreditEvent> for CreditEventResponse {
    fn from(event: CreditEvent) -> Self {
        Self {
            id: event.id,
            period_month: event.period_month,
            delta: event.delta,
            source: event.source,
            external_ref: event.external_ref,
            created_at: event.created_at,
        }
    }
}

/// GET /api/admin/retailers/{retailer_id}/credit-events
/// Current period only, newest first.
async fn list_credit_events(
    State(app_state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
    Path(retailer_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    current_admin(&jar, &headers, &app_state)?;

    let events = app_state
        .credit_ledger_use_cases
        .list_events(retailer_id, current_period_month())
        .await?;

    Ok(Json(
        events
            .into_iter()
            .map(CreditEventResponse::from)
            .collect::<Vec<_>>(),
    ))
}
