use axum::{
    Json, Router,
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    routing::{get, post},
};
use axum_extra::extract::cookie::CookieJar;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    adapters::http::{app_state::AppState, auth::current_retailer},
    app_error::AppResult,
    domain::entities::{
        plan_tier::PlanTier, subscription::SubscriptionRecord,
        subscription_status::SubscriptionStatus,
    },
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/plans", get(list_plans))
        .route("/credits", get(get_credits))
        .route("/subscription", get(get_subscription))
        .route("/cancel", post(cancel_subscription))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SubscriptionResponse {
    id: Uuid,
    plan_tier: PlanTier,
    status: SubscriptionStatus,
    included_sessions: i32,
    period_start: Option<NaiveDateTime>,
    period_end: Option<NaiveDateTime>,
    cancel_at_period_end: bool,
    /// Tier the plan falls back to at `periodEnd`, if a downgrade is pending.
    pending_downgrade: Option<PlanTier>,
    admin_assigned: bool,
}

impl From<&SubscriptionRecord> for SubscriptionResponse {
    fn from(record: &SubscriptionRecord) -> Self {
        Self {
            id: record.id,
            plan_tier: record.plan_tier,
            status: record.status,
            included_sessions: record.included_sessions,
            period_start: record.period_start,
            period_end: record.period_end,
            cancel_at_period_end: record.cancel_at_period_end,
            pending_downgrade: record
                .has_pending_downgrade()
                .then_some(record.next_plan_tier)
                .flatten(),
            admin_assigned: record.is_admin_assigned(),
        }
    }
}

/// GET /api/billing/plans
/// Public: the effective tier catalog.
async fn list_plans(State(app_state): State<AppState>) -> AppResult<impl IntoResponse> {
    let catalog = app_state.plan_catalog_use_cases.load().await;
    Ok(Json(catalog.all_tiers()))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreditsResponse {
    retailer_id: Uuid,
    period_month: NaiveDate,
    included: i32,
    purchased: i32,
    consumed: i32,
    available: i64,
    subscription_period_start: Option<NaiveDateTime>,
    subscription_period_end: Option<NaiveDateTime>,
}

/// GET /api/billing/credits
/// Opens the current period row on first read.
async fn get_credits(
    State(app_state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    let retailer_id = current_retailer(&jar, &headers, &app_state)?;

    let current = app_state
        .subscription_use_cases
        .get_current(retailer_id)
        .await?;
    let default_included = match current.as_ref().filter(|s| s.status.is_active()) {
        Some(active) => active.included_sessions,
        None => {
            let tier = app_state
                .subscription_use_cases
                .effective_tier(retailer_id)
                .await?;
            app_state
                .plan_catalog_use_cases
                .load()
                .await
                .included_quota_for(tier)
        }
    };

    let balance = app_state
        .credit_ledger_use_cases
        .ensure_row(retailer_id, default_included)
        .await?
        .balance;

    Ok(Json(CreditsResponse {
        retailer_id,
        period_month: balance.period_month,
        included: balance.included,
        purchased: balance.purchased,
        consumed: balance.consumed,
        available: balance.available(),
        subscription_period_start: current.as_ref().and_then(|s| s.period_start),
        subscription_period_end: current.as_ref().and_then(|s| s.period_end),
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CurrentSubscriptionResponse {
    plan_tier: PlanTier,
    subscription: Option<SubscriptionResponse>,
}

/// GET /api/billing/subscription
async fn get_subscription(
    State(app_state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    let retailer_id = current_retailer(&jar, &headers, &app_state)?;

    let plan_tier = app_state
        .subscription_use_cases
        .effective_tier(retailer_id)
        .await?;
    let current = app_state
        .subscription_use_cases
        .get_current(retailer_id)
        .await?;

    Ok(Json(CurrentSubscriptionResponse {
        plan_tier,
        subscription: current.as_ref().map(SubscriptionResponse::from),
    }))
}

/// POST /api/billing/cancel
/// Cancels at period end; the plan stays in effect until then.
async fn cancel_subscription(
    State(app_state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    let retailer_id = current_retailer(&jar, &headers, &app_state)?;

    let record = app_state
        .subscription_use_cases
        .cancel_at_period_end(retailer_id)
        .await?;

    Ok(Json(SubscriptionResponse::from(&record)))
}
