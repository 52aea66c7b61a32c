use chrono::NaiveDateTime;
use serde::Serialize;
use uuid::Uuid;

use super::plan_tier::PlanTier;

/// The denormalized billing projection kept on the retailer account for fast reads.
#[derive(Debug, Clone, Serialize)]
pub struct RetailerProfile {
    pub id: Uuid,
    pub plan_tier: PlanTier,
    pub is_active: bool,
    pub gateway_customer_id: Option<String>,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}
