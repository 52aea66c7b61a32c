use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::{plan_tier::PlanTier, subscription_status::SubscriptionStatus};

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionRecord {
    pub id: Uuid,
    pub retailer_id: Uuid,
    /// `None` for records created by an admin assignment.
    pub external_subscription_id: Option<String>,
    pub external_customer_id: Option<String>,
    pub status: SubscriptionStatus,
    pub plan_tier: PlanTier,
    /// Quota snapshot taken when the plan was assigned.
    pub included_sessions: i32,
    pub price_id: Option<String>,
    pub period_start: Option<NaiveDateTime>,
    pub period_end: Option<NaiveDateTime>,
    pub cancel_at_period_end: bool,
    /// Deferred target applied by the renewal scheduler at `period_end`.
    pub next_plan_tier: Option<PlanTier>,
    /// Timestamp of the newest gateway event applied to this record.
    pub last_event_at: Option<DateTime<Utc>>,
    pub superseded_by: Option<Uuid>,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}

impl SubscriptionRecord {
    pub fn is_admin_assigned(&self) -> bool {
        self.external_subscription_id.is_none()
    }

    pub fn has_pending_downgrade(&self) -> bool {
        self.cancel_at_period_end && self.next_plan_tier.is_some()
    }

    /// Whether a gateway event stamped `event_at` is older than what this record already reflects.
    pub fn is_stale(&self, event_at: DateTime<Utc>) -> bool {
        self.last_event_at.is_some_and(|last| event_at < last)
    }
}
