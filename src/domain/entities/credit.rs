use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Origin of a ledger delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "credit_source", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CreditSource {
    Bundle,
    Upgrade,
    AdminPlanUpgrade,
    Renewal,
}

impl CreditSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreditSource::Bundle => "bundle",
            CreditSource::Upgrade => "upgrade",
            CreditSource::AdminPlanUpgrade => "admin_plan_upgrade",
            CreditSource::Renewal => "renewal",
        }
    }

    /// Which ledger counter a credit from this source increments.
    pub fn bucket(&self) -> CreditBucket {
        match self {
            CreditSource::Bundle => CreditBucket::Purchased,
            CreditSource::Upgrade | CreditSource::AdminPlanUpgrade | CreditSource::Renewal => {
                CreditBucket::Included
            }
        }
    }
}

impl std::fmt::Display for CreditSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditBucket {
    Included,
    Purchased,
}

/// First day of the calendar month containing `at`. Ledger rows are keyed by this.
pub fn period_month_of(at: DateTime<Utc>) -> NaiveDate {
    let date = at.date_naive();
    date.with_day(1).unwrap_or(date)
}

pub fn current_period_month() -> NaiveDate {
    period_month_of(Utc::now())
}

/// Upper bound for an included-session quota, whether it comes from the settings document
/// or an admin override.
pub const MAX_INCLUDED_QUOTA: i32 = 1_000_000;

/// One ledger row. `available` is derived, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreditBalance {
    pub retailer_id: Uuid,
    pub period_month: NaiveDate,
    pub included: i32,
    pub purchased: i32,
    pub consumed: i32,
}

impl CreditBalance {
    /// Widened to `i64` so counters near `i32::MAX` cannot overflow.
    pub fn available(&self) -> i64 {
        i64::from(self.included) + i64::from(self.purchased) - i64::from(self.consumed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreditEvent {
    pub id: Uuid,
    pub retailer_id: Uuid,
    pub period_month: NaiveDate,
    pub delta: i32,
    pub source: CreditSource,
    pub external_ref: String,
    pub created_at: Option<chrono::NaiveDateTime>,
}
