//! Plan-change rules.
//!
//! Credit is only ever added mid-period, on an upgrade. A downgrade's smaller quota
//! takes effect when the next period's ledger row is created from the then-current plan.

use serde::Serialize;

use crate::domain::entities::plan_tier::PlanTier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanChange {
    Upgrade,
    Downgrade,
    Lateral,
}

impl PlanChange {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanChange::Upgrade => "upgrade",
            PlanChange::Downgrade => "downgrade",
            PlanChange::Lateral => "lateral",
        }
    }
}

pub fn classify(old: PlanTier, new: PlanTier) -> PlanChange {
    match new.rank().cmp(&old.rank()) {
        std::cmp::Ordering::Greater => PlanChange::Upgrade,
        std::cmp::Ordering::Less => PlanChange::Downgrade,
        std::cmp::Ordering::Equal => PlanChange::Lateral,
    }
}

/// Amount added to `included` for a change to a tier whose quota is `new_quota`.
pub fn compute_top_up(change: PlanChange, new_quota: i32) -> Option<i32> {
    match change {
        PlanChange::Upgrade if new_quota > 0 => Some(new_quota),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanChangeDecision {
    pub change: PlanChange,
    pub top_up: Option<i32>,
}

pub fn decide(old: PlanTier, new: PlanTier, new_quota: i32) -> PlanChangeDecision {
    let change = classify(old, new);
    PlanChangeDecision {
        change,
        top_up: compute_top_up(change, new_quota),
    }
}
