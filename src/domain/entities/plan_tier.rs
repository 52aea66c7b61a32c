use serde::{Deserialize, Serialize};

/// Plan tier, ordered by entitlement rank.
///
/// The derived `Ord` follows declaration order, so `Starter < Basic < Premium < Enterprise`
/// and tier comparisons can be written directly (`new > old`).
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    sqlx::Type,
)]
#[sqlx(type_name = "plan_tier", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum PlanTier {
    #[default]
    Starter,
    Basic,
    Premium,
    Enterprise,
}

impl PlanTier {
    pub const ALL: [PlanTier; 4] = [
        PlanTier::Starter,
        PlanTier::Basic,
        PlanTier::Premium,
        PlanTier::Enterprise,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Starter => "STARTER",
            PlanTier::Basic => "BASIC",
            PlanTier::Premium => "PREMIUM",
            PlanTier::Enterprise => "ENTERPRISE",
        }
    }

    /// Numeric rank used for upgrade/downgrade decisions.
    pub fn rank(&self) -> u8 {
        match self {
            PlanTier::Starter => 0,
            PlanTier::Basic => 1,
            PlanTier::Premium => 2,
            PlanTier::Enterprise => 3,
        }
    }

    /// Hardcoded included-session quota, used when the admin settings
    /// document is missing or does not carry a usable value.
    pub fn default_included(&self) -> i32 {
        match self {
            PlanTier::Starter => 50,
            PlanTier::Basic => 500,
            PlanTier::Premium => 2500,
            PlanTier::Enterprise => 2500,
        }
    }

    /// Default shop limit. `None` means unlimited.
    pub fn default_shops_limit(&self) -> Option<i32> {
        match self {
            PlanTier::Starter => Some(1),
            PlanTier::Basic => Some(3),
            PlanTier::Premium => Some(10),
            PlanTier::Enterprise => None,
        }
    }

    pub fn default_allows_subdomains(&self) -> bool {
        matches!(self, PlanTier::Premium | PlanTier::Enterprise)
    }
}

impl std::fmt::Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PlanTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "STARTER" => Ok(PlanTier::Starter),
            "BASIC" => Ok(PlanTier::Basic),
            "PREMIUM" => Ok(PlanTier::Premium),
            "ENTERPRISE" => Ok(PlanTier::Enterprise),
            _ => Err(format!(
                "Invalid plan tier: {}. Must be one of STARTER, BASIC, PREMIUM, ENTERPRISE",
                s
            )),
        }
    }
}
