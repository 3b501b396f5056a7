use crate::domain::{BillingCycle, LedgerAccount};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub monthly_price: i64,
    pub yearly_price: i64,
    /// Grant per monthly billing period.
    pub credits: i64,
    pub daily_limit_monthly: i64,
    pub daily_limit_yearly: i64,
    pub max_accounts: i32,
    pub allow_images: bool,
    pub allow_tracking: bool,
    pub purchase_enabled: bool,
}

impl Plan {
    pub fn matches(&self, name_or_id: &str) -> bool {
        self.id == name_or_id || self.name.eq_ignore_ascii_case(name_or_id)
    }

    /// Credits granted by one purchase of `cycle` (yearly grants twelve months upfront).
    pub fn credits_for(&self, cycle: BillingCycle) -> i64 {
        self.credits * cycle.grant_multiplier()
    }

    pub fn daily_limit_for(&self, cycle: BillingCycle) -> i64 {
        match cycle {
            BillingCycle::Monthly => self.daily_limit_monthly,
            BillingCycle::Yearly => self.daily_limit_yearly,
        }
    }
}

/// Daily credit cap for an account; `0` means unlimited.
///
/// A positive `custom_daily_limit` wins over the plan default.
pub fn resolve_daily_limit(account: &LedgerAccount, plan: Option<&Plan>) -> i64 {
    match account.custom_daily_limit {
        Some(limit) if limit > 0 => limit,
        _ => plan
            .map(|p| p.daily_limit_for(account.billing_cycle))
            .unwrap_or(0),
    }
}

/// Whether spending `cost` more today would break the cap.
pub fn exceeds_daily_limit(limit: i64, points_today: i64, cost: i64) -> bool {
    limit > 0 && points_today + cost > limit
}
