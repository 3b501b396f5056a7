use chrono::{DateTime, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Plan key of the canonical free tier.
pub const STARTER_PLAN: &str = "Starter";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BillingCycle {
    Monthly,
    Yearly,
}

impl BillingCycle {
    /// Length of one paid period, in calendar months.
    pub fn months(self) -> u32 {
        match self {
            BillingCycle::Monthly => 1,
            BillingCycle::Yearly => 12,
        }
    }

    /// How many monthly credit grants one purchase of this cycle is worth.
    pub fn grant_multiplier(self) -> i64 {
        match self {
            BillingCycle::Monthly => 1,
            BillingCycle::Yearly => 12,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "PascalCase")]
pub enum AccountStatus {
    Active,
    Suspended,
    Banned,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UserRole {
    User,
    Admin,
}

/// Per-user persistent state of credits, plan and subscription window.
///
/// `version` is bumped by every committed mutation and is the optimistic
/// concurrency token for read-modify-write operations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerAccount {
    pub id: Uuid,
    pub email: String,
    pub role: UserRole,
    pub plan: String,
    pub billing_cycle: BillingCycle,
    pub credits: i64,
    pub custom_daily_limit: Option<i64>,
    pub daily_usage: i64,
    pub daily_usage_points: i64,
    pub last_usage_date: Option<NaiveDate>,
    pub subscription_start: Option<DateTime<Utc>>,
    pub subscription_end: Option<DateTime<Utc>>,
    pub auto_renew: bool,
    pub status: AccountStatus,
    pub status_message: Option<String>,
    pub deletion_scheduled_date: Option<DateTime<Utc>>,
    pub low_credits_notified: bool,
    pub total_spent: i64,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LedgerAccount {
    /// Fresh signup record: free tier, signup bonus, one month window.
    pub fn new(email: String, signup_bonus: i64) -> Self {
        let now = Utc::now();

        Self {
            id: Uuid::new_v4(),
            email,
            role: UserRole::User,
            plan: STARTER_PLAN.to_string(),
            billing_cycle: BillingCycle::Monthly,
            credits: signup_bonus.max(0),
            custom_daily_limit: None,
            daily_usage: 0,
            daily_usage_points: 0,
            last_usage_date: None,
            subscription_start: Some(now),
            subscription_end: add_months(now, 1),
            auto_renew: true,
            status: AccountStatus::Active,
            status_message: None,
            deletion_scheduled_date: None,
            low_credits_notified: false,
            total_spent: 0,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    pub fn is_starter(&self) -> bool {
        self.plan == STARTER_PLAN
    }

    /// `(dailyUsage, dailyUsagePoints)` as seen on `today`: counters from an
    /// earlier day read as zero.
    pub fn usage_on(&self, today: NaiveDate) -> (i64, i64) {
        if self.last_usage_date == Some(today) {
            (self.daily_usage, self.daily_usage_points)
        } else {
            (0, 0)
        }
    }

    /// Paid period still running at `now`.
    pub fn has_future_end(&self, now: DateTime<Utc>) -> bool {
        self.subscription_end.map(|end| end > now).unwrap_or(false)
    }
}

/// Adds calendar months, clamping to the last day of the target month.
pub fn add_months(from: DateTime<Utc>, months: u32) -> Option<DateTime<Utc>> {
    from.checked_add_months(Months::new(months))
}

/// Per action type usage counters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageStat {
    pub action_type: String,
    pub count: i64,
    pub cost: i64,
}

/// Counters returned by a successful metered charge.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageSnapshot {
    pub credits: i64,
    pub daily_usage: i64,
    pub daily_usage_points: i64,
}
