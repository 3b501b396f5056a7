use crate::domain::{LedgerAccount, Transaction};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Global refund rule applied to manual admin refunds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RefundPolicy {
    /// Refund window in days.
    pub days: i64,
    /// Max percentage of granted credits consumed before refunds need force.
    pub usage_limit: f64,
}

impl Default for RefundPolicy {
    fn default() -> Self {
        Self {
            days: 7,
            usage_limit: 20.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RefundAssessment {
    pub days_since: i64,
    pub usage_percent: f64,
    pub within_policy: bool,
}

impl RefundPolicy {
    pub fn assess(
        &self,
        account: &LedgerAccount,
        transaction: &Transaction,
        now: DateTime<Utc>,
    ) -> RefundAssessment {
        let days_since = days_since(transaction.date, now);
        let usage_percent = usage_percent(account, transaction);
        let within_policy = days_since <= self.days && usage_percent <= self.usage_limit;

        RefundAssessment {
            days_since,
            usage_percent,
            within_policy,
        }
    }
}

/// Whole days between two instants, rounded up.
pub fn days_since(then: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let millis = (now - then).num_milliseconds().abs();
    (millis + MILLIS_PER_DAY - 1) / MILLIS_PER_DAY
}

/// Consumption ratio used by the refund rule.
///
/// Compares today's spent points against the credits granted by the one
/// transaction being refunded, not lifetime usage of that grant.
pub fn usage_percent(account: &LedgerAccount, transaction: &Transaction) -> f64 {
    let granted = transaction.credits_added.max(1);
    account.daily_usage_points as f64 / granted as f64 * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Gateway, Money, TransactionKind};
    use chrono::Duration;

    fn payment(credits: i64, age: Duration) -> Transaction {
        let mut tx = Transaction::record(
            "pi_1",
            TransactionKind::Payment {
                gateway: Gateway::Stripe,
                paid: Money::new(1900, "USD"),
            },
            "Pro",
            0,
            credits,
            "Pro plan purchase",
        );
        tx.date = Utc::now() - age;
        tx
    }

    #[test]
    fn days_since_rounds_partial_days_up() {
        let now = Utc::now();
        assert_eq!(days_since(now, now), 0);
        assert_eq!(days_since(now - Duration::hours(1), now), 1);
        assert_eq!(days_since(now - Duration::hours(25), now), 2);
        assert_eq!(days_since(now + Duration::hours(25), now), 2);
    }

    #[test]
    fn old_transaction_violates_policy() {
        let policy = RefundPolicy {
            days: 7,
            usage_limit: 20.0,
        };
        let account = LedgerAccount::new("a@example.com".to_string(), 0);
        let assessment = policy.assess(&account, &payment(500, Duration::days(10)), Utc::now());

        assert_eq!(assessment.days_since, 10);
        assert!(!assessment.within_policy);
    }

    #[test]
    fn heavy_usage_violates_policy() {
        let policy = RefundPolicy::default();
        let mut account = LedgerAccount::new("a@example.com".to_string(), 0);
        account.daily_usage_points = 150;
        let assessment = policy.assess(&account, &payment(500, Duration::hours(2)), Utc::now());

        assert!((assessment.usage_percent - 30.0).abs() < f64::EPSILON);
        assert!(!assessment.within_policy);
    }

    #[test]
    fn zero_credit_grant_does_not_divide_by_zero() {
        let mut account = LedgerAccount::new("a@example.com".to_string(), 0);
        account.daily_usage_points = 3;
        let tx = payment(0, Duration::hours(1));
        assert!((usage_percent(&account, &tx) - 300.0).abs() < f64::EPSILON);
    }
}
