use crate::application::retry::{commit_with_retry, Committed};
use crate::application::LedgerError;
use crate::domain::{
    synthetic_id, AccountStatus, AuditLevel, LedgerAccount, NotificationTemplate, Transaction,
    TransactionKind, STARTER_PLAN,
};
use crate::infrastructure::{AuditSink, LedgerRepository, Notifier};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

const NEVER_RAN: i64 = i64::MIN;

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub expired: usize,
    pub deleted: usize,
    pub failures: usize,
}

/// Periodic expiration and deletion sweep, debounced to one run per interval.
pub struct SweepService<L>
where
    L: LedgerRepository,
{
    ledger: Arc<L>,
    notifier: Arc<dyn Notifier>,
    audit: Arc<dyn AuditSink>,
    interval: Duration,
    last_run_ms: AtomicI64,
}

impl<L> SweepService<L>
where
    L: LedgerRepository,
{
    pub fn new(
        ledger: Arc<L>,
        notifier: Arc<dyn Notifier>,
        audit: Arc<dyn AuditSink>,
        interval: Duration,
    ) -> Self {
        Self {
            ledger,
            notifier,
            audit,
            interval,
            last_run_ms: AtomicI64::new(NEVER_RAN),
        }
    }

    /// Runs the sweep unless one already ran within the interval.
    pub async fn sweep_if_due(&self, now: DateTime<Utc>) -> Option<SweepReport> {
        let now_ms = now.timestamp_millis();
        let last = self.last_run_ms.load(Ordering::Acquire);

        if last != NEVER_RAN && now_ms.saturating_sub(last) < self.interval.num_milliseconds() {
            return None;
        }
        if self
            .last_run_ms
            .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }

        Some(self.sweep(now).await)
    }

    /// One full pass. Failures on a single account are logged and counted.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        match self.ledger.list_expired(now).await {
            Ok(accounts) => {
                for account in accounts {
                    let user_id = account.id;
                    match self.expire(account, now).await {
                        Ok(true) => report.expired += 1,
                        Ok(false) => {}
                        Err(e) => {
                            warn!(user_id = %user_id, error = %e, "Failed to expire subscription");
                            report.failures += 1;
                        }
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to list expired subscriptions");
                report.failures += 1;
            }
        }

        match self.ledger.list_due_deletions(now).await {
            Ok(accounts) => {
                for account in accounts {
                    match self.ledger.delete_if_due(account.id, now).await {
                        Ok(true) => {
                            info!(user_id = %account.id, "Scheduled account deletion completed");
                            report.deleted += 1;
                        }
                        Ok(false) => {}
                        Err(e) => {
                            warn!(user_id = %account.id, error = %e, "Failed to delete account");
                            report.failures += 1;
                        }
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to list scheduled deletions");
                report.failures += 1;
            }
        }

        if report != SweepReport::default() {
            let level = if report.failures > 0 {
                AuditLevel::Warn
            } else {
                AuditLevel::Info
            };
            self.audit
                .record(level, "Ledger sweep finished", json!(report))
                .await;
        }

        info!(
            expired = report.expired,
            deleted = report.deleted,
            failures = report.failures,
            "Ledger sweep finished"
        );
        report
    }

    /// Downgrades one expired account; `false` if it no longer needed it.
    async fn expire(&self, account: LedgerAccount, now: DateTime<Utc>) -> Result<bool, LedgerError> {
        let expired_plan = account.plan.clone();

        let committed = commit_with_retry(self.ledger.as_ref(), account, |current| {
            Ok(apply_expiration(current, now))
        })
        .await?;

        let Committed::Applied { account, .. } = committed else {
            return Ok(false);
        };

        info!(user_id = %account.id, plan = %expired_plan, "Subscription expired");
        self.notifier
            .notify(
                NotificationTemplate::PlanExpiredNotice,
                &account.email,
                json!({ "planName": expired_plan }),
            )
            .await;

        Ok(true)
    }
}

/// Expired paid accounts drop to Starter; anything else is left alone.
pub(crate) fn apply_expiration(
    current: &LedgerAccount,
    now: DateTime<Utc>,
) -> Option<(LedgerAccount, Option<Transaction>)> {
    let lapsed = current
        .subscription_end
        .map(|end| end < now)
        .unwrap_or(false);
    if current.is_starter() || !lapsed {
        return None;
    }

    let mut account = current.clone();
    account.plan = STARTER_PLAN.to_string();
    account.status = AccountStatus::Active;
    account.daily_usage_points = 0;

    let transaction = Transaction::record(
        synthetic_id("EXP", now),
        TransactionKind::PlanExpired,
        STARTER_PLAN,
        current.credits,
        current.credits,
        format!("{} plan expired", current.plan),
    );

    Some((account, Some(transaction)))
}
