use crate::application::retry::{commit_with_retry, Committed};
use crate::application::{user_lookup, LedgerError, PlanCatalog};
use crate::domain::{
    add_months, receipt_id, AccountStatus, AuditLevel, LedgerAccount, NotificationTemplate,
    PaymentSucceeded, Transaction, TransactionKind,
};
use crate::infrastructure::{AuditSink, LedgerRepository, Notifier, PlanRepository};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum ActivationOutcome {
    Applied(Transaction),
    /// The payment's transaction id is already on the ledger.
    Duplicate,
}

/// Turns a confirmed payment into plan, credits and subscription window.
pub struct ActivationEngine<L, P>
where
    L: LedgerRepository,
    P: PlanRepository,
{
    ledger: Arc<L>,
    catalog: Arc<PlanCatalog<P>>,
    notifier: Arc<dyn Notifier>,
    audit: Arc<dyn AuditSink>,
}

impl<L, P> ActivationEngine<L, P>
where
    L: LedgerRepository,
    P: PlanRepository,
{
    pub fn new(
        ledger: Arc<L>,
        catalog: Arc<PlanCatalog<P>>,
        notifier: Arc<dyn Notifier>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            ledger,
            catalog,
            notifier,
            audit,
        }
    }

    pub async fn activate(
        &self,
        payment: &PaymentSucceeded,
    ) -> Result<ActivationOutcome, LedgerError> {
        let (plan_name, credits_to_add) = self.resolve_grant(payment).await?;

        let account = self
            .ledger
            .get_by_email(&payment.email)
            .await
            .map_err(user_lookup(&payment.email))?;

        if self
            .ledger
            .find_transaction(account.id, &payment.transaction_id)
            .await?
            .is_some()
        {
            warn!(
                user_id = %account.id,
                transaction_id = %payment.transaction_id,
                "Payment already applied, ignoring replay"
            );
            return Ok(ActivationOutcome::Duplicate);
        }

        let committed = commit_with_retry(self.ledger.as_ref(), account, |current| {
            apply_payment(current, payment, &plan_name, credits_to_add, Utc::now()).map(Some)
        })
        .await?;

        let (account, transaction) = match committed {
            Committed::Applied {
                account,
                transaction: Some(transaction),
            } => (account, transaction),
            Committed::Applied { .. } | Committed::Unchanged => {
                return Err(LedgerError::InvalidRequest(
                    "Activation produced no ledger entry".to_string(),
                ));
            }
            Committed::Duplicate => {
                warn!(
                    transaction_id = %payment.transaction_id,
                    "Payment already applied, ignoring replay"
                );
                return Ok(ActivationOutcome::Duplicate);
            }
        };

        info!(
            user_id = %account.id,
            transaction_id = %transaction.id,
            plan = %account.plan,
            credits_added = transaction.credits_added,
            balance = transaction.final_balance,
            "Plan activated"
        );

        self.audit
            .record(
                AuditLevel::Info,
                "Plan activated",
                json!({
                    "userId": account.id,
                    "transactionId": transaction.id,
                    "gateway": payment.gateway,
                    "plan": account.plan,
                    "creditsAdded": transaction.credits_added,
                }),
            )
            .await;

        self.notifier
            .notify(
                NotificationTemplate::PaymentSuccess,
                &account.email,
                json!({
                    "planName": account.plan,
                    "billingCycle": account.billing_cycle,
                    "credits": transaction.credits_added,
                    "amount": payment.paid.amount_minor,
                    "currency": payment.paid.currency,
                    "receiptId": receipt_id(&transaction.id),
                    "subscriptionEnd": account.subscription_end,
                }),
            )
            .await;

        Ok(ActivationOutcome::Applied(transaction))
    }

    /// Plan name to record and credits to grant for this purchase.
    async fn resolve_grant(&self, payment: &PaymentSucceeded) -> Result<(String, i64), LedgerError> {
        let plan = self.catalog.find_plan(&payment.plan_name).await?;
        let multiplier = payment.billing_cycle.grant_multiplier();

        let (plan_name, monthly_credits) = match (payment.credits_override, plan) {
            (Some(credits), plan) => (
                plan.map(|p| p.name).unwrap_or_else(|| payment.plan_name.clone()),
                credits,
            ),
            (None, Some(plan)) => (plan.name.clone(), plan.credits),
            (None, None) => return Err(LedgerError::PlanNotFound(payment.plan_name.clone())),
        };

        if monthly_credits < 0 {
            return Err(LedgerError::InvalidRequest(format!(
                "Negative credit grant: {}",
                monthly_credits
            )));
        }

        let credits = monthly_credits.checked_mul(multiplier).ok_or_else(|| {
            LedgerError::InvalidRequest(format!("Credit grant overflows: {}", monthly_credits))
        })?;

        Ok((plan_name, credits))
    }
}

/// New account state and ledger entry for one payment.
///
/// A still-running window is extended from its end; otherwise the new one
/// starts at `now`.
pub(crate) fn apply_payment(
    current: &LedgerAccount,
    payment: &PaymentSucceeded,
    plan_name: &str,
    credits_to_add: i64,
    now: DateTime<Utc>,
) -> Result<(LedgerAccount, Option<Transaction>), LedgerError> {
    let start = match current.subscription_end {
        Some(end) if end > now => end,
        _ => now,
    };
    let end = add_months(start, payment.billing_cycle.months()).ok_or_else(|| {
        LedgerError::InvalidRequest("Subscription end out of range".to_string())
    })?;
    let credits = current.credits.checked_add(credits_to_add).ok_or_else(|| {
        LedgerError::InvalidRequest("Credit balance overflows".to_string())
    })?;

    let mut account = current.clone();
    account.plan = plan_name.to_string();
    account.billing_cycle = payment.billing_cycle;
    account.status = AccountStatus::Active;
    account.credits = credits;
    account.subscription_start = Some(start);
    account.subscription_end = Some(end);
    account.auto_renew = true;
    account.low_credits_notified = false;

    let transaction = Transaction::record(
        payment.transaction_id.clone(),
        TransactionKind::Payment {
            gateway: payment.gateway,
            paid: payment.paid.clone(),
        },
        plan_name,
        current.credits,
        account.credits,
        format!("{} plan ({})", plan_name, payment.billing_cycle),
    )
    .with_sub_description(format!("{} credits added", credits_to_add));

    Ok((account, Some(transaction)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BillingCycle, Gateway, Money};
    use chrono::{Duration, TimeZone};

    fn payment(cycle: BillingCycle) -> PaymentSucceeded {
        PaymentSucceeded {
            gateway: Gateway::Stripe,
            email: "user@example.com".to_string(),
            plan_name: "Pro".to_string(),
            billing_cycle: cycle,
            transaction_id: "pi_42".to_string(),
            paid: Money::new(1900, "USD"),
            credits_override: None,
        }
    }

    #[test]
    fn running_window_is_extended_from_its_end() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        let mut account = LedgerAccount::new("user@example.com".to_string(), 100);
        account.subscription_end = Some(now + Duration::days(10));

        let (updated, tx) =
            apply_payment(&account, &payment(BillingCycle::Monthly), "Pro", 500, now).unwrap();
        let tx = tx.unwrap();

        assert_eq!(updated.subscription_start, Some(now + Duration::days(10)));
        assert_eq!(
            updated.subscription_end,
            add_months(now + Duration::days(10), 1)
        );
        assert_eq!(updated.credits, 600);
        assert_eq!(tx.credits_added, 500);
        assert!(tx.is_balanced());
    }

    #[test]
    fn lapsed_window_starts_now() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        let mut account = LedgerAccount::new("user@example.com".to_string(), 0);
        account.subscription_end = Some(now - Duration::days(3));
        account.low_credits_notified = true;

        let (updated, _) =
            apply_payment(&account, &payment(BillingCycle::Yearly), "Pro", 6000, now).unwrap();

        assert_eq!(updated.subscription_start, Some(now));
        assert_eq!(updated.subscription_end, add_months(now, 12));
        assert_eq!(updated.billing_cycle, BillingCycle::Yearly);
        assert!(!updated.low_credits_notified);
        assert!(updated.auto_renew);
    }
}
