use crate::application::{
    user_lookup, AccountRef, LedgerError, PlanCatalog, RevocationEngine, RevocationOutcome,
    RevocationRequest,
};
use crate::domain::{
    AuditLevel, LedgerAccount, RefundAssessment, RefundPolicy, RevocationReason, Transaction,
    TransactionKind,
};
use crate::infrastructure::{AuditSink, GatewayClient, LedgerRepository, PlanRepository};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequest {
    pub user_id: Uuid,
    pub transaction_id: String,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefundOutcome {
    pub assessment: Option<RefundAssessment>,
    pub gateway_refund_id: Option<String>,
    pub revocation: RevocationOutcome,
}

/// Admin refunds: policy check, gateway refund, then revocation.
pub struct RefundService<L, P>
where
    L: LedgerRepository,
    P: PlanRepository,
{
    ledger: Arc<L>,
    catalog: Arc<PlanCatalog<P>>,
    revocation: Arc<RevocationEngine<L>>,
    gateway: Arc<dyn GatewayClient>,
    audit: Arc<dyn AuditSink>,
}

impl<L, P> RefundService<L, P>
where
    L: LedgerRepository,
    P: PlanRepository,
{
    pub fn new(
        ledger: Arc<L>,
        catalog: Arc<PlanCatalog<P>>,
        revocation: Arc<RevocationEngine<L>>,
        gateway: Arc<dyn GatewayClient>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            ledger,
            catalog,
            revocation,
            gateway,
            audit,
        }
    }

    pub async fn refund(&self, request: &RefundRequest) -> Result<RefundOutcome, LedgerError> {
        self.refund_at(request, Utc::now()).await
    }

    pub async fn refund_at(
        &self,
        request: &RefundRequest,
        now: DateTime<Utc>,
    ) -> Result<RefundOutcome, LedgerError> {
        let account = self
            .ledger
            .get_by_id(request.user_id)
            .await
            .map_err(user_lookup(request.user_id))?;

        let transaction = self
            .ledger
            .find_transaction(account.id, &request.transaction_id)
            .await?
            .ok_or_else(|| LedgerError::TransactionNotFound(request.transaction_id.clone()))?;

        if transaction.reverses().is_some() {
            return Err(LedgerError::InvalidRequest(format!(
                "{} is itself a revocation",
                transaction.id
            )));
        }

        // Never refund twice at the gateway.
        if self
            .ledger
            .find_revocation(account.id, &transaction.id)
            .await?
            .is_some()
        {
            return Ok(RefundOutcome {
                assessment: None,
                gateway_refund_id: None,
                revocation: RevocationOutcome::Duplicate,
            });
        }

        let policy = self.catalog.refund_policy().await?;
        let assessment = check_refund(&policy, &account, &transaction, request.force, now)?;

        let gateway_refund_id = match &transaction.kind {
            TransactionKind::Payment { gateway, paid } => Some(
                self.gateway
                    .refund_payment(*gateway, &transaction.id, paid)
                    .await?,
            ),
            _ => None,
        };

        let revocation = self
            .revocation
            .revoke(&RevocationRequest {
                account: AccountRef::Id(account.id),
                transaction_id: transaction.id.clone(),
                gateway: transaction.kind.gateway(),
                reason: RevocationReason::Refund,
            })
            .await?;

        info!(
            user_id = %account.id,
            transaction_id = %transaction.id,
            forced = request.force,
            days_since = assessment.days_since,
            usage_percent = assessment.usage_percent,
            "Admin refund processed"
        );

        self.audit
            .record(
                AuditLevel::Info,
                "Admin refund processed",
                json!({
                    "userId": account.id,
                    "transactionId": transaction.id,
                    "force": request.force,
                    "withinPolicy": assessment.within_policy,
                    "gatewayRefundId": gateway_refund_id,
                }),
            )
            .await;

        Ok(RefundOutcome {
            assessment: Some(assessment),
            gateway_refund_id,
            revocation,
        })
    }
}

/// Refund guard: outside the policy only a forced refund passes.
pub fn check_refund(
    policy: &RefundPolicy,
    account: &LedgerAccount,
    transaction: &Transaction,
    force: bool,
    now: DateTime<Utc>,
) -> Result<RefundAssessment, LedgerError> {
    let assessment = policy.assess(account, transaction, now);

    if assessment.within_policy || force {
        return Ok(assessment);
    }

    warn!(
        user_id = %account.id,
        transaction_id = %transaction.id,
        days_since = assessment.days_since,
        usage_percent = assessment.usage_percent,
        "Refund outside policy"
    );

    Err(LedgerError::PolicyViolation {
        days_since: assessment.days_since,
        usage_percent: assessment.usage_percent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Gateway, Money};
    use chrono::Duration;

    #[test]
    fn old_transaction_needs_force() {
        let now = Utc::now();
        let account = LedgerAccount::new("a@example.com".to_string(), 0);
        let mut tx = Transaction::record(
            "pi_old",
            TransactionKind::Payment {
                gateway: Gateway::Stripe,
                paid: Money::new(1900, "USD"),
            },
            "Pro",
            0,
            500,
            "Pro plan (monthly)",
        );
        tx.date = now - Duration::days(30);
        let policy = RefundPolicy::default();

        match check_refund(&policy, &account, &tx, false, now) {
            Err(LedgerError::PolicyViolation { days_since, .. }) => assert_eq!(days_since, 30),
            other => panic!("expected violation, got {:?}", other),
        }

        let forced = check_refund(&policy, &account, &tx, true, now).unwrap();
        assert!(!forced.within_policy);
    }
}
