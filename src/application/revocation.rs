use crate::application::retry::{commit_with_retry, Committed};
use crate::application::{user_lookup, LedgerError};
use crate::domain::{
    synthetic_id, AuditLevel, BillingCycle, Gateway, LedgerAccount, NotificationTemplate,
    RevocationReason, Transaction, TransactionKind, STARTER_PLAN,
};
use crate::infrastructure::{AuditSink, LedgerRepository, Notifier, RepositoryError};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// How to find the account a revocation applies to.
#[derive(Debug, Clone, PartialEq)]
pub enum AccountRef {
    Id(Uuid),
    Email(String),
    /// Whoever owns the transaction being reversed.
    TransactionOwner,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RevocationRequest {
    pub account: AccountRef,
    pub transaction_id: String,
    pub gateway: Option<Gateway>,
    pub reason: RevocationReason,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RevocationOutcome {
    Applied(Transaction),
    /// The transaction was already reversed.
    Duplicate,
}

/// Reverses a grant after a refund or dispute: back to Starter, credits
/// reduced by what the original payment added.
pub struct RevocationEngine<L>
where
    L: LedgerRepository,
{
    ledger: Arc<L>,
    notifier: Arc<dyn Notifier>,
    audit: Arc<dyn AuditSink>,
}

impl<L> RevocationEngine<L>
where
    L: LedgerRepository,
{
    pub fn new(ledger: Arc<L>, notifier: Arc<dyn Notifier>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            ledger,
            notifier,
            audit,
        }
    }

    async fn resolve(&self, request: &RevocationRequest) -> Result<LedgerAccount, LedgerError> {
        match &request.account {
            AccountRef::Id(id) => self.ledger.get_by_id(*id).await.map_err(user_lookup(id)),
            AccountRef::Email(email) => self
                .ledger
                .get_by_email(email)
                .await
                .map_err(user_lookup(email)),
            AccountRef::TransactionOwner => self
                .ledger
                .get_by_transaction(&request.transaction_id)
                .await
                .map_err(|e| match e {
                    RepositoryError::NotFound(_) => {
                        LedgerError::TransactionNotFound(request.transaction_id.clone())
                    }
                    other => LedgerError::Repository(other),
                }),
        }
    }

    pub async fn revoke(
        &self,
        request: &RevocationRequest,
    ) -> Result<RevocationOutcome, LedgerError> {
        let account = self.resolve(request).await?;

        if self
            .ledger
            .find_revocation(account.id, &request.transaction_id)
            .await?
            .is_some()
        {
            warn!(
                user_id = %account.id,
                transaction_id = %request.transaction_id,
                "Transaction already revoked"
            );
            return Ok(RevocationOutcome::Duplicate);
        }

        let original = self
            .ledger
            .find_transaction(account.id, &request.transaction_id)
            .await?;

        if let Some(original) = &original {
            if original.reverses().is_some() {
                return Err(LedgerError::InvalidRequest(format!(
                    "{} is itself a revocation",
                    original.id
                )));
            }
        } else {
            warn!(
                user_id = %account.id,
                transaction_id = %request.transaction_id,
                "Original transaction not on ledger, revoking without credit reversal"
            );
        }

        let granted = original
            .as_ref()
            .map(|tx| tx.credits_added.max(0))
            .unwrap_or(0);
        let gateway = request
            .gateway
            .or_else(|| original.as_ref().and_then(|tx| tx.kind.gateway()));
        let revoked_plan = original
            .as_ref()
            .map(|tx| tx.plan_name.clone())
            .unwrap_or_else(|| account.plan.clone());

        let committed = commit_with_retry(self.ledger.as_ref(), account, |current| {
            Ok(Some(apply_revocation(
                current,
                &request.transaction_id,
                granted,
                request.reason,
                gateway,
                Utc::now(),
            )))
        })
        .await?;

        let (account, transaction) = match committed {
            Committed::Applied {
                account,
                transaction: Some(transaction),
            } => (account, transaction),
            Committed::Duplicate => return Ok(RevocationOutcome::Duplicate),
            Committed::Applied { .. } | Committed::Unchanged => {
                return Err(LedgerError::InvalidRequest(
                    "Revocation produced no ledger entry".to_string(),
                ));
            }
        };

        info!(
            user_id = %account.id,
            transaction_id = %request.transaction_id,
            reason = %request.reason,
            credits_removed = -transaction.credits_added,
            balance = account.credits,
            "Plan revoked"
        );

        self.audit
            .record(
                AuditLevel::Warn,
                "Plan revoked",
                json!({
                    "userId": account.id,
                    "transactionId": request.transaction_id,
                    "revocationId": transaction.id,
                    "reason": request.reason,
                    "creditsRemoved": -transaction.credits_added,
                }),
            )
            .await;

        // Disputes are not emailed.
        if request.reason == RevocationReason::Refund {
            self.notifier
                .notify(
                    NotificationTemplate::RefundProcessed,
                    &account.email,
                    json!({
                        "planName": revoked_plan,
                        "creditsRemoved": -transaction.credits_added,
                        "transactionId": request.transaction_id,
                    }),
                )
                .await;
        }

        Ok(RevocationOutcome::Applied(transaction))
    }
}

pub(crate) fn apply_revocation(
    current: &LedgerAccount,
    reverses: &str,
    granted: i64,
    reason: RevocationReason,
    gateway: Option<Gateway>,
    now: DateTime<Utc>,
) -> (LedgerAccount, Option<Transaction>) {
    let mut account = current.clone();
    account.plan = STARTER_PLAN.to_string();
    account.billing_cycle = BillingCycle::Monthly;
    account.credits = current.credits.saturating_sub(granted).max(0);
    account.subscription_end = None;
    account.auto_renew = true;

    let transaction = Transaction::record(
        synthetic_id("REV", now),
        TransactionKind::PlanRevoked {
            reason,
            reverses: reverses.to_string(),
            gateway,
        },
        STARTER_PLAN,
        current.credits,
        account.credits,
        format!("Plan revoked ({})", reason),
    )
    .with_sub_description(format!("Reverses {}", reverses));

    (account, Some(transaction))
}
