use crate::application::retry::{commit_with_retry, Committed};
use crate::application::{user_lookup, LedgerError, PlanCatalog};
use crate::domain::{
    add_months, synthetic_id, AccountStatus, AuditLevel, BillingCycle, LedgerAccount,
    Transaction, TransactionKind, UsageStat,
};
use crate::infrastructure::{AuditSink, LedgerRepository, PlanRepository, RepositoryError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use validator::validate_email;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChangePlanRequest {
    pub plan_name: String,
    pub billing_cycle: BillingCycle,
    /// Set the balance to the plan's grant instead of keeping it.
    #[serde(default)]
    pub reset_credits: bool,
}

/// An account with its full history.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LedgerView {
    pub account: LedgerAccount,
    pub transactions: Vec<Transaction>,
    pub usage: Vec<UsageStat>,
}

/// Signup, self-service deletion and admin edits.
pub struct AccountService<L, P>
where
    L: LedgerRepository,
    P: PlanRepository,
{
    ledger: Arc<L>,
    catalog: Arc<PlanCatalog<P>>,
    audit: Arc<dyn AuditSink>,
    signup_bonus: i64,
    deletion_grace: Duration,
}

impl<L, P> AccountService<L, P>
where
    L: LedgerRepository,
    P: PlanRepository,
{
    pub fn new(
        ledger: Arc<L>,
        catalog: Arc<PlanCatalog<P>>,
        audit: Arc<dyn AuditSink>,
        signup_bonus: i64,
        deletion_grace: Duration,
    ) -> Self {
        Self {
            ledger,
            catalog,
            audit,
            signup_bonus,
            deletion_grace,
        }
    }

    async fn load(&self, user_id: Uuid) -> Result<LedgerAccount, LedgerError> {
        self.ledger
            .get_by_id(user_id)
            .await
            .map_err(user_lookup(user_id))
    }

    pub async fn create_account(&self, email: &str) -> Result<LedgerAccount, LedgerError> {
        let email = email.trim().to_lowercase();
        if !validate_email(email.as_str()) {
            return Err(LedgerError::InvalidRequest(format!(
                "Invalid email address: {}",
                email
            )));
        }

        match self.ledger.get_by_email(&email).await {
            Ok(_) => {
                return Err(LedgerError::InvalidRequest(format!(
                    "Account {} already exists",
                    email
                )))
            }
            Err(RepositoryError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let account = LedgerAccount::new(email, self.signup_bonus);
        self.ledger.create(&account).await.map_err(|e| match e {
            RepositoryError::InvalidData(msg) => LedgerError::InvalidRequest(msg),
            other => LedgerError::Repository(other),
        })?;

        info!(user_id = %account.id, credits = account.credits, "Ledger account created");
        Ok(account)
    }

    pub async fn get_ledger(&self, user_id: Uuid) -> Result<LedgerView, LedgerError> {
        let account = self.load(user_id).await?;
        let transactions = self.ledger.list_transactions(user_id).await?;
        let usage = self.ledger.list_usage_stats(user_id).await?;

        Ok(LedgerView {
            account,
            transactions,
            usage,
        })
    }

    pub async fn change_plan(
        &self,
        user_id: Uuid,
        request: &ChangePlanRequest,
    ) -> Result<LedgerAccount, LedgerError> {
        let plan = self
            .catalog
            .find_plan(&request.plan_name)
            .await?
            .ok_or_else(|| LedgerError::PlanNotFound(request.plan_name.clone()))?;
        let account = self.load(user_id).await?;

        let committed = commit_with_retry(self.ledger.as_ref(), account, |current| {
            let now = Utc::now();
            let mut updated = current.clone();
            updated.plan = plan.name.clone();
            updated.billing_cycle = request.billing_cycle;
            updated.subscription_start = Some(now);
            updated.subscription_end = add_months(now, request.billing_cycle.months());
            updated.status = AccountStatus::Active;
            if request.reset_credits {
                updated.credits = plan.credits_for(request.billing_cycle);
                updated.low_credits_notified = false;
            }

            let transaction = Transaction::record(
                synthetic_id("ADM", now),
                TransactionKind::AdminPlanChange,
                plan.name.clone(),
                current.credits,
                updated.credits,
                format!("Plan changed to {} ({})", plan.name, request.billing_cycle),
            );
            Ok(Some((updated, Some(transaction))))
        })
        .await?;

        let account = expect_applied(committed, user_id)?;
        info!(user_id = %user_id, plan = %account.plan, "Admin changed plan");
        self.audit
            .record(
                AuditLevel::Info,
                "Admin plan change",
                json!({
                    "userId": user_id,
                    "plan": account.plan,
                    "billingCycle": account.billing_cycle,
                    "resetCredits": request.reset_credits,
                }),
            )
            .await;

        Ok(account)
    }

    /// Adds `delta` credits (negative to remove); the balance stops at zero.
    pub async fn adjust_credits(
        &self,
        user_id: Uuid,
        delta: i64,
        note: Option<String>,
    ) -> Result<LedgerAccount, LedgerError> {
        if delta == 0 {
            return Err(LedgerError::InvalidRequest(
                "Credit adjustment must not be zero".to_string(),
            ));
        }
        let account = self.load(user_id).await?;

        let committed = commit_with_retry(self.ledger.as_ref(), account, |current| {
            let now = Utc::now();
            let mut updated = current.clone();
            updated.credits = current.credits.saturating_add(delta).max(0);

            let mut transaction = Transaction::record(
                synthetic_id("ADJ", now),
                TransactionKind::AdminCreditAdjustment,
                current.plan.clone(),
                current.credits,
                updated.credits,
                "Credit adjustment by admin",
            );
            if let Some(note) = &note {
                transaction = transaction.with_sub_description(note.clone());
            }
            Ok(Some((updated, Some(transaction))))
        })
        .await?;

        let account = expect_applied(committed, user_id)?;
        info!(user_id = %user_id, delta, credits = account.credits, "Admin adjusted credits");
        self.audit
            .record(
                AuditLevel::Info,
                "Admin credit adjustment",
                json!({ "userId": user_id, "delta": delta, "credits": account.credits, "note": note }),
            )
            .await;

        Ok(account)
    }

    pub async fn set_status(
        &self,
        user_id: Uuid,
        status: AccountStatus,
        message: Option<String>,
    ) -> Result<LedgerAccount, LedgerError> {
        let account = self.load(user_id).await?;

        let committed = commit_with_retry(self.ledger.as_ref(), account, |current| {
            let mut updated = current.clone();
            updated.status = status;
            updated.status_message = message.clone();
            Ok(Some((updated, None)))
        })
        .await?;

        let account = expect_applied(committed, user_id)?;
        info!(user_id = %user_id, status = %status, "Admin changed account status");
        self.audit
            .record(
                AuditLevel::Warn,
                "Admin status change",
                json!({ "userId": user_id, "status": status, "message": message }),
            )
            .await;

        Ok(account)
    }

    /// Immediate cascading delete.
    pub async fn delete_account(&self, user_id: Uuid) -> Result<(), LedgerError> {
        if !self.ledger.delete_cascade(user_id).await? {
            return Err(LedgerError::UserNotFound(user_id.to_string()));
        }

        info!(user_id = %user_id, "Account deleted by admin");
        self.audit
            .record(
                AuditLevel::Warn,
                "Account deleted by admin",
                json!({ "userId": user_id }),
            )
            .await;
        Ok(())
    }

    /// Marks the account for deletion after the grace period.
    pub async fn schedule_deletion(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<LedgerAccount, LedgerError> {
        let due = now + self.deletion_grace;
        self.set_deletion_date(user_id, Some(due)).await
    }

    pub async fn cancel_deletion(&self, user_id: Uuid) -> Result<LedgerAccount, LedgerError> {
        self.set_deletion_date(user_id, None).await
    }

    async fn set_deletion_date(
        &self,
        user_id: Uuid,
        date: Option<DateTime<Utc>>,
    ) -> Result<LedgerAccount, LedgerError> {
        let account = self.load(user_id).await?;

        let committed = commit_with_retry(self.ledger.as_ref(), account, |current| {
            if current.deletion_scheduled_date == date {
                return Ok(None);
            }
            let mut updated = current.clone();
            updated.deletion_scheduled_date = date;
            Ok(Some((updated, None)))
        })
        .await?;

        let account = match committed {
            Committed::Applied { account, .. } => account,
            Committed::Unchanged | Committed::Duplicate => self.load(user_id).await?,
        };

        info!(user_id = %user_id, deletion_date = ?date, "Account deletion schedule updated");
        Ok(account)
    }
}

fn expect_applied(committed: Committed, user_id: Uuid) -> Result<LedgerAccount, LedgerError> {
    match committed {
        Committed::Applied { account, .. } => Ok(account),
        Committed::Duplicate | Committed::Unchanged => Err(LedgerError::ConcurrentModification(user_id)),
    }
}
