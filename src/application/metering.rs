use crate::application::{user_lookup, LedgerError, PlanCatalog};
use crate::domain::{
    exceeds_daily_limit, resolve_daily_limit, LedgerAccount, NotificationTemplate, UsageSnapshot,
};
use crate::infrastructure::{LedgerRepository, Notifier, PlanRepository};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChargeRequest {
    pub user_id: Uuid,
    pub action_type: String,
    pub cost: i64,
}

/// Metered consumption gate.
///
/// The read-time checks only produce friendly errors; the repository's
/// conditional update is the authority on whether the charge lands.
pub struct MeteringService<L, P>
where
    L: LedgerRepository,
    P: PlanRepository,
{
    ledger: Arc<L>,
    catalog: Arc<PlanCatalog<P>>,
    notifier: Arc<dyn Notifier>,
    low_credits_threshold: i64,
}

impl<L, P> MeteringService<L, P>
where
    L: LedgerRepository,
    P: PlanRepository,
{
    pub fn new(
        ledger: Arc<L>,
        catalog: Arc<PlanCatalog<P>>,
        notifier: Arc<dyn Notifier>,
        low_credits_threshold: i64,
    ) -> Self {
        Self {
            ledger,
            catalog,
            notifier,
            low_credits_threshold,
        }
    }

    pub async fn charge(&self, request: &ChargeRequest) -> Result<UsageSnapshot, LedgerError> {
        self.charge_at(request, Utc::now()).await
    }

    pub async fn charge_at(
        &self,
        request: &ChargeRequest,
        now: DateTime<Utc>,
    ) -> Result<UsageSnapshot, LedgerError> {
        if request.cost < 0 {
            return Err(LedgerError::InvalidRequest(format!(
                "Cost must not be negative: {}",
                request.cost
            )));
        }
        if request.action_type.trim().is_empty() {
            return Err(LedgerError::InvalidRequest(
                "Action type is required".to_string(),
            ));
        }

        let account = self
            .ledger
            .get_by_id(request.user_id)
            .await
            .map_err(user_lookup(request.user_id))?;
        let today = now.date_naive();

        if !account.is_admin() {
            self.check_quota(&account, request.cost, today).await?;

            if account.credits < request.cost {
                return Err(LedgerError::InsufficientCredits { cost: request.cost });
            }
        }

        let snapshot = self
            .ledger
            .charge(account.id, &request.action_type, request.cost, today)
            .await?
            .ok_or_else(|| {
                warn!(
                    user_id = %account.id,
                    cost = request.cost,
                    "Charge lost the race for the remaining balance"
                );
                LedgerError::InsufficientCredits { cost: request.cost }
            })?;

        debug!(
            user_id = %account.id,
            action_type = %request.action_type,
            cost = request.cost,
            credits = snapshot.credits,
            "Charged"
        );

        if !account.is_admin() {
            self.maybe_warn_low_credits(&account, &snapshot).await?;
        }

        Ok(snapshot)
    }

    async fn check_quota(
        &self,
        account: &LedgerAccount,
        cost: i64,
        today: chrono::NaiveDate,
    ) -> Result<(), LedgerError> {
        let (_, points_today) = account.usage_on(today);
        let plan = self.catalog.find_plan(&account.plan).await?;
        let limit = resolve_daily_limit(account, plan.as_ref());

        if exceeds_daily_limit(limit, points_today, cost) {
            return Err(LedgerError::QuotaExceeded {
                limit,
                used: points_today,
                cost,
            });
        }

        Ok(())
    }

    async fn maybe_warn_low_credits(
        &self,
        account: &LedgerAccount,
        snapshot: &UsageSnapshot,
    ) -> Result<(), LedgerError> {
        if account.low_credits_notified || snapshot.credits >= self.low_credits_threshold {
            return Ok(());
        }

        if self.ledger.mark_low_credits_notified(account.id).await? {
            info!(user_id = %account.id, credits = snapshot.credits, "Low credit warning sent");
            self.notifier
                .notify(
                    NotificationTemplate::LowCreditsWarning,
                    &account.email,
                    json!({
                        "credits": snapshot.credits,
                        "planName": account.plan,
                    }),
                )
                .await;
        }

        Ok(())
    }
}
