use crate::application::LedgerError;
use crate::domain::{Plan, RefundPolicy};
use crate::infrastructure::{PlanRepository, RepositoryError};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Plan catalog and refund policy, read through an in-process cache.
///
/// Every write goes to the repository first and then drops the cached copy.
pub struct PlanCatalog<P>
where
    P: PlanRepository,
{
    plan_repo: Arc<P>,
    plans: RwLock<Option<Arc<Vec<Plan>>>>,
    refund_policy: RwLock<Option<RefundPolicy>>,
}

impl<P> PlanCatalog<P>
where
    P: PlanRepository,
{
    pub fn new(plan_repo: Arc<P>) -> Self {
        Self {
            plan_repo,
            plans: RwLock::new(None),
            refund_policy: RwLock::new(None),
        }
    }

    pub async fn plans(&self) -> Result<Arc<Vec<Plan>>, RepositoryError> {
        if let Some(plans) = self.plans.read().await.as_ref() {
            return Ok(Arc::clone(plans));
        }

        let mut cached = self.plans.write().await;
        if let Some(plans) = cached.as_ref() {
            return Ok(Arc::clone(plans));
        }

        let plans = Arc::new(self.plan_repo.list_plans().await?);
        *cached = Some(Arc::clone(&plans));
        Ok(plans)
    }

    /// Looks a plan up by id or (case-insensitive) name.
    pub async fn find_plan(&self, name_or_id: &str) -> Result<Option<Plan>, RepositoryError> {
        let plans = self.plans().await?;
        Ok(plans.iter().find(|p| p.matches(name_or_id)).cloned())
    }

    /// Stored policy, or the default when none was ever saved.
    pub async fn refund_policy(&self) -> Result<RefundPolicy, RepositoryError> {
        if let Some(policy) = *self.refund_policy.read().await {
            return Ok(policy);
        }

        let policy = self.plan_repo.get_refund_policy().await?.unwrap_or_default();
        *self.refund_policy.write().await = Some(policy);
        Ok(policy)
    }

    pub async fn update_refund_policy(&self, policy: RefundPolicy) -> Result<RefundPolicy, LedgerError> {
        if policy.days < 0 {
            return Err(LedgerError::InvalidRequest(
                "Refund window must not be negative".to_string(),
            ));
        }
        if !policy.usage_limit.is_finite() || policy.usage_limit < 0.0 {
            return Err(LedgerError::InvalidRequest(
                "Usage limit must be a non-negative percentage".to_string(),
            ));
        }

        self.plan_repo.save_refund_policy(&policy).await?;
        self.invalidate().await;

        info!(days = policy.days, usage_limit = policy.usage_limit, "Refund policy updated");
        Ok(policy)
    }

    /// Drops every cached value; the next read goes to the repository.
    pub async fn invalidate(&self) {
        *self.plans.write().await = None;
        *self.refund_policy.write().await = None;
    }
}
