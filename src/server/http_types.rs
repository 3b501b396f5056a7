use crate::application::{ChargeRequest, RefundOutcome, RefundRequest, RevocationOutcome, WebhookOutcome};
use crate::domain::{LedgerAccount, RefundPolicy, UsageSnapshot};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Serialize, ToSchema)]
pub(super) struct HealthResponse {
    pub(super) status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) error: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub(super) struct CreateAccountRequest {
    #[schema(example = "user@example.com")]
    pub(super) email: String,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub(super) struct ChargeBody {
    pub(super) user_id: Uuid,
    #[schema(example = "reply_generation")]
    pub(super) action_type: String,
    #[schema(example = 1)]
    pub(super) cost: i64,
}

impl From<ChargeBody> for ChargeRequest {
    fn from(body: ChargeBody) -> Self {
        Self {
            user_id: body.user_id,
            action_type: body.action_type,
            cost: body.cost,
        }
    }
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub(super) struct UsageResponse {
    pub(super) credits: i64,
    pub(super) daily_usage: i64,
    pub(super) daily_usage_points: i64,
}

impl From<UsageSnapshot> for UsageResponse {
    fn from(snapshot: UsageSnapshot) -> Self {
        Self {
            credits: snapshot.credits,
            daily_usage: snapshot.daily_usage,
            daily_usage_points: snapshot.daily_usage_points,
        }
    }
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub(super) struct RefundBody {
    pub(super) transaction_id: String,
    pub(super) user_id: Uuid,
    #[serde(default)]
    pub(super) force: bool,
}

impl From<RefundBody> for RefundRequest {
    fn from(body: RefundBody) -> Self {
        Self {
            user_id: body.user_id,
            transaction_id: body.transaction_id,
            force: body.force,
        }
    }
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub(super) struct RefundResponse {
    pub(super) success: bool,
    pub(super) already_refunded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) revocation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) gateway_refund_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) days_since: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) usage_percent: Option<f64>,
}

impl From<RefundOutcome> for RefundResponse {
    fn from(outcome: RefundOutcome) -> Self {
        let (already_refunded, revocation_id) = match outcome.revocation {
            RevocationOutcome::Applied(tx) => (false, Some(tx.id)),
            RevocationOutcome::Duplicate => (true, None),
        };

        Self {
            success: true,
            already_refunded,
            revocation_id,
            gateway_refund_id: outcome.gateway_refund_id,
            days_since: outcome.assessment.map(|a| a.days_since),
            usage_percent: outcome.assessment.map(|a| a.usage_percent),
        }
    }
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub(super) struct ChangePlanBody {
    #[schema(example = "Pro")]
    pub(super) plan_name: String,
    #[schema(example = "monthly")]
    pub(super) billing_cycle: String,
    #[serde(default)]
    pub(super) reset_credits: bool,
}

#[derive(Deserialize, ToSchema)]
pub(super) struct AdjustCreditsBody {
    pub(super) delta: i64,
    pub(super) note: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub(super) struct SetStatusBody {
    #[schema(example = "Suspended")]
    pub(super) status: String,
    pub(super) message: Option<String>,
}

#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub(super) struct RefundPolicyBody {
    #[schema(example = 7)]
    pub(super) days: i64,
    #[schema(example = 20.0)]
    pub(super) usage_limit: f64,
}

impl From<RefundPolicy> for RefundPolicyBody {
    fn from(policy: RefundPolicy) -> Self {
        Self {
            days: policy.days,
            usage_limit: policy.usage_limit,
        }
    }
}

impl From<RefundPolicyBody> for RefundPolicy {
    fn from(body: RefundPolicyBody) -> Self {
        Self {
            days: body.days,
            usage_limit: body.usage_limit,
        }
    }
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub(super) struct AccountResponse {
    pub(super) id: Uuid,
    pub(super) email: String,
    pub(super) plan: String,
    pub(super) billing_cycle: String,
    pub(super) credits: i64,
    pub(super) status: String,
    pub(super) status_message: Option<String>,
    pub(super) subscription_end: Option<chrono::DateTime<chrono::Utc>>,
    pub(super) deletion_scheduled_date: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<LedgerAccount> for AccountResponse {
    fn from(account: LedgerAccount) -> Self {
        Self {
            id: account.id,
            email: account.email,
            plan: account.plan,
            billing_cycle: account.billing_cycle.to_string(),
            credits: account.credits,
            status: account.status.to_string(),
            status_message: account.status_message,
            subscription_end: account.subscription_end,
            deletion_scheduled_date: account.deletion_scheduled_date,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub(super) struct WebhookAck {
    pub(super) received: bool,
    pub(super) outcome: String,
}

impl From<&WebhookOutcome> for WebhookAck {
    fn from(outcome: &WebhookOutcome) -> Self {
        let outcome = match outcome {
            WebhookOutcome::Activated(_) => "activated",
            WebhookOutcome::Revoked(_) => "revoked",
            WebhookOutcome::Duplicate => "duplicate",
            WebhookOutcome::Ignored(_) => "ignored",
            WebhookOutcome::Dropped(_) => "dropped",
        };

        Self {
            received: true,
            outcome: outcome.to_string(),
        }
    }
}
