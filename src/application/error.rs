use crate::infrastructure::{GatewayError, RepositoryError, WebhookError};
use std::fmt::Display;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("User not found: {0}")]
    UserNotFound(String),
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),
    #[error("Plan not found: {0}")]
    PlanNotFound(String),
    #[error("Insufficient credits: this action costs {cost} credits")]
    InsufficientCredits { cost: i64 },
    #[error("Daily limit of {limit} credits reached ({used} used today, {cost} requested)")]
    QuotaExceeded { limit: i64, used: i64, cost: i64 },
    #[error("Refund outside policy: {days_since} days since purchase, {usage_percent:.1}% used")]
    PolicyViolation { days_since: i64, usage_percent: f64 },
    #[error("Webhook verification failed: {0}")]
    VerificationFailed(String),
    #[error("Gateway unavailable: {0}")]
    GatewayUnavailable(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Account {0} kept changing; gave up after repeated conflicts")]
    ConcurrentModification(Uuid),
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl LedgerError {
    /// Outcomes that end a single webhook event without asking the gateway
    /// to redeliver it.
    pub fn is_terminal_for_event(&self) -> bool {
        matches!(
            self,
            LedgerError::UserNotFound(_)
                | LedgerError::TransactionNotFound(_)
                | LedgerError::PlanNotFound(_)
                | LedgerError::InvalidRequest(_)
        )
    }
}

impl From<WebhookError> for LedgerError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::VerificationFailed(msg) => LedgerError::VerificationFailed(msg),
            WebhookError::Malformed(msg) => LedgerError::InvalidRequest(msg),
            WebhookError::GatewayUnavailable(msg) => LedgerError::GatewayUnavailable(msg),
        }
    }
}

impl From<GatewayError> for LedgerError {
    fn from(err: GatewayError) -> Self {
        LedgerError::GatewayUnavailable(err.to_string())
    }
}

/// Maps a repository `NotFound` for an account lookup to `UserNotFound`.
pub(crate) fn user_lookup(key: impl Display) -> impl FnOnce(RepositoryError) -> LedgerError {
    move |err| match err {
        RepositoryError::NotFound(_) => LedgerError::UserNotFound(key.to_string()),
        other => LedgerError::Repository(other),
    }
}
