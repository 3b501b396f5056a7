use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Email templates the ledger dispatches through the notification sink.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationTemplate {
    PaymentSuccess,
    RefundProcessed,
    PlanExpiredNotice,
    LowCreditsWarning,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AuditLevel {
    Info,
    Warn,
    Error,
}
