use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Gateway {
    Stripe,
    Paypal,
}

impl Gateway {
    pub fn payment_type(self) -> &'static str {
        match self {
            Gateway::Stripe => "stripe_payment",
            Gateway::Paypal => "paypal_payment",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RevocationReason {
    Refund,
    Dispute,
}

/// Money as an integer count of the currency's minor unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Money {
    pub amount_minor: i64,
    pub currency: String,
}

impl Money {
    pub fn new(amount_minor: i64, currency: impl Into<String>) -> Self {
        Self {
            amount_minor,
            currency: currency.into().to_uppercase(),
        }
    }

    pub fn zero() -> Self {
        Self::new(0, "USD")
    }
}

/// The closed set of ledger events. Each kind carries only its own fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransactionKind {
    Payment { gateway: Gateway, paid: Money },
    PlanRevoked {
        reason: RevocationReason,
        reverses: String,
        gateway: Option<Gateway>,
    },
    AdminPlanChange,
    AdminCreditAdjustment,
    /// Written by legacy renewal billing; no current operation produces it.
    MonthlyRenewal { paid: Money },
    PlanExpired,
}

impl TransactionKind {
    /// Wire/storage name of the kind.
    pub fn type_name(&self) -> &'static str {
        match self {
            TransactionKind::Payment { gateway, .. } => gateway.payment_type(),
            TransactionKind::PlanRevoked { .. } => "plan_revoked",
            TransactionKind::AdminPlanChange => "admin_plan_change",
            TransactionKind::AdminCreditAdjustment => "admin_credit_adjustment",
            TransactionKind::MonthlyRenewal { .. } => "monthly_renewal",
            TransactionKind::PlanExpired => "plan_expired",
        }
    }

    pub fn gateway(&self) -> Option<Gateway> {
        match self {
            TransactionKind::Payment { gateway, .. } => Some(*gateway),
            TransactionKind::PlanRevoked { gateway, .. } => *gateway,
            _ => None,
        }
    }

    pub fn money(&self) -> Money {
        match self {
            TransactionKind::Payment { paid, .. } | TransactionKind::MonthlyRenewal { paid } => {
                paid.clone()
            }
            _ => Money::zero(),
        }
    }
}

/// Immutable ledger entry. Construct through [`Transaction::record`] so that
/// `final_balance == previous_balance + credits_added` always holds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub id: String,
    pub date: DateTime<Utc>,
    pub kind: TransactionKind,
    pub description: String,
    pub sub_description: Option<String>,
    pub credits_added: i64,
    pub previous_balance: i64,
    pub final_balance: i64,
    pub plan_name: String,
}

impl Transaction {
    pub fn record(
        id: impl Into<String>,
        kind: TransactionKind,
        plan_name: impl Into<String>,
        previous_balance: i64,
        final_balance: i64,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            date: Utc::now(),
            kind,
            description: description.into(),
            sub_description: None,
            credits_added: final_balance - previous_balance,
            previous_balance,
            final_balance,
            plan_name: plan_name.into(),
        }
    }

    pub fn with_sub_description(mut self, sub: impl Into<String>) -> Self {
        self.sub_description = Some(sub.into());
        self
    }

    pub fn is_balanced(&self) -> bool {
        self.previous_balance + self.credits_added == self.final_balance
    }

    /// Id of the payment this entry reverses, for revocations.
    pub fn reverses(&self) -> Option<&str> {
        match &self.kind {
            TransactionKind::PlanRevoked { reverses, .. } => Some(reverses.as_str()),
            _ => None,
        }
    }
}

/// Synthetic id for a non-gateway event, e.g. `REV-1767225600123-9f1c2a7b`.
///
/// The random suffix keeps two events in the same millisecond apart.
pub fn synthetic_id(prefix: &str, at: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", prefix, at.timestamp_millis(), &suffix[..8])
}

/// Human-readable receipt number for a gateway id. Long ids and checkout
/// session ids are shortened to `INV-` plus their last 8 characters.
pub fn receipt_id(transaction_id: &str) -> String {
    if transaction_id.len() > 20 || transaction_id.starts_with("cs_") {
        let tail: String = transaction_id
            .chars()
            .rev()
            .take(8)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("INV-{}", tail.to_uppercase())
    } else {
        transaction_id.to_string()
    }
}

/// Parses a decimal amount like `"12.5"` into minor units (`1250`).
pub fn parse_minor_units(value: &str) -> Option<i64> {
    let value = value.trim();
    let (negative, digits) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value),
    };

    let (whole, fraction) = match digits.split_once('.') {
        Some((w, f)) => (w, f),
        None => (digits, ""),
    };

    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if fraction.len() > 2 || !fraction.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut cents: i64 = if fraction.is_empty() { 0 } else { fraction.parse().ok()? };
    if fraction.len() == 1 {
        cents *= 10;
    }

    let total = whole.checked_mul(100)?.checked_add(cents)?;
    Some(if negative { -total } else { total })
}
