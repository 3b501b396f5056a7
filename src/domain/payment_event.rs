use crate::domain::{BillingCycle, Gateway, Money, RevocationReason};
use serde::{Deserialize, Serialize};

/// A verified gateway event, normalized across Stripe and PayPal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum PaymentEvent {
    PaymentSucceeded(PaymentSucceeded),
    PaymentReversed {
        gateway: Gateway,
        transaction_id: String,
        reason: RevocationReason,
        /// Customer email from the event, used when the payment is not on
        /// the ledger.
        email: Option<String>,
    },
    /// Event type this service does not act on.
    Ignored { gateway: Gateway, event_type: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentSucceeded {
    pub gateway: Gateway,
    pub email: String,
    pub plan_name: String,
    pub billing_cycle: BillingCycle,
    pub transaction_id: String,
    pub paid: Money,
    /// Grant reported by the gateway metadata; wins over the plan's credits.
    pub credits_override: Option<i64>,
}
