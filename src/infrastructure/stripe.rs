use crate::domain::{
    BillingCycle, Gateway, Money, PaymentEvent, PaymentSucceeded, RevocationReason,
};
use crate::infrastructure::gateway::{
    build_http_client, json_or_rejected, refund_idempotency_key, send_with_retry, GatewayError,
    WebhookError,
};
use hmac::{Hmac, Mac};
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use sha2::Sha256;
use std::str::FromStr;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Verifies the `Stripe-Signature` header of inbound webhooks.
pub struct StripeWebhookVerifier {
    secret: String,
    tolerance_secs: i64,
    allow_unverified: bool,
}

impl StripeWebhookVerifier {
    pub fn new(secret: String, tolerance_secs: i64, allow_unverified: bool) -> Self {
        Self {
            secret,
            tolerance_secs,
            allow_unverified,
        }
    }

    /// Checks the signature over `"{t}.{payload}"` and returns the parsed event.
    pub fn verify(
        &self,
        payload: &str,
        signature_header: Option<&str>,
        now_unix: i64,
    ) -> Result<Value, WebhookError> {
        if self.secret.is_empty() {
            if !self.allow_unverified {
                return Err(WebhookError::VerificationFailed(
                    "Stripe webhook secret is not configured".to_string(),
                ));
            }
            warn!("Accepting unverified Stripe webhook (no secret configured)");
            return parse_json(payload);
        }

        let header = signature_header.ok_or_else(|| {
            WebhookError::VerificationFailed("Missing Stripe-Signature header".to_string())
        })?;
        let (timestamp, signatures) = parse_signature_header(header).ok_or_else(|| {
            WebhookError::VerificationFailed("Malformed Stripe-Signature header".to_string())
        })?;

        let skew = now_unix
            .checked_sub(timestamp)
            .map(i64::unsigned_abs)
            .ok_or_else(|| {
                WebhookError::VerificationFailed("Timestamp out of range".to_string())
            })?;
        if skew > self.tolerance_secs.unsigned_abs() {
            return Err(WebhookError::VerificationFailed(format!(
                "Timestamp outside tolerance ({}s)",
                skew
            )));
        }

        let signed_payload = format!("{}.{}", timestamp, payload);
        let matched = signatures.iter().any(|candidate| {
            let Ok(expected) = hex::decode(candidate) else {
                return false;
            };
            let Ok(mut mac) = HmacSha256::new_from_slice(self.secret.as_bytes()) else {
                return false;
            };
            mac.update(signed_payload.as_bytes());
            mac.verify_slice(&expected).is_ok()
        });

        if !matched {
            return Err(WebhookError::VerificationFailed(
                "Signature mismatch".to_string(),
            ));
        }

        parse_json(payload)
    }
}

fn parse_json(payload: &str) -> Result<Value, WebhookError> {
    serde_json::from_str(payload).map_err(|e| WebhookError::Malformed(e.to_string()))
}

/// Splits `t=...,v1=...,v1=...` into the timestamp and all `v1` signatures.
fn parse_signature_header(header: &str) -> Option<(i64, Vec<String>)> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        if let Some((key, value)) = part.trim().split_once('=') {
            match key {
                "t" => timestamp = value.parse().ok(),
                "v1" => signatures.push(value.to_string()),
                _ => {}
            }
        }
    }

    match timestamp {
        Some(t) if !signatures.is_empty() => Some((t, signatures)),
        _ => None,
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Maps a verified Stripe event onto the ledger's payment events.
pub fn parse_stripe_event(event: &Value) -> Result<PaymentEvent, WebhookError> {
    let event_type = str_field(event, "type")
        .ok_or_else(|| WebhookError::Malformed("Missing event type".to_string()))?;
    let object = event
        .get("data")
        .and_then(|d| d.get("object"))
        .ok_or_else(|| WebhookError::Malformed("Missing data.object".to_string()))?;

    match event_type {
        "checkout.session.completed" => parse_checkout_session(object),
        "charge.refunded" => {
            // Partial refunds leave the grant in place.
            if !object.get("refunded").and_then(Value::as_bool).unwrap_or(false) {
                return Ok(PaymentEvent::Ignored {
                    gateway: Gateway::Stripe,
                    event_type: "charge.refunded (partial)".to_string(),
                });
            }
            let transaction_id = str_field(object, "payment_intent")
                .or_else(|| str_field(object, "id"))
                .ok_or_else(|| WebhookError::Malformed("Charge without id".to_string()))?;
            Ok(PaymentEvent::PaymentReversed {
                gateway: Gateway::Stripe,
                transaction_id: transaction_id.to_string(),
                reason: RevocationReason::Refund,
                email: charge_email(object),
            })
        }
        "charge.dispute.created" => {
            let transaction_id = str_field(object, "payment_intent")
                .or_else(|| str_field(object, "charge"))
                .ok_or_else(|| WebhookError::Malformed("Dispute without charge".to_string()))?;
            let email = object
                .get("evidence")
                .and_then(|e| str_field(e, "customer_email_address"))
                .map(str::to_string);
            Ok(PaymentEvent::PaymentReversed {
                gateway: Gateway::Stripe,
                transaction_id: transaction_id.to_string(),
                reason: RevocationReason::Dispute,
                email,
            })
        }
        other => Ok(PaymentEvent::Ignored {
            gateway: Gateway::Stripe,
            event_type: other.to_string(),
        }),
    }
}

fn charge_email(charge: &Value) -> Option<String> {
    charge
        .get("billing_details")
        .and_then(|d| str_field(d, "email"))
        .or_else(|| str_field(charge, "receipt_email"))
        .map(str::to_string)
}

fn parse_checkout_session(session: &Value) -> Result<PaymentEvent, WebhookError> {
    if str_field(session, "payment_status") != Some("paid") {
        return Ok(PaymentEvent::Ignored {
            gateway: Gateway::Stripe,
            event_type: "checkout.session.completed (unpaid)".to_string(),
        });
    }

    let metadata = session.get("metadata").cloned().unwrap_or(Value::Null);

    let email = session
        .get("customer_details")
        .and_then(|d| str_field(d, "email"))
        .or_else(|| str_field(session, "customer_email"))
        .or_else(|| str_field(&metadata, "email"))
        .ok_or_else(|| WebhookError::Malformed("Checkout session without email".to_string()))?;

    let plan_name = str_field(&metadata, "plan")
        .or_else(|| str_field(&metadata, "planName"))
        .ok_or_else(|| WebhookError::Malformed("Checkout session without plan".to_string()))?;

    let billing_cycle = match str_field(&metadata, "billingCycle")
        .or_else(|| str_field(&metadata, "billing_cycle"))
    {
        Some(cycle) => BillingCycle::from_str(cycle)
            .map_err(|_| WebhookError::Malformed(format!("Unknown billing cycle: {}", cycle)))?,
        None => BillingCycle::Monthly,
    };

    let credits_override = match str_field(&metadata, "credits") {
        Some(raw) => Some(
            raw.parse::<i64>()
                .map_err(|_| WebhookError::Malformed(format!("Invalid credits: {}", raw)))?,
        ),
        None => None,
    };

    let transaction_id = str_field(session, "payment_intent")
        .or_else(|| str_field(session, "id"))
        .ok_or_else(|| WebhookError::Malformed("Checkout session without id".to_string()))?;

    let amount = session
        .get("amount_total")
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let currency = str_field(session, "currency").unwrap_or("usd");

    Ok(PaymentEvent::PaymentSucceeded(PaymentSucceeded {
        gateway: Gateway::Stripe,
        email: email.to_string(),
        plan_name: plan_name.to_string(),
        billing_cycle,
        transaction_id: transaction_id.to_string(),
        paid: Money::new(amount, currency),
        credits_override,
    }))
}

/// Minimal Stripe REST client for refunds.
pub struct StripeApi {
    client: Client,
    base_url: String,
    secret_key: String,
}

impl StripeApi {
    pub fn new(secret_key: String, base_url: String) -> Result<Self, GatewayError> {
        if secret_key.is_empty() {
            return Err(GatewayError::InvalidConfig(
                "Stripe secret key is empty".to_string(),
            ));
        }

        Ok(Self {
            client: build_http_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret_key,
        })
    }

    /// Checkout session ids are resolved to their payment intent first.
    async fn resolve_payment_intent(&self, transaction_id: &str) -> Result<String, GatewayError> {
        if !transaction_id.starts_with("cs_") {
            return Ok(transaction_id.to_string());
        }

        let url = format!("{}/v1/checkout/sessions/{}", self.base_url, transaction_id);
        let resp = send_with_retry(|| self.client.get(&url).bearer_auth(&self.secret_key)).await?;
        let session = json_or_rejected(resp).await?;

        str_field(&session, "payment_intent")
            .map(str::to_string)
            .ok_or_else(|| {
                GatewayError::InvalidResponse(format!(
                    "Session {} has no payment intent",
                    transaction_id
                ))
            })
    }

    fn refund_request(&self, payment_intent: &str) -> RequestBuilder {
        self.client
            .post(format!("{}/v1/refunds", self.base_url))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", refund_idempotency_key(payment_intent))
            .form(&[
                ("payment_intent", payment_intent),
                ("reason", "requested_by_customer"),
            ])
    }

    pub async fn refund(&self, transaction_id: &str) -> Result<String, GatewayError> {
        let payment_intent = self.resolve_payment_intent(transaction_id).await?;

        let resp = send_with_retry(|| self.refund_request(&payment_intent)).await?;
        let refund = json_or_rejected(resp).await?;

        str_field(&refund, "id")
            .map(str::to_string)
            .ok_or_else(|| GatewayError::InvalidResponse("Refund without id".to_string()))
    }
}
