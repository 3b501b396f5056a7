use crate::domain::{
    parse_minor_units, BillingCycle, Gateway, Money, PaymentEvent, PaymentSucceeded,
    RevocationReason,
};
use crate::infrastructure::gateway::{
    build_http_client, json_or_rejected, refund_idempotency_key, send_with_retry, GatewayError,
    WebhookError,
};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Transmission headers PayPal attaches to every webhook delivery.
#[derive(Debug, Clone, Default)]
pub struct PaypalTransmission {
    pub transmission_id: String,
    pub transmission_time: String,
    pub transmission_sig: String,
    pub cert_url: String,
    pub auth_algo: String,
}

impl PaypalTransmission {
    pub fn is_complete(&self) -> bool {
        !(self.transmission_id.is_empty()
            || self.transmission_time.is_empty()
            || self.transmission_sig.is_empty()
            || self.cert_url.is_empty()
            || self.auth_algo.is_empty())
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// PayPal REST client: OAuth, webhook verification and capture refunds.
#[derive(Clone)]
pub struct PaypalApi {
    client: Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    webhook_id: String,
    token: Arc<RwLock<Option<CachedToken>>>,
}

impl PaypalApi {
    pub fn new(
        client_id: String,
        client_secret: String,
        webhook_id: String,
        base_url: String,
    ) -> Result<Self, GatewayError> {
        if client_id.is_empty() || client_secret.is_empty() {
            return Err(GatewayError::InvalidConfig(
                "PayPal client credentials are empty".to_string(),
            ));
        }

        Ok(Self {
            client: build_http_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id,
            client_secret,
            webhook_id,
            token: Arc::new(RwLock::new(None)),
        })
    }

    async fn access_token(&self) -> Result<String, GatewayError> {
        if let Some(cached) = self.token.read().await.as_ref() {
            if cached.expires_at > Instant::now() {
                return Ok(cached.value.clone());
            }
        }

        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            #[serde(default)]
            expires_in: u64,
        }

        let url = format!("{}/v1/oauth2/token", self.base_url);
        let resp = send_with_retry(|| {
            self.client
                .post(&url)
                .basic_auth(&self.client_id, Some(&self.client_secret))
                .form(&[("grant_type", "client_credentials")])
        })
        .await?;
        let body = json_or_rejected(resp).await?;
        let token: TokenResponse = serde_json::from_value(body)
            .map_err(|e| GatewayError::InvalidResponse(format!("OAuth token: {}", e)))?;

        // Refresh a minute early.
        let ttl = token.expires_in.saturating_sub(60);
        *self.token.write().await = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(ttl),
        });

        Ok(token.access_token)
    }

    /// Asks PayPal to verify a delivery against the configured webhook id.
    pub async fn verify_webhook(
        &self,
        transmission: &PaypalTransmission,
        event: &Value,
    ) -> Result<(), WebhookError> {
        if self.webhook_id.is_empty() {
            return Err(WebhookError::VerificationFailed(
                "PayPal webhook id is not configured".to_string(),
            ));
        }
        if !transmission.is_complete() {
            return Err(WebhookError::VerificationFailed(
                "Missing PayPal transmission headers".to_string(),
            ));
        }

        let token = self
            .access_token()
            .await
            .map_err(|e| WebhookError::GatewayUnavailable(e.to_string()))?;

        let url = format!("{}/v1/notifications/verify-webhook-signature", self.base_url);
        let body = json!({
            "auth_algo": transmission.auth_algo,
            "cert_url": transmission.cert_url,
            "transmission_id": transmission.transmission_id,
            "transmission_sig": transmission.transmission_sig,
            "transmission_time": transmission.transmission_time,
            "webhook_id": self.webhook_id,
            "webhook_event": event,
        });

        let resp = send_with_retry(|| self.client.post(&url).bearer_auth(&token).json(&body))
            .await
            .map_err(|e| WebhookError::GatewayUnavailable(e.to_string()))?;
        let result = json_or_rejected(resp)
            .await
            .map_err(|e| WebhookError::GatewayUnavailable(e.to_string()))?;

        match result.get("verification_status").and_then(Value::as_str) {
            Some("SUCCESS") => Ok(()),
            status => Err(WebhookError::VerificationFailed(format!(
                "PayPal verification status: {}",
                status.unwrap_or("missing")
            ))),
        }
    }

    fn refund_request(&self, token: &str, capture_id: &str, body: &Value) -> RequestBuilder {
        self.client
            .post(format!(
                "{}/v2/payments/captures/{}/refund",
                self.base_url, capture_id
            ))
            .bearer_auth(token)
            .header("PayPal-Request-Id", refund_idempotency_key(capture_id))
            .json(body)
    }

    /// Refunds a capture. A zero amount refunds the full capture.
    pub async fn refund_capture(
        &self,
        capture_id: &str,
        amount: &Money,
    ) -> Result<String, GatewayError> {
        let token = self.access_token().await?;

        let body = if amount.amount_minor > 0 {
            json!({
                "amount": {
                    "value": format_minor_units(amount.amount_minor),
                    "currency_code": amount.currency,
                }
            })
        } else {
            json!({})
        };

        let resp = send_with_retry(|| self.refund_request(&token, capture_id, &body)).await?;
        let refund = json_or_rejected(resp).await?;

        refund
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| GatewayError::InvalidResponse("Refund without id".to_string()))
    }
}

/// Verifies PayPal deliveries, or passes them through in development.
pub struct PaypalWebhookVerifier {
    api: Option<PaypalApi>,
    allow_unverified: bool,
}

impl PaypalWebhookVerifier {
    pub fn new(api: Option<PaypalApi>, allow_unverified: bool) -> Self {
        Self {
            api,
            allow_unverified,
        }
    }

    pub async fn verify(
        &self,
        payload: &str,
        transmission: &PaypalTransmission,
    ) -> Result<Value, WebhookError> {
        let event: Value =
            serde_json::from_str(payload).map_err(|e| WebhookError::Malformed(e.to_string()))?;

        match &self.api {
            Some(api) => {
                api.verify_webhook(transmission, &event).await?;
                Ok(event)
            }
            None if self.allow_unverified => {
                warn!("Accepting unverified PayPal webhook (no credentials configured)");
                Ok(event)
            }
            None => Err(WebhookError::VerificationFailed(
                "PayPal credentials are not configured".to_string(),
            )),
        }
    }
}

fn format_minor_units(amount_minor: i64) -> String {
    let sign = if amount_minor < 0 { "-" } else { "" };
    let abs = amount_minor.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Order metadata the checkout page stores in the capture's `custom_id`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CaptureMetadata {
    email: String,
    #[serde(alias = "planName")]
    plan: String,
    #[serde(default, alias = "billing_cycle")]
    billing_cycle: Option<String>,
    #[serde(default)]
    credits: Option<Value>,
}

/// Maps a verified PayPal event onto the ledger's payment events.
pub fn parse_paypal_event(event: &Value) -> Result<PaymentEvent, WebhookError> {
    let event_type = str_field(event, "event_type")
        .ok_or_else(|| WebhookError::Malformed("Missing event_type".to_string()))?;
    let resource = event
        .get("resource")
        .ok_or_else(|| WebhookError::Malformed("Missing resource".to_string()))?;

    match event_type {
        "PAYMENT.CAPTURE.COMPLETED" => parse_capture(resource),
        "PAYMENT.CAPTURE.REFUNDED" => {
            let capture_id = captured_from_links(resource).ok_or_else(|| {
                WebhookError::Malformed("Refund without capture link".to_string())
            })?;
            let email = resource
                .get("payer")
                .and_then(|p| str_field(p, "email_address"))
                .map(str::to_string);
            Ok(PaymentEvent::PaymentReversed {
                gateway: Gateway::Paypal,
                transaction_id: capture_id,
                reason: RevocationReason::Refund,
                email,
            })
        }
        "CUSTOMER.DISPUTE.CREATED" => {
            let disputed = resource
                .get("disputed_transactions")
                .and_then(Value::as_array)
                .and_then(|txs| txs.first());
            let transaction_id = disputed
                .and_then(|tx| str_field(tx, "seller_transaction_id"))
                .ok_or_else(|| {
                    WebhookError::Malformed("Dispute without seller transaction".to_string())
                })?;
            let email = disputed
                .and_then(|tx| tx.get("buyer"))
                .and_then(|buyer| str_field(buyer, "email"))
                .map(str::to_string);
            Ok(PaymentEvent::PaymentReversed {
                gateway: Gateway::Paypal,
                transaction_id: transaction_id.to_string(),
                reason: RevocationReason::Dispute,
                email,
            })
        }
        other => Ok(PaymentEvent::Ignored {
            gateway: Gateway::Paypal,
            event_type: other.to_string(),
        }),
    }
}

/// The refunded capture is the last path segment of the `up` link.
fn captured_from_links(refund: &Value) -> Option<String> {
    refund
        .get("links")?
        .as_array()?
        .iter()
        .find(|link| str_field(link, "rel") == Some("up"))
        .and_then(|link| str_field(link, "href"))
        .and_then(|href| href.trim_end_matches('/').rsplit('/').next())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

fn parse_capture(capture: &Value) -> Result<PaymentEvent, WebhookError> {
    let capture_id = str_field(capture, "id")
        .ok_or_else(|| WebhookError::Malformed("Capture without id".to_string()))?;

    let custom_id = str_field(capture, "custom_id")
        .ok_or_else(|| WebhookError::Malformed("Capture without custom_id".to_string()))?;
    let metadata: CaptureMetadata = serde_json::from_str(custom_id)
        .map_err(|e| WebhookError::Malformed(format!("Invalid custom_id: {}", e)))?;

    let billing_cycle = match metadata.billing_cycle.as_deref() {
        Some(cycle) => BillingCycle::from_str(cycle)
            .map_err(|_| WebhookError::Malformed(format!("Unknown billing cycle: {}", cycle)))?,
        None => BillingCycle::Monthly,
    };

    let credits_override = match metadata.credits {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => Some(
            s.parse::<i64>()
                .map_err(|_| WebhookError::Malformed(format!("Invalid credits: {}", s)))?,
        ),
        Some(other) => {
            return Err(WebhookError::Malformed(format!("Invalid credits: {}", other)));
        }
    };

    let amount = capture.get("amount");
    let paid_minor = amount
        .and_then(|a| str_field(a, "value"))
        .and_then(parse_minor_units)
        .unwrap_or(0);
    let currency = amount
        .and_then(|a| str_field(a, "currency_code"))
        .unwrap_or("USD");

    debug!(capture_id = %capture_id, plan = %metadata.plan, "Parsed PayPal capture");

    Ok(PaymentEvent::PaymentSucceeded(PaymentSucceeded {
        gateway: Gateway::Paypal,
        email: metadata.email,
        plan_name: metadata.plan,
        billing_cycle,
        transaction_id: capture_id.to_string(),
        paid: Money::new(paid_minor, currency),
        credits_override,
    }))
}
