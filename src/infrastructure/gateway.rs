use crate::domain::{Gateway, Money};
use crate::infrastructure::{PaypalApi, StripeApi};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Gateway request failed: {0}")]
    RequestFailed(String),
    #[error("Gateway rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("Rate limited by gateway")]
    RateLimited,
    #[error("Invalid gateway response: {0}")]
    InvalidResponse(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Gateway {0} is not configured")]
    NotConfigured(Gateway),
}

/// Boundary errors for inbound gateway webhooks.
#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("Webhook verification failed: {0}")]
    VerificationFailed(String),
    #[error("Malformed webhook payload: {0}")]
    Malformed(String),
    #[error("Gateway unavailable: {0}")]
    GatewayUnavailable(String),
}

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 500;

/// Retried refund requests carry the same key so the gateway applies them once.
pub(crate) fn refund_idempotency_key(transaction_id: &str) -> String {
    format!("refund-{}", transaction_id)
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 500 | 502 | 503 | 504)
}

pub(crate) fn build_http_client() -> Result<Client, GatewayError> {
    Client::builder()
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| GatewayError::InvalidConfig(format!("Failed to create HTTP client: {}", e)))
}

/// Sends a request, retrying transport errors and 5xx responses with backoff.
pub(crate) async fn send_with_retry<F>(
    mut request_builder: F,
) -> Result<reqwest::Response, GatewayError>
where
    F: FnMut() -> reqwest::RequestBuilder,
{
    let mut last_error: Option<String> = None;

    for attempt in 0..MAX_RETRIES {
        match request_builder().send().await {
            Ok(resp) => {
                let status = resp.status().as_u16();

                if status == 429 {
                    return Err(GatewayError::RateLimited);
                }

                if is_retryable_status(status) && attempt < MAX_RETRIES - 1 {
                    let backoff = INITIAL_BACKOFF_MS * 2_u64.pow(attempt);
                    sleep(Duration::from_millis(backoff)).await;
                    continue;
                }

                return Ok(resp);
            }
            Err(e) => {
                last_error = Some(e.to_string());
                if attempt < MAX_RETRIES - 1 {
                    let backoff = INITIAL_BACKOFF_MS * 2_u64.pow(attempt);
                    sleep(Duration::from_millis(backoff)).await;
                }
            }
        }
    }

    Err(GatewayError::RequestFailed(
        last_error.unwrap_or_else(|| "Max retries exceeded".to_string()),
    ))
}

/// Reads a JSON body, turning non-2xx statuses into `Rejected`.
pub(crate) async fn json_or_rejected(
    resp: reqwest::Response,
) -> Result<serde_json::Value, GatewayError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(GatewayError::Rejected {
            status: status.as_u16(),
            body,
        });
    }

    resp.json()
        .await
        .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
}

/// Outbound refunds at the payment provider.
#[async_trait]
pub trait GatewayClient: Send + Sync {
    /// Refunds a captured payment in full; returns the gateway refund id.
    async fn refund_payment(
        &self,
        gateway: Gateway,
        transaction_id: &str,
        amount: &Money,
    ) -> Result<String, GatewayError>;
}

pub struct HttpGatewayClient {
    stripe: Option<StripeApi>,
    paypal: Option<PaypalApi>,
}

impl HttpGatewayClient {
    pub fn new(stripe: Option<StripeApi>, paypal: Option<PaypalApi>) -> Self {
        Self { stripe, paypal }
    }
}

#[async_trait]
impl GatewayClient for HttpGatewayClient {
    async fn refund_payment(
        &self,
        gateway: Gateway,
        transaction_id: &str,
        amount: &Money,
    ) -> Result<String, GatewayError> {
        let result = match gateway {
            Gateway::Stripe => {
                let api = self
                    .stripe
                    .as_ref()
                    .ok_or(GatewayError::NotConfigured(Gateway::Stripe))?;
                api.refund(transaction_id).await
            }
            Gateway::Paypal => {
                let api = self
                    .paypal
                    .as_ref()
                    .ok_or(GatewayError::NotConfigured(Gateway::Paypal))?;
                api.refund_capture(transaction_id, amount).await
            }
        };

        match &result {
            Ok(refund_id) => info!(
                gateway = %gateway,
                transaction_id = %transaction_id,
                refund_id = %refund_id,
                "Gateway refund issued"
            ),
            Err(e) => warn!(
                gateway = %gateway,
                transaction_id = %transaction_id,
                error = %e,
                "Gateway refund failed"
            ),
        }

        result
    }
}
