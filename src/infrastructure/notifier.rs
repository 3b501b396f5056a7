use crate::domain::NotificationTemplate;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, warn};

/// Fire-and-forget notification sink. Implementations never fail the
/// caller; the return value only reports whether the send was accepted.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        template: NotificationTemplate,
        recipient: &str,
        variables: serde_json::Value,
    ) -> bool;
}

/// Logs notifications instead of delivering them.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        template: NotificationTemplate,
        recipient: &str,
        variables: serde_json::Value,
    ) -> bool {
        info!(template = %template, recipient = %recipient, variables = %variables, "Notification (log only)");
        true
    }
}

/// Posts notifications as JSON to the mail service endpoint.
///
/// Delivery runs on a detached task so a slow mail service never delays
/// the ledger operation that triggered it.
#[derive(Clone)]
pub struct HttpNotifier {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpNotifier {
    pub fn new(endpoint: String) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(
        &self,
        template: NotificationTemplate,
        recipient: &str,
        variables: serde_json::Value,
    ) -> bool {
        let body = serde_json::json!({
            "templateId": template.to_string(),
            "to": recipient,
            "variables": variables,
        });
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let recipient = recipient.to_string();

        tokio::spawn(async move {
            match client.post(&endpoint).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(template = %template, recipient = %recipient, "Notification sent");
                }
                Ok(resp) => {
                    warn!(template = %template, recipient = %recipient, status = %resp.status(), "Notification rejected");
                }
                Err(e) => {
                    warn!(template = %template, recipient = %recipient, error = %e, "Notification failed");
                }
            }
        });

        true
    }
}
