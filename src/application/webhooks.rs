use crate::application::{
    AccountRef, ActivationEngine, ActivationOutcome, LedgerError, RevocationEngine,
    RevocationOutcome, RevocationRequest,
};
use crate::domain::{AuditLevel, Gateway, PaymentEvent, Transaction};
use crate::infrastructure::{
    parse_paypal_event, parse_stripe_event, AuditSink, LedgerRepository, PaypalTransmission,
    PaypalWebhookVerifier, PlanRepository, StripeWebhookVerifier, WebhookError,
};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    Activated(Transaction),
    Revoked(Transaction),
    /// Replay of an event that was already applied.
    Duplicate,
    /// Event type this service does not act on.
    Ignored(String),
    /// The event could not apply (unknown user, plan or transaction).
    Dropped(String),
}

/// Verifies gateway deliveries and routes them to activation or revocation.
pub struct WebhookService<L, P>
where
    L: LedgerRepository,
    P: PlanRepository,
{
    activation: Arc<ActivationEngine<L, P>>,
    revocation: Arc<RevocationEngine<L>>,
    stripe: StripeWebhookVerifier,
    paypal: PaypalWebhookVerifier,
    audit: Arc<dyn AuditSink>,
}

impl<L, P> WebhookService<L, P>
where
    L: LedgerRepository,
    P: PlanRepository,
{
    pub fn new(
        activation: Arc<ActivationEngine<L, P>>,
        revocation: Arc<RevocationEngine<L>>,
        stripe: StripeWebhookVerifier,
        paypal: PaypalWebhookVerifier,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            activation,
            revocation,
            stripe,
            paypal,
            audit,
        }
    }

    pub async fn handle_stripe(
        &self,
        payload: &str,
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, LedgerError> {
        let verified = self
            .stripe
            .verify(payload, signature, Utc::now().timestamp())
            .and_then(|event| parse_stripe_event(&event));

        match verified {
            Ok(event) => self.dispatch(event).await,
            Err(e) => Err(self.reject(Gateway::Stripe, e).await),
        }
    }

    pub async fn handle_paypal(
        &self,
        payload: &str,
        transmission: &PaypalTransmission,
    ) -> Result<WebhookOutcome, LedgerError> {
        let verified = match self.paypal.verify(payload, transmission).await {
            Ok(event) => parse_paypal_event(&event),
            Err(e) => Err(e),
        };

        match verified {
            Ok(event) => self.dispatch(event).await,
            Err(e) => Err(self.reject(Gateway::Paypal, e).await),
        }
    }

    async fn reject(&self, gateway: Gateway, err: WebhookError) -> LedgerError {
        warn!(gateway = %gateway, error = %err, "Webhook rejected");
        self.audit
            .record(
                AuditLevel::Warn,
                "Webhook rejected",
                json!({ "gateway": gateway, "error": err.to_string() }),
            )
            .await;
        err.into()
    }

    /// Applies a verified event. Ledger-internal failures are dropped so the
    /// gateway stops redelivering; storage failures propagate.
    pub async fn dispatch(&self, event: PaymentEvent) -> Result<WebhookOutcome, LedgerError> {
        let result = match event {
            PaymentEvent::PaymentSucceeded(payment) => {
                match self.activation.activate(&payment).await {
                    Ok(ActivationOutcome::Applied(tx)) => Ok(WebhookOutcome::Activated(tx)),
                    Ok(ActivationOutcome::Duplicate) => Ok(WebhookOutcome::Duplicate),
                    Err(e) => Err(e),
                }
            }
            PaymentEvent::PaymentReversed {
                gateway,
                transaction_id,
                reason,
                email,
            } => {
                let mut request = RevocationRequest {
                    account: AccountRef::TransactionOwner,
                    transaction_id,
                    gateway: Some(gateway),
                    reason,
                };
                let mut result = self.revocation.revoke(&request).await;
                // A payment missing from the ledger still downgrades the payer.
                let unknown = matches!(result, Err(LedgerError::TransactionNotFound(_)));
                if let (true, Some(email)) = (unknown, email) {
                    info!(
                        transaction_id = %request.transaction_id,
                        "Reversal for unknown payment, resolving account by email"
                    );
                    request.account = AccountRef::Email(email);
                    result = self.revocation.revoke(&request).await;
                }
                match result {
                    Ok(RevocationOutcome::Applied(tx)) => Ok(WebhookOutcome::Revoked(tx)),
                    Ok(RevocationOutcome::Duplicate) => Ok(WebhookOutcome::Duplicate),
                    Err(e) => Err(e),
                }
            }
            PaymentEvent::Ignored {
                gateway,
                event_type,
            } => {
                info!(gateway = %gateway, event_type = %event_type, "Ignoring webhook event");
                Ok(WebhookOutcome::Ignored(event_type))
            }
        };

        match result {
            Err(e) if e.is_terminal_for_event() => {
                warn!(error = %e, "Dropping webhook event");
                Ok(WebhookOutcome::Dropped(e.to_string()))
            }
            other => other,
        }
    }
}
