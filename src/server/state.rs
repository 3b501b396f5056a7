use crate::application::{
    AccountService, ActivationEngine, MeteringService, PlanCatalog, RefundService,
    RevocationEngine, SweepService, WebhookService,
};
use crate::infrastructure::{
    AppConfig, AuditSink, GatewayClient, HttpGatewayClient, HttpNotifier, LogNotifier, Notifier,
    PaypalApi, PaypalWebhookVerifier, PostgresAuditLog, PostgresLedgerRepository,
    PostgresPlanRepository, StripeApi, StripeWebhookVerifier,
};
use anyhow::Context;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, warn};

pub type AccountServiceType = AccountService<PostgresLedgerRepository, PostgresPlanRepository>;
pub type MeteringServiceType = MeteringService<PostgresLedgerRepository, PostgresPlanRepository>;
pub type RefundServiceType = RefundService<PostgresLedgerRepository, PostgresPlanRepository>;
pub type WebhookServiceType = WebhookService<PostgresLedgerRepository, PostgresPlanRepository>;
pub type SweepServiceType = SweepService<PostgresLedgerRepository>;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub admin_token: Arc<str>,
    pub service_token: Arc<str>,
    pub catalog: Arc<PlanCatalog<PostgresPlanRepository>>,
    pub accounts: Arc<AccountServiceType>,
    pub metering: Arc<MeteringServiceType>,
    pub refunds: Arc<RefundServiceType>,
    pub webhooks: Arc<WebhookServiceType>,
    pub sweep: Arc<SweepServiceType>,
}

/// Build full state from config + an existing pool.
///
/// Intended for embedding into a larger service that already manages a `PgPool`.
pub async fn build_state_with_pool(
    config: AppConfig,
    pool: PgPool,
    run_migrations: bool,
) -> anyhow::Result<AppState> {
    if run_migrations {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("run migrations")?;
    }

    let notifier: Arc<dyn Notifier> = if config.notification_webhook_url.is_empty() {
        info!("No notification endpoint configured, notifications are logged only");
        Arc::new(LogNotifier)
    } else {
        Arc::new(
            HttpNotifier::new(config.notification_webhook_url.clone())
                .context("init notification client")?,
        )
    };
    let audit: Arc<dyn AuditSink> = Arc::new(PostgresAuditLog::new(pool.clone()));

    let stripe_api = if config.stripe_secret_key.is_empty() {
        warn!("Stripe secret key not set, Stripe refunds are disabled");
        None
    } else {
        Some(
            StripeApi::new(config.stripe_secret_key.clone(), config.stripe_api_base.clone())
                .context("init Stripe client")?,
        )
    };

    let paypal_api = if config.paypal_client_id.is_empty() || config.paypal_client_secret.is_empty() {
        warn!("PayPal credentials not set, PayPal refunds and webhook verification are disabled");
        None
    } else {
        Some(
            PaypalApi::new(
                config.paypal_client_id.clone(),
                config.paypal_client_secret.clone(),
                config.paypal_webhook_id.clone(),
                config.paypal_api_base.clone(),
            )
            .context("init PayPal client")?,
        )
    };

    if config.allow_unverified_webhooks {
        warn!("Unverified webhooks are allowed; never enable this in production");
    }

    let gateway: Arc<dyn GatewayClient> =
        Arc::new(HttpGatewayClient::new(stripe_api, paypal_api.clone()));
    let stripe_verifier = StripeWebhookVerifier::new(
        config.stripe_webhook_secret.clone(),
        config.webhook_tolerance_secs,
        config.allow_unverified_webhooks,
    );
    let paypal_verifier = PaypalWebhookVerifier::new(paypal_api, config.allow_unverified_webhooks);

    let ledger = Arc::new(PostgresLedgerRepository::new(pool.clone()));
    let plans = Arc::new(PostgresPlanRepository::new(pool.clone()));
    let catalog = Arc::new(PlanCatalog::new(plans));

    let activation = Arc::new(ActivationEngine::new(
        ledger.clone(),
        catalog.clone(),
        notifier.clone(),
        audit.clone(),
    ));
    let revocation = Arc::new(RevocationEngine::new(
        ledger.clone(),
        notifier.clone(),
        audit.clone(),
    ));

    let accounts = Arc::new(AccountService::new(
        ledger.clone(),
        catalog.clone(),
        audit.clone(),
        config.signup_bonus_credits,
        chrono::Duration::days(config.deletion_grace_days),
    ));
    let metering = Arc::new(MeteringService::new(
        ledger.clone(),
        catalog.clone(),
        notifier.clone(),
        config.low_credits_threshold,
    ));
    let refunds = Arc::new(RefundService::new(
        ledger.clone(),
        catalog.clone(),
        revocation.clone(),
        gateway,
        audit.clone(),
    ));
    let webhooks = Arc::new(WebhookService::new(
        activation,
        revocation,
        stripe_verifier,
        paypal_verifier,
        audit.clone(),
    ));
    let sweep = Arc::new(SweepService::new(
        ledger,
        notifier,
        audit,
        chrono::Duration::seconds(config.sweep_interval_secs as i64),
    ));

    Ok(AppState {
        pool,
        admin_token: Arc::from(config.admin_api_token.as_str()),
        service_token: Arc::from(config.service_api_token.as_str()),
        catalog,
        accounts,
        metering,
        refunds,
        webhooks,
        sweep,
    })
}

/// Build state for the standalone server.
///
/// Creates the `PgPool`, runs migrations, and wires repositories/services.
pub async fn build_state_from_env(config: AppConfig) -> anyhow::Result<AppState> {
    let pool = PgPool::connect(&config.database_url)
        .await
        .context("connect database")?;
    build_state_with_pool(config, pool, true).await
}
