use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub server_host: String,
    pub server_port: u16,

    // Bearer tokens for the admin console and internal callers
    pub admin_api_token: String,
    pub service_api_token: String,

    // Stripe
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    pub stripe_api_base: String,

    // PayPal
    pub paypal_client_id: String,
    pub paypal_client_secret: String,
    pub paypal_webhook_id: String,
    pub paypal_api_base: String,

    /// Empty means notifications are only logged.
    pub notification_webhook_url: String,

    // Ledger policy
    pub signup_bonus_credits: i64,
    pub low_credits_threshold: i64,
    pub sweep_interval_secs: u64,
    pub deletion_grace_days: i64,
    pub webhook_tolerance_secs: i64,
    /// Development only: accept webhooks when no verification secret is configured.
    pub allow_unverified_webhooks: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("LEDGER")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .set_default("server_host", "0.0.0.0")?
            .set_default("server_port", 8080)?
            .set_default("admin_api_token", "")?
            .set_default("service_api_token", "")?
            .set_default("stripe_secret_key", "")?
            .set_default("stripe_webhook_secret", "")?
            .set_default("stripe_api_base", "https://api.stripe.com")?
            .set_default("paypal_client_id", "")?
            .set_default("paypal_client_secret", "")?
            .set_default("paypal_webhook_id", "")?
            .set_default("paypal_api_base", "https://api-m.paypal.com")?
            .set_default("notification_webhook_url", "")?
            .set_default("signup_bonus_credits", 50)?
            .set_default("low_credits_threshold", 20)?
            .set_default("sweep_interval_secs", 3600)?
            .set_default("deletion_grace_days", 14)?
            .set_default("webhook_tolerance_secs", 300)?
            .set_default("allow_unverified_webhooks", false)?
            .build()?;

        config.try_deserialize()
    }
}
