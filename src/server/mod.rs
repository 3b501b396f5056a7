//! HTTP server support (standalone + embeddable).
//!
//! - **Standalone**: `outreach-ledger-server` binary calls `run()`
//! - **Embedded**: host Axum app calls `router(state)` (and may nest it)

mod http;
mod http_auth;
mod http_errors;
mod http_parse;
mod http_types;
mod state;

pub use http::router;
pub use state::{build_state_from_env, build_state_with_pool, AppState};

use crate::application::SweepService;
use crate::infrastructure::{AppConfig, LedgerRepository};
use anyhow::Context;
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Fires every five minutes; the sweep's own debounce sets the real cadence.
const SWEEP_SCHEDULE: &str = "0 */5 * * * *";

/// Starts the background job that triggers the expiration/deletion sweep.
pub async fn start_sweep_scheduler<L>(sweep: Arc<SweepService<L>>) -> anyhow::Result<JobScheduler>
where
    L: LedgerRepository + 'static,
{
    let scheduler = JobScheduler::new().await.context("create scheduler")?;

    scheduler
        .add(
            Job::new_async(SWEEP_SCHEDULE, move |_uuid, _l| {
                let sweep = sweep.clone();
                Box::pin(async move {
                    sweep.sweep_if_due(Utc::now()).await;
                })
            })
            .context("create sweep job")?,
        )
        .await
        .context("schedule sweep job")?;

    scheduler.start().await.context("start scheduler")?;
    info!(schedule = SWEEP_SCHEDULE, "Sweep scheduler started");
    Ok(scheduler)
}

/// Standalone entrypoint for the `outreach-ledger-server` binary.
pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env().context("load config")?;
    let state = build_state_from_env(config.clone()).await?;
    let _scheduler = start_sweep_scheduler(state.sweep.clone()).await?;

    let addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port)
        .parse()
        .context("parse listen address")?;
    let listener = TcpListener::bind(addr).await.context("bind listener")?;

    info!(
        host = %config.server_host,
        port = config.server_port,
        "Server running"
    );
    info!(
        docs = %format!("http://{}:{}/docs", config.server_host, config.server_port),
        "API docs"
    );

    let app = router(state);
    axum::serve(listener, app).await.context("serve")?;
    Ok(())
}
