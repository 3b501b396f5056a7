//! Outreach Ledger
//!
//! Credit and subscription ledger: turns payment gateway events, admin
//! actions and scheduled sweeps into consistent changes to a user's plan,
//! credit balance and subscription window, and meters AI actions against
//! daily quotas with race-safe charges.
//!
//! ## Standalone
//!
//! Run the binary:
//! ```bash
//! outreach-ledger-server
//! ```
//!
//! ## Embedded (Axum)
//!
//! When the `server` feature is enabled, this crate can be embedded into a larger Axum app:
//! ```rust,ignore
//! use axum::Router;
//! use outreach_ledger::infrastructure::AppConfig;
//! use outreach_ledger::server::{build_state_with_pool, router, start_sweep_scheduler};
//! use sqlx::PgPool;
//!
//! let cfg = AppConfig::from_env()?;
//! let pool = PgPool::connect(&cfg.database_url).await?;
//! let state = build_state_with_pool(cfg, pool, true).await?;
//! let _jobs = start_sweep_scheduler(state.sweep.clone()).await?;
//! let app = Router::new().nest("/ledger", router(state));
//! ```

pub mod application;
pub mod domain;
pub mod infrastructure;

// Standalone + embedded HTTP server support (Axum).
// Enabled behind the `server` feature so the core library can be used without Axum.
#[cfg(feature = "server")]
pub mod server;

pub use application::*;
pub use domain::*;
pub use infrastructure::*;

#[cfg(feature = "server")]
pub use server::*;
