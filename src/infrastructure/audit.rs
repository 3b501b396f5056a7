use crate::domain::AuditLevel;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use tracing::{error, info, warn};

/// Append-only, best-effort audit trail.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, level: AuditLevel, message: &str, metadata: serde_json::Value);
}

/// Mirrors audit entries into the tracing output only.
#[derive(Debug, Default, Clone)]
pub struct TracingAuditLog;

#[async_trait]
impl AuditSink for TracingAuditLog {
    async fn record(&self, level: AuditLevel, message: &str, metadata: serde_json::Value) {
        emit(level, message, &metadata);
    }
}

pub struct PostgresAuditLog {
    pool: PgPool,
}

impl PostgresAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PostgresAuditLog {
    async fn record(&self, level: AuditLevel, message: &str, metadata: serde_json::Value) {
        emit(level, message, &metadata);

        let result = sqlx::query(
            r#"
            INSERT INTO system_logs (level, message, metadata, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(level.to_string())
        .bind(message)
        .bind(&metadata)
        .bind(Utc::now())
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            warn!(error = %e, message = %message, "Failed to persist audit entry");
        }
    }
}

fn emit(level: AuditLevel, message: &str, metadata: &serde_json::Value) {
    match level {
        AuditLevel::Info => info!(audit = true, metadata = %metadata, "{}", message),
        AuditLevel::Warn => warn!(audit = true, metadata = %metadata, "{}", message),
        AuditLevel::Error => error!(audit = true, metadata = %metadata, "{}", message),
    }
}
