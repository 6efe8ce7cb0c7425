/// Prompt call log
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;

use super::now_secs;
use crate::secrets::scrub_secrets;
use crate::telemetry::{CallRecord, CallTelemetry};

pub struct CallRepository {
    pool: SqlitePool,
}

impl CallRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CallTelemetry for CallRepository {
    async fn log_call(&self, record: &CallRecord) -> Result<()> {
        let now = now_secs()?;

        sqlx::query(
            "INSERT INTO prompt_calls (id, name, success, latency_ms, confidence, error, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(record.success)
        .bind(record.latency_ms as i64)
        .bind(record.confidence)
        .bind(record.error.as_deref().map(scrub_secrets))
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to log prompt call")?;

        Ok(())
    }
}
