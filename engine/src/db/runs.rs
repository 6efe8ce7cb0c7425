/// Pipeline run audit records
///
/// A run is created `running` and settles exactly once. Payload updates are
/// appended to `run_payload`; reading a run folds them so the latest value per
/// key wins.
use anyhow::{Context, Result};
use sdk::types::{LaneKind, RunStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use tracing::warn;

use super::{from_json_text, now_secs, to_json_text};
use crate::secrets::scrub_secrets;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub run_type: LaneKind,
    pub status: RunStatus,
    pub payload: BTreeMap<String, Value>,
    pub error: Option<String>,
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

pub struct RunRepository {
    pool: SqlitePool,
}

impl RunRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, run_type: LaneKind) -> Result<RunRecord> {
        let now = now_secs()?;
        let id = uuid::Uuid::new_v4().to_string();

        sqlx::query("INSERT INTO runs (id, run_type, status, created_at) VALUES (?, ?, ?, ?)")
            .bind(&id)
            .bind(run_type.as_str())
            .bind(RunStatus::Running.as_str())
            .bind(now)
            .execute(&self.pool)
            .await
            .context("Failed to create run record")?;

        Ok(RunRecord {
            id,
            run_type,
            status: RunStatus::Running,
            payload: BTreeMap::new(),
            error: None,
            created_at: now,
            completed_at: None,
        })
    }

    /// Settle a running run. A run that already settled keeps its first
    /// outcome; the call returns `false` in that case.
    pub async fn update_status(
        &self,
        id: &str,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<bool> {
        let now = now_secs()?;
        let error = error.map(scrub_secrets);
        let completed_at = (status != RunStatus::Running).then_some(now);

        let result = sqlx::query(
            "UPDATE runs SET status = ?, error = COALESCE(error, ?), completed_at = COALESCE(completed_at, ?) WHERE id = ? AND status = 'running'",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(completed_at)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to update run status")?;

        if result.rows_affected() == 0 {
            warn!("Run {} already settled; ignoring {} update", id, status.as_str());
            return Ok(false);
        }
        Ok(true)
    }

    /// Append a payload entry for `key`.
    pub async fn update_payload(&self, id: &str, key: &str, value: &Value) -> Result<()> {
        let now = now_secs()?;

        sqlx::query("INSERT INTO run_payload (run_id, key, value, created_at) VALUES (?, ?, ?, ?)")
            .bind(id)
            .bind(key)
            .bind(to_json_text(value, "run payload")?)
            .bind(now)
            .execute(&self.pool)
            .await
            .context("Failed to append run payload")?;

        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<RunRecord>> {
        let row = sqlx::query(
            "SELECT id, run_type, status, error, created_at, completed_at FROM runs WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch run record")?;

        match row {
            Some(r) => {
                let mut record = run_from_row(&r)?;
                record.payload = self.payload(&record.id).await?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Most recent runs first, payloads included
    pub async fn recent(&self, limit: i64) -> Result<Vec<RunRecord>> {
        let rows = sqlx::query(
            "SELECT id, run_type, status, error, created_at, completed_at FROM runs ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch recent runs")?;

        let mut records = Vec::with_capacity(rows.len());
        for r in &rows {
            let mut record = run_from_row(r)?;
            record.payload = self.payload(&record.id).await?;
            records.push(record);
        }
        Ok(records)
    }

    async fn payload(&self, run_id: &str) -> Result<BTreeMap<String, Value>> {
        let rows = sqlx::query("SELECT key, value FROM run_payload WHERE run_id = ? ORDER BY id ASC")
            .bind(run_id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch run payload")?;

        let mut payload = BTreeMap::new();
        for r in rows {
            let value: Value = from_json_text(&r.get::<String, _>("value"), "run payload")?;
            payload.insert(r.get("key"), value);
        }
        Ok(payload)
    }
}

fn run_from_row(r: &SqliteRow) -> Result<RunRecord> {
    Ok(RunRecord {
        id: r.get("id"),
        run_type: r
            .get::<String, _>("run_type")
            .parse()
            .map_err(anyhow::Error::msg)?,
        status: r
            .get::<String, _>("status")
            .parse()
            .map_err(anyhow::Error::msg)?,
        payload: BTreeMap::new(),
        error: r.get("error"),
        created_at: r.get("created_at"),
        completed_at: r.get("completed_at"),
    })
}
