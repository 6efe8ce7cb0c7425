/// Weekly bundle persistence
use anyhow::{Context, Result};
use sdk::types::ArtifactContent;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

use super::{from_json_text, now_secs, to_json_text};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyBundle {
    pub id: String,
    /// ISO date of the first day covered
    pub week_start: String,
    /// Member memos in rank order
    pub artifact_ids: Vec<String>,
    pub content: ArtifactContent,
    pub created_at: i64,
}

pub struct BundleRepository {
    pool: SqlitePool,
}

impl BundleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, bundle: &WeeklyBundle) -> Result<WeeklyBundle> {
        let now = now_secs()?;

        sqlx::query(
            "INSERT INTO weekly_bundles (id, week_start, artifact_ids, content, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&bundle.id)
        .bind(&bundle.week_start)
        .bind(to_json_text(&bundle.artifact_ids, "bundle members")?)
        .bind(to_json_text(&bundle.content, "bundle content")?)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to insert weekly bundle")?;

        Ok(WeeklyBundle {
            created_at: now,
            ..bundle.clone()
        })
    }

    pub async fn latest(&self) -> Result<Option<WeeklyBundle>> {
        let row = sqlx::query(
            "SELECT id, week_start, artifact_ids, content, created_at FROM weekly_bundles ORDER BY created_at DESC, rowid DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch latest weekly bundle")?;

        row.map(|r| {
            Ok(WeeklyBundle {
                id: r.get("id"),
                week_start: r.get("week_start"),
                artifact_ids: from_json_text(&r.get::<String, _>("artifact_ids"), "bundle members")?,
                content: from_json_text(&r.get::<String, _>("content"), "bundle content")?,
                created_at: r.get("created_at"),
            })
        })
        .transpose()
    }
}
