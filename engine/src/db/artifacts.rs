/// Memo artifact persistence
///
/// Every status change is a conditional write keyed on the expected current
/// status, so two schedulers racing for the same artifact cannot both win the
/// claim, and nothing ever leaves a terminal state.
use anyhow::{Context, Result};
use sdk::errors::EngineError;
use sdk::types::{ArtifactContent, ArtifactStatus, Recommendation};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use super::research::ResearchDocument;
use super::{from_json_text, now_secs, to_json_text};
use crate::artifacts::{check_transition, AnalysisMap};
use crate::scoring::{ConvictionScore, ScoreBreakdown};
use crate::secrets::scrub_secrets;

/// Memo artifact record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    pub research_id: String,
    pub idea_id: String,
    pub ticker: String,
    pub status: ArtifactStatus,
    pub progress: u8,
    pub content: Option<ArtifactContent>,
    pub analyses: AnalysisMap,
    pub recommendation: Option<Recommendation>,
    pub conviction_score: Option<u8>,
    pub score_breakdown: Option<ScoreBreakdown>,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
}

const SELECT_COLUMNS: &str = "SELECT id, research_id, idea_id, ticker, status, progress, content, analyses, recommendation, conviction_score, score_breakdown, error_message, created_at, updated_at, completed_at FROM artifacts";

pub struct ArtifactRepository {
    pool: SqlitePool,
}

impl ArtifactRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Approval event: queue a memo for a research document.
    pub async fn create_pending(&self, research: &ResearchDocument) -> Result<Artifact> {
        let now = now_secs()?;
        let id = uuid::Uuid::new_v4().to_string();

        sqlx::query(
            "INSERT INTO artifacts (id, research_id, idea_id, ticker, status, progress, created_at, updated_at) VALUES (?, ?, ?, ?, ?, 0, ?, ?)",
        )
        .bind(&id)
        .bind(&research.id)
        .bind(&research.idea_id)
        .bind(&research.ticker)
        .bind(ArtifactStatus::Pending.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to create pending artifact")?;

        debug!("Artifact {} queued for {}", id, research.ticker);

        Ok(Artifact {
            id,
            research_id: research.id.clone(),
            idea_id: research.idea_id.clone(),
            ticker: research.ticker.clone(),
            status: ArtifactStatus::Pending,
            progress: 0,
            content: None,
            analyses: AnalysisMap::new(),
            recommendation: None,
            conviction_score: None,
            score_breakdown: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        })
    }

    /// Oldest pending artifacts first
    pub async fn get_pending(&self, limit: i64) -> Result<Vec<Artifact>> {
        let rows = sqlx::query(&format!(
            "{} WHERE status = 'pending' ORDER BY created_at ASC, id ASC LIMIT ?",
            SELECT_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch pending artifacts")?;

        rows.iter().map(artifact_from_row).collect()
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<Artifact>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch artifact")?;

        row.map(|r| artifact_from_row(&r)).transpose()
    }

    /// Atomically move a pending artifact to generating.
    ///
    /// Returns `false` when the artifact was not pending, including when a
    /// concurrent claim won.
    pub async fn claim(&self, id: &str) -> Result<bool> {
        let now = now_secs()?;

        let result = sqlx::query(
            "UPDATE artifacts SET status = 'generating', updated_at = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to claim artifact")?;

        Ok(result.rows_affected() == 1)
    }

    /// Validated status change.
    ///
    /// Fails with [`EngineError::InvalidTransition`] for edges the lifecycle
    /// does not allow, or when the status changed underneath the caller.
    pub async fn update_status(&self, id: &str, status: ArtifactStatus) -> Result<()> {
        let current = self.current_status(id).await?;
        check_transition(current, status)?;

        let now = now_secs()?;
        let completed_at = status.is_terminal().then_some(now);

        let result = sqlx::query(
            "UPDATE artifacts SET status = ?, updated_at = ?, completed_at = COALESCE(?, completed_at) WHERE id = ? AND status = ?",
        )
        .bind(status.as_str())
        .bind(now)
        .bind(completed_at)
        .bind(id)
        .bind(current.as_str())
        .execute(&self.pool)
        .await
        .context("Failed to update artifact status")?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(id, status).await);
        }
        Ok(())
    }

    /// Raise progress to `pct`. Ignored unless the artifact is generating,
    /// and never lowers the stored value. Returns whether a row was updated.
    pub async fn update_progress(&self, id: &str, pct: u8) -> Result<bool> {
        let now = now_secs()?;

        let result = sqlx::query(
            "UPDATE artifacts SET progress = MAX(progress, ?), updated_at = ? WHERE id = ? AND status = 'generating'",
        )
        .bind(pct.min(100) as i64)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to update artifact progress")?;

        Ok(result.rows_affected() == 1)
    }

    /// Finish a generating artifact: content, analyses, recommendation and
    /// score land together in one write.
    pub async fn complete(
        &self,
        id: &str,
        content: &ArtifactContent,
        analyses: &AnalysisMap,
        recommendation: Recommendation,
        score: &ConvictionScore,
    ) -> Result<()> {
        let now = now_secs()?;

        let result = sqlx::query(
            r#"UPDATE artifacts
               SET status = 'complete', progress = 100, content = ?, analyses = ?,
                   recommendation = ?, conviction_score = ?, score_breakdown = ?,
                   error_message = NULL, updated_at = ?, completed_at = ?
               WHERE id = ? AND status = 'generating'"#,
        )
        .bind(to_json_text(content, "artifact content")?)
        .bind(to_json_text(analyses, "supporting analyses")?)
        .bind(recommendation.as_str())
        .bind(score.score as i64)
        .bind(to_json_text(&score.breakdown, "score breakdown")?)
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to complete artifact")?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(id, ArtifactStatus::Complete).await);
        }
        Ok(())
    }

    /// Fail a generating artifact with scrubbed error text.
    pub async fn mark_failed(&self, id: &str, error: &str) -> Result<()> {
        let now = now_secs()?;
        let message = scrub_secrets(error);

        let result = sqlx::query(
            "UPDATE artifacts SET status = 'failed', error_message = ?, updated_at = ?, completed_at = ? WHERE id = ? AND status = 'generating'",
        )
        .bind(&message)
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to mark artifact as failed")?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(id, ArtifactStatus::Failed).await);
        }
        Ok(())
    }

    /// Completed artifacts finished at or after `since` (seconds)
    pub async fn list_completed_since(&self, since: i64) -> Result<Vec<Artifact>> {
        let rows = sqlx::query(&format!(
            "{} WHERE status = 'complete' AND completed_at >= ? ORDER BY completed_at ASC, id ASC",
            SELECT_COLUMNS
        ))
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list completed artifacts")?;

        rows.iter().map(artifact_from_row).collect()
    }

    async fn current_status(&self, id: &str) -> Result<ArtifactStatus> {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM artifacts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to read artifact status")?;

        match status {
            Some(s) => s.parse().map_err(anyhow::Error::msg),
            None => Err(EngineError::ArtifactNotFound(id.to_string()).into()),
        }
    }

    async fn transition_error(&self, id: &str, to: ArtifactStatus) -> anyhow::Error {
        match self.current_status(id).await {
            Ok(from) => EngineError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            }
            .into(),
            Err(e) => e,
        }
    }
}

fn artifact_from_row(r: &SqliteRow) -> Result<Artifact> {
    let status: ArtifactStatus = r
        .get::<String, _>("status")
        .parse()
        .map_err(anyhow::Error::msg)?;

    let content = r
        .get::<Option<String>, _>("content")
        .map(|text| from_json_text(&text, "artifact content"))
        .transpose()?;
    let analyses = r
        .get::<Option<String>, _>("analyses")
        .map(|text| from_json_text(&text, "supporting analyses"))
        .transpose()?
        .unwrap_or_default();
    let recommendation = r
        .get::<Option<String>, _>("recommendation")
        .map(|s| s.parse::<Recommendation>().map_err(anyhow::Error::msg))
        .transpose()?;
    let score_breakdown = r
        .get::<Option<String>, _>("score_breakdown")
        .map(|text| from_json_text(&text, "score breakdown"))
        .transpose()?;

    Ok(Artifact {
        id: r.get("id"),
        research_id: r.get("research_id"),
        idea_id: r.get("idea_id"),
        ticker: r.get("ticker"),
        status,
        progress: r.get::<i64, _>("progress").clamp(0, 100) as u8,
        content,
        analyses,
        recommendation,
        conviction_score: r
            .get::<Option<i64>, _>("conviction_score")
            .map(|s| s.clamp(0, 100) as u8),
        score_breakdown,
        error_message: r.get("error_message"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
        completed_at: r.get("completed_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::research::Idea;
    use crate::db::Database;
    use serde_json::json;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, Database, ResearchDocument) {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("arc.db")).await.unwrap();
        let research = db.research();
        let idea = research
            .insert_idea(&Idea::new("ACME", "Acme Corp", "thesis", "manual"))
            .await
            .unwrap();
        let doc = research
            .insert_research(&ResearchDocument {
                id: uuid::Uuid::new_v4().to_string(),
                idea_id: idea.id,
                ticker: "ACME".to_string(),
                company: "Acme Corp".to_string(),
                content: ArtifactContent::WellFormed(json!({"summary": "ok"})),
                sections: AnalysisMap::new(),
                created_at: 0,
            })
            .await
            .unwrap();
        (temp_dir, db, doc)
    }

    fn sample_score() -> ConvictionScore {
        ConvictionScore {
            score: 68,
            breakdown: ScoreBreakdown {
                conviction: 8,
                skew: 6,
                asymmetry: 4,
                risk: 0,
                failure_scenarios: 0,
            },
        }
    }

    #[tokio::test]
    async fn test_claim_only_once() {
        let (_dir, db, doc) = setup().await;
        let repo = db.artifacts();

        let artifact = repo.create_pending(&doc).await.unwrap();
        assert!(repo.claim(&artifact.id).await.unwrap());
        assert!(!repo.claim(&artifact.id).await.unwrap());

        let stored = repo.get_by_id(&artifact.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ArtifactStatus::Generating);
    }

    #[tokio::test]
    async fn test_pending_cannot_complete_directly() {
        let (_dir, db, doc) = setup().await;
        let repo = db.artifacts();
        let artifact = repo.create_pending(&doc).await.unwrap();

        let content = ArtifactContent::WellFormed(json!({}));
        let score = sample_score();
        let err = repo
            .complete(&artifact.id, &content, &AnalysisMap::new(), score.recommendation(), &score)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::InvalidTransition { .. })
        ));

        assert!(repo.mark_failed(&artifact.id, "boom").await.is_err());
        assert!(repo
            .update_status(&artifact.id, ArtifactStatus::Failed)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_gated() {
        let (_dir, db, doc) = setup().await;
        let repo = db.artifacts();
        let artifact = repo.create_pending(&doc).await.unwrap();

        assert!(!repo.update_progress(&artifact.id, 10).await.unwrap());

        repo.claim(&artifact.id).await.unwrap();
        assert!(repo.update_progress(&artifact.id, 40).await.unwrap());
        repo.update_progress(&artifact.id, 20).await.unwrap();

        let stored = repo.get_by_id(&artifact.id).await.unwrap().unwrap();
        assert_eq!(stored.progress, 40);
    }

    #[tokio::test]
    async fn test_complete_writes_everything_once() {
        let (_dir, db, doc) = setup().await;
        let repo = db.artifacts();
        let artifact = repo.create_pending(&doc).await.unwrap();
        repo.claim(&artifact.id).await.unwrap();

        let content = ArtifactContent::WellFormed(json!({"thesis": "buy"}));
        let score = sample_score();
        repo.complete(&artifact.id, &content, &AnalysisMap::new(), score.recommendation(), &score)
            .await
            .unwrap();

        let stored = repo.get_by_id(&artifact.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ArtifactStatus::Complete);
        assert_eq!(stored.progress, 100);
        assert_eq!(stored.content, Some(content));
        assert_eq!(stored.conviction_score, Some(68));
        assert_eq!(stored.recommendation, Some(Recommendation::Buy));
        assert_eq!(stored.score_breakdown, Some(score.breakdown));
        assert!(stored.completed_at.is_some());

        // Terminal
        assert!(repo.mark_failed(&artifact.id, "late failure").await.is_err());
        assert!(!repo.claim(&artifact.id).await.unwrap());

        let since = stored.completed_at.unwrap();
        assert_eq!(repo.list_completed_since(since).await.unwrap().len(), 1);
        assert!(repo.list_completed_since(since + 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_text_is_scrubbed() {
        let (_dir, db, doc) = setup().await;
        let repo = db.artifacts();
        let artifact = repo.create_pending(&doc).await.unwrap();
        repo.claim(&artifact.id).await.unwrap();

        repo.mark_failed(&artifact.id, "401 for key sk-abcdefghijklmnopqrstuvwxyz123456")
            .await
            .unwrap();

        let stored = repo.get_by_id(&artifact.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ArtifactStatus::Failed);
        let message = stored.error_message.unwrap();
        assert!(!message.contains("sk-abcdefghijklmnopqrstuvwxyz123456"));
    }

    #[tokio::test]
    async fn test_get_pending_oldest_first() {
        let (_dir, db, doc) = setup().await;
        let repo = db.artifacts();

        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(repo.create_pending(&doc).await.unwrap().id);
        }
        repo.claim(&ids[0]).await.unwrap();

        let pending = repo.get_pending(10).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|a| a.status == ArtifactStatus::Pending));
        assert_eq!(repo.get_pending(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_artifact() {
        let (_dir, db, _doc) = setup().await;
        let err = db
            .artifacts()
            .update_status("missing", ArtifactStatus::Generating)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::ArtifactNotFound(_))
        ));
    }
}
