//! Weekly bundle lane
//!
//! Collects memos completed in the last seven days, keeps the best `top_n`
//! by conviction score and asks the model for one digest over them. Progress
//! is reported on the run record under the `progress` key.

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use sdk::errors::EngineError;
use sdk::types::{LaneKind, RunStatus};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::LaneDeps;
use crate::db::{Artifact, WeeklyBundle};
use crate::prompts::{ids, PromptContext};

const WINDOW_DAYS: i64 = 7;

pub struct WeeklyLane {
    deps: LaneDeps,
    top_n: usize,
}

impl WeeklyLane {
    pub fn new(deps: LaneDeps, top_n: usize) -> Self {
        Self { deps, top_n }
    }

    /// Build this week's bundle. Returns `None` when no memo completed in
    /// the window.
    pub async fn run(&self) -> Result<Option<WeeklyBundle>> {
        let run = self.deps.runs.create(LaneKind::Weekly).await?;
        info!("Weekly run {} started", run.id);

        let timeout = self.deps.lane_timeout;
        let outcome = match tokio::time::timeout(timeout, self.execute(&run.id)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(EngineError::LaneTimeout {
                lane: "weekly".to_string(),
                timeout_secs: timeout.as_secs(),
            }
            .into()),
        };

        match outcome {
            Ok(bundle) => {
                self.deps
                    .runs
                    .update_payload(
                        &run.id,
                        "bundle_id",
                        &json!(bundle.as_ref().map(|b| b.id.clone())),
                    )
                    .await?;
                self.deps
                    .runs
                    .update_status(&run.id, RunStatus::Completed, None)
                    .await?;
                Ok(bundle)
            }
            Err(e) => {
                let message = format!("{:#}", e);
                warn!("Weekly run {} failed: {}", run.id, message);
                self.deps
                    .runs
                    .update_status(&run.id, RunStatus::Failed, Some(&message))
                    .await?;
                Err(e)
            }
        }
    }

    async fn execute(&self, run_id: &str) -> Result<Option<WeeklyBundle>> {
        let window_start = Utc::now() - ChronoDuration::days(WINDOW_DAYS);
        self.progress(run_id, 0).await?;

        let memos = self
            .deps
            .artifacts
            .list_completed_since(window_start.timestamp())
            .await?;
        self.progress(run_id, 25).await?;

        if memos.is_empty() {
            info!("No memos completed in the last {} days", WINDOW_DAYS);
            self.progress(run_id, 100).await?;
            return Ok(None);
        }

        let selected = rank_memos(memos, self.top_n);
        self.deps
            .runs
            .update_payload(
                run_id,
                "selected",
                &json!(selected.iter().map(|a| a.id.clone()).collect::<Vec<_>>()),
            )
            .await?;
        self.progress(run_id, 50).await?;

        let macro_snapshot = self.deps.market.macro_snapshot().await?;
        let ctx = PromptContext::default()
            .with_macro(macro_snapshot)
            .with_supporting_analyses(memos_as_context(&selected));
        let content = self
            .deps
            .executor
            .synthesize(ids::WEEKLY_BUNDLE, &ctx)
            .await?;
        self.progress(run_id, 75).await?;

        let bundle = self
            .deps
            .bundles
            .insert(&WeeklyBundle {
                id: uuid::Uuid::new_v4().to_string(),
                week_start: window_start.date_naive().to_string(),
                artifact_ids: selected.iter().map(|a| a.id.clone()).collect(),
                content,
                created_at: 0,
            })
            .await?;
        self.progress(run_id, 100).await?;

        info!(
            "Weekly bundle {} built from {} memos",
            bundle.id,
            bundle.artifact_ids.len()
        );
        Ok(Some(bundle))
    }

    async fn progress(&self, run_id: &str, pct: u8) -> Result<()> {
        self.deps
            .runs
            .update_payload(run_id, "progress", &json!(pct))
            .await
    }
}

/// Best `top_n` memos: highest score first, ties to the most recently
/// completed, then by id.
pub fn rank_memos(mut memos: Vec<Artifact>, top_n: usize) -> Vec<Artifact> {
    memos.sort_by(|a, b| {
        b.conviction_score
            .cmp(&a.conviction_score)
            .then_with(|| b.completed_at.cmp(&a.completed_at))
            .then_with(|| a.id.cmp(&b.id))
    });
    memos.truncate(top_n);
    memos
}

fn memos_as_context(memos: &[Artifact]) -> String {
    let entries: Vec<Value> = memos
        .iter()
        .map(|memo| {
            let summary = memo.content.as_ref().map(|content| {
                content
                    .structured()
                    .and_then(|v| v.get("executive_summary"))
                    .cloned()
                    .unwrap_or_else(|| Value::String(content.as_prompt_text()))
            });
            json!({
                "ticker": memo.ticker,
                "conviction_score": memo.conviction_score,
                "recommendation": memo.recommendation.map(|r| r.as_str()),
                "summary": summary,
            })
        })
        .collect();
    serde_json::to_string_pretty(&entries).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::AnalysisMap;
    use sdk::types::ArtifactStatus;

    fn memo(id: &str, score: Option<u8>, completed_at: i64) -> Artifact {
        Artifact {
            id: id.to_string(),
            research_id: "r".to_string(),
            idea_id: "i".to_string(),
            ticker: id.to_uppercase(),
            status: ArtifactStatus::Complete,
            progress: 100,
            content: None,
            analyses: AnalysisMap::new(),
            recommendation: None,
            conviction_score: score,
            score_breakdown: None,
            error_message: None,
            created_at: 0,
            updated_at: completed_at,
            completed_at: Some(completed_at),
        }
    }

    #[test]
    fn test_rank_by_score_then_recency() {
        let ranked = rank_memos(
            vec![
                memo("a", Some(60), 100),
                memo("b", Some(80), 100),
                memo("c", Some(60), 200),
                memo("d", None, 300),
            ],
            3,
        );
        let ids: Vec<&str> = ranked.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_rank_top_n_zero() {
        assert!(rank_memos(vec![memo("a", Some(50), 1)], 0).is_empty());
    }
}
