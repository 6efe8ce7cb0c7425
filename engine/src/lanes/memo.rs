//! Memo synthesis lane
//!
//! ```text
//! claim ─► upstream ─► market data ─► supporting battery ─► synthesis ─► score ─► complete
//!   5         10           20             20 → 80              90         95        100
//! ```
//!
//! The supporting battery runs concurrently; each finished analysis moves
//! progress by an equal share of the 20-80 span.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::join_all;
use sdk::errors::EngineError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::{analyses_as_context, failure_message, ArtifactLane, LaneDeps, LaneOutcome};
use crate::artifacts::{apportion, structured_results, AnalysisMap, ProgressReporter};
use crate::db::Artifact;
use crate::prompts::{ids, PromptContext};
use crate::scoring::{self, ScoreInputs};

/// Supporting analyses run for every memo, in this order
pub const SUPPORTING_BATTERY: [&str; 7] = [
    ids::VARIANT_PERCEPTION,
    ids::BULL_BEAR,
    ids::PRE_MORTEM,
    ids::RISK_ASSESSMENT,
    ids::CATALYSTS,
    ids::POSITION_SIZING,
    ids::EXIT_STRATEGY,
];

const CLAIMED: u8 = 5;
const UPSTREAM_LOADED: u8 = 10;
const DATA_LOADED: u8 = 20;
const BATTERY_DONE: u8 = 80;
const SYNTHESIZED: u8 = 90;
const SCORED: u8 = 95;

pub struct MemoLane {
    deps: LaneDeps,
    battery: Vec<String>,
}

impl MemoLane {
    pub fn new(deps: LaneDeps) -> Self {
        Self {
            deps,
            battery: SUPPORTING_BATTERY.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Replace the supporting battery
    pub fn with_battery<I, S>(mut self, battery: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.battery = battery.into_iter().map(Into::into).collect();
        self
    }

    async fn generate(&self, artifact: &Artifact, progress: &ProgressReporter) -> Result<u8> {
        let (doc, idea) = self
            .deps
            .research
            .fetch_upstream(&artifact.research_id)
            .await?
            .ok_or_else(|| EngineError::UpstreamNotFound(artifact.research_id.clone()))?;
        progress.advance(UPSTREAM_LOADED).await;

        let (quant, macro_snapshot) = tokio::try_join!(
            self.deps.market.quant(&artifact.ticker),
            self.deps.market.macro_snapshot(),
        )
        .context("Market data unavailable")?;
        let price = quant.price;
        progress.advance(DATA_LOADED).await;

        let ctx = PromptContext::for_company(&artifact.ticker, &idea.company)
            .with_quant(quant)
            .with_macro(macro_snapshot)
            .with_prior_research(doc.content.as_prompt_text());

        let analyses = self.run_battery(&ctx, progress).await;
        let failed: Vec<&str> = analyses
            .values()
            .filter(|a| !a.success)
            .map(|a| a.name.as_str())
            .collect();
        if !failed.is_empty() {
            warn!(
                "Artifact {}: {} supporting analyses failed: {}",
                artifact.id,
                failed.len(),
                failed.join(", ")
            );
        }

        let synthesis_ctx = ctx.with_supporting_analyses(analyses_as_context(&analyses));
        let content = self
            .deps
            .executor
            .synthesize(ids::INVESTMENT_MEMO, &synthesis_ctx)
            .await?;
        progress.advance(SYNTHESIZED).await;

        let inputs = ScoreInputs::from_analyses(&structured_results(&analyses), price);
        let score = scoring::score(&inputs);
        progress.advance(SCORED).await;

        self.deps
            .artifacts
            .complete(&artifact.id, &content, &analyses, score.recommendation(), &score)
            .await?;

        Ok(score.score)
    }

    async fn run_battery(&self, ctx: &PromptContext, progress: &ProgressReporter) -> AnalysisMap {
        let total = self.battery.len();
        if total == 0 {
            progress.advance(apportion(DATA_LOADED, BATTERY_DONE, 0, 0)).await;
            return AnalysisMap::new();
        }

        let finished = AtomicUsize::new(0);
        let runs = self.battery.iter().map(|prompt_id| {
            let finished = &finished;
            async move {
                let analysis = self.deps.executor.execute(prompt_id, ctx).await;
                let done = finished.fetch_add(1, Ordering::SeqCst) + 1;
                progress
                    .advance(apportion(DATA_LOADED, BATTERY_DONE, done, total))
                    .await;
                (prompt_id.clone(), analysis)
            }
        });

        join_all(runs).await.into_iter().collect()
    }
}

#[async_trait]
impl ArtifactLane for MemoLane {
    async fn process(&self, artifact: Artifact) -> LaneOutcome {
        let id = artifact.id.clone();

        match self.deps.artifacts.claim(&id).await {
            Ok(true) => {}
            Ok(false) => {
                info!("Artifact {} already claimed; skipping", id);
                return LaneOutcome::Skipped;
            }
            Err(e) => {
                error!("Failed to claim artifact {}: {:#}", id, e);
                return LaneOutcome::Failed(format!("{:#}", e));
            }
        }

        info!("Generating memo for {} (artifact {})", artifact.ticker, id);
        let progress = ProgressReporter::new(Arc::clone(&self.deps.artifacts), &id);
        progress.advance(CLAIMED).await;

        let timeout = self.deps.lane_timeout;
        let message = match tokio::time::timeout(timeout, self.generate(&artifact, &progress)).await
        {
            Ok(Ok(score)) => {
                info!("Artifact {} complete with score {}", id, score);
                return LaneOutcome::Completed { score };
            }
            Ok(Err(e)) => failure_message(&e),
            Err(_) => EngineError::LaneTimeout {
                lane: "memo".to_string(),
                timeout_secs: timeout.as_secs(),
            }
            .to_string(),
        };

        warn!("Artifact {} failed: {}", id, message);
        if let Err(e) = self.deps.artifacts.mark_failed(&id, &message).await {
            error!("Failed to record failure for artifact {}: {:#}", id, e);
        }
        LaneOutcome::Failed(message)
    }
}
