//! Lane pipelines
//!
//! Each lane takes one upstream reference to the next stage of the research
//! process:
//!
//! ```text
//! discovery  → ideas
//! research   → idea → research document          (DAG)
//! memo       → approved research → memo artifact (sequential, batch driven)
//! weekly     → completed memos → weekly bundle
//! ```
//!
//! Supporting analyses never abort a lane; their failures are recorded next
//! to the successful ones. Only the consolidating synthesis, or an
//! unreachable collaborator, fails the run.

use async_trait::async_trait;
use sdk::errors::EngineError;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::artifacts::AnalysisMap;
use crate::config::Config;
use crate::dag::NodePolicy;
use crate::data::MarketDataProvider;
use crate::db::{
    Artifact, ArtifactRepository, BundleRepository, Database, ResearchRepository, RunRepository,
};
use crate::prompts::SupportingPromptExecutor;

pub mod discovery;
pub mod memo;
pub mod research;
pub mod weekly;

pub use discovery::DiscoveryLane;
pub use memo::MemoLane;
pub use research::ResearchLane;
pub use weekly::WeeklyLane;

/// Collaborators shared by every lane
#[derive(Clone)]
pub struct LaneDeps {
    pub artifacts: Arc<ArtifactRepository>,
    pub research: Arc<ResearchRepository>,
    pub runs: Arc<RunRepository>,
    pub bundles: Arc<BundleRepository>,
    pub executor: Arc<SupportingPromptExecutor>,
    pub market: Arc<dyn MarketDataProvider>,
    /// Default policy for DAG nodes
    pub node_policy: NodePolicy,
    /// Whole-run bound
    pub lane_timeout: Duration,
}

impl LaneDeps {
    pub fn new(
        db: &Database,
        executor: Arc<SupportingPromptExecutor>,
        market: Arc<dyn MarketDataProvider>,
        config: &Config,
    ) -> Self {
        Self {
            artifacts: Arc::new(db.artifacts()),
            research: Arc::new(db.research()),
            runs: Arc::new(db.runs()),
            bundles: Arc::new(db.bundles()),
            executor,
            market,
            node_policy: config.dag.node_policy(),
            lane_timeout: config.pipeline.lane_timeout(),
        }
    }
}

/// How one artifact run ended
#[derive(Debug, Clone, PartialEq)]
pub enum LaneOutcome {
    Completed { score: u8 },
    Failed(String),
    /// Another run already claimed the artifact
    Skipped,
}

/// A lane that turns one pending artifact into a finished one
#[async_trait]
pub trait ArtifactLane: Send + Sync {
    /// Claim and process `artifact`. Never panics; every failure is reported
    /// through [`LaneOutcome::Failed`].
    async fn process(&self, artifact: Artifact) -> LaneOutcome;
}

/// Human-readable failure text, with budget refusals called out.
pub(crate) fn failure_message(err: &anyhow::Error) -> String {
    match err.downcast_ref::<EngineError>() {
        Some(e @ EngineError::BudgetExceeded { .. }) => format!("Budget exceeded: {}", e),
        _ => format!("{:#}", err),
    }
}

/// Supporting results as prompt context for a consolidating call.
pub(crate) fn analyses_as_context(analyses: &AnalysisMap) -> String {
    let mut out = Map::new();
    for (name, analysis) in analyses {
        let value = match (&analysis.result, analysis.structured()) {
            (_, Some(structured)) => structured.clone(),
            (Some(content), None) => json!({ "raw": content.as_prompt_text() }),
            (None, None) => json!({ "unavailable": analysis.error }),
        };
        out.insert(name.clone(), value);
    }
    serde_json::to_string_pretty(&Value::Object(out)).unwrap_or_default()
}
