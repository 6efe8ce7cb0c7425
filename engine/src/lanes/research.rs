//! Research lane
//!
//! Turns one idea into a research document by running a DAG:
//!
//! ```text
//! load_idea → fetch_data ─┬─ business_overview_report ─────────┐
//!                         ├─ financial_statement_analysis ─────┤
//!                         ├─ valuation_analysis ──┬────────────┤
//!                         └─ risk_assessment ─────┴ bull_bear ─┴─ investment_thesis_synthesis → persist_research
//! ```
//!
//! Module nodes record their analysis whether or not it succeeded, so a weak
//! module never blocks the thesis. The thesis synthesis is the only model call
//! whose failure fails the run.

use anyhow::Result;
use sdk::errors::EngineError;
use sdk::types::{ArtifactContent, LaneKind, MacroSnapshot, QuantSnapshot, RunStatus};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use super::{analyses_as_context, LaneDeps};
use crate::artifacts::{AnalysisMap, SupportingAnalysis};
use crate::dag::{DagRunner, Node, RunContext};
use crate::db::{Idea, ResearchDocument};
use crate::prompts::{ids, PromptContext};

/// Research modules, in report order
pub const RESEARCH_MODULES: [&str; 5] = [
    ids::BUSINESS_OVERVIEW,
    ids::FINANCIAL_STATEMENTS,
    ids::VALUATION,
    ids::RISK_ASSESSMENT,
    ids::BULL_BEAR,
];

const IDEA: &str = "idea";
const QUANT: &str = "quant";
const MACRO: &str = "macro";
const THESIS: &str = "thesis";
const DOCUMENT: &str = "research_document";

fn section_key(prompt_id: &str) -> String {
    format!("section:{}", prompt_id)
}

pub struct ResearchLane {
    deps: LaneDeps,
}

impl ResearchLane {
    pub fn new(deps: LaneDeps) -> Self {
        Self { deps }
    }

    /// Research `idea_id` end to end under a run record.
    pub async fn run(&self, idea_id: &str) -> Result<ResearchDocument> {
        let run = self.deps.runs.create(LaneKind::Research).await?;
        self.deps
            .runs
            .update_payload(&run.id, "idea_id", &json!(idea_id))
            .await?;
        info!("Research run {} started for idea {}", run.id, idea_id);

        match self.execute(&run.id, idea_id).await {
            Ok(doc) => {
                self.deps
                    .runs
                    .update_payload(&run.id, "research_id", &json!(doc.id))
                    .await?;
                self.deps
                    .runs
                    .update_status(&run.id, RunStatus::Completed, None)
                    .await?;
                info!("Research run {} completed: {}", run.id, doc.id);
                Ok(doc)
            }
            Err(e) => {
                let message = format!("{:#}", e);
                warn!("Research run {} failed: {}", run.id, message);
                self.deps
                    .runs
                    .update_status(&run.id, RunStatus::Failed, Some(&message))
                    .await?;
                Err(e)
            }
        }
    }

    async fn execute(&self, run_id: &str, idea_id: &str) -> Result<ResearchDocument> {
        let dag = DagRunner::new(self.nodes(idea_id))?;
        let ctx = Arc::new(RunContext::new());

        let result = dag
            .run_with_deadline(Arc::clone(&ctx), self.deps.lane_timeout)
            .await;
        self.deps
            .runs
            .update_payload(run_id, "dag", &serde_json::to_value(&result)?)
            .await?;

        if !result.is_success() {
            let summary = result
                .failure_summary()
                .unwrap_or_else(|| "research graph failed".to_string());
            anyhow::bail!("Research for idea {} failed: {}", idea_id, summary);
        }

        ctx.get_as(DOCUMENT).await
    }

    /// The research graph for one idea
    pub fn nodes(&self, idea_id: &str) -> Vec<Node> {
        let policy = self.deps.node_policy.clone();
        let mut nodes = vec![self.load_idea(idea_id), self.fetch_data()];

        for module in [
            ids::BUSINESS_OVERVIEW,
            ids::FINANCIAL_STATEMENTS,
            ids::VALUATION,
            ids::RISK_ASSESSMENT,
        ] {
            nodes.push(self.module(module, &["fetch_data"], &[]));
        }
        nodes.push(self.module(
            ids::BULL_BEAR,
            &[ids::VALUATION, ids::RISK_ASSESSMENT],
            &[ids::VALUATION, ids::RISK_ASSESSMENT],
        ));
        nodes.push(self.synthesis());
        nodes.push(self.persist());

        nodes
            .into_iter()
            .map(|n| n.with_policy(policy.clone()))
            .collect()
    }

    fn load_idea(&self, idea_id: &str) -> Node {
        let research = Arc::clone(&self.deps.research);
        let idea_id = idea_id.to_string();
        Node::new("load_idea", move |ctx: Arc<RunContext>| {
            let research = Arc::clone(&research);
            let idea_id = idea_id.clone();
            async move {
                let idea = research
                    .get_idea(&idea_id)
                    .await?
                    .ok_or_else(|| EngineError::UpstreamNotFound(idea_id.clone()))?;
                ctx.insert(IDEA, serde_json::to_value(&idea)?).await;
                Ok(())
            }
        })
        .named("Load idea")
    }

    fn fetch_data(&self) -> Node {
        let market = Arc::clone(&self.deps.market);
        Node::new("fetch_data", move |ctx: Arc<RunContext>| {
            let market = Arc::clone(&market);
            async move {
                let idea: Idea = ctx.get_as(IDEA).await?;
                let (quant, macro_snapshot) =
                    tokio::try_join!(market.quant(&idea.ticker), market.macro_snapshot())?;
                ctx.insert(QUANT, serde_json::to_value(&quant)?).await;
                ctx.insert(MACRO, serde_json::to_value(&macro_snapshot)?).await;
                Ok(())
            }
        })
        .named("Fetch market data")
        .depends_on(["load_idea"])
    }

    /// A research module. `include` names earlier sections fed in as prior
    /// research.
    fn module(&self, prompt_id: &'static str, after: &[&str], include: &[&'static str]) -> Node {
        let executor = Arc::clone(&self.deps.executor);
        let include: Vec<&'static str> = include.to_vec();
        Node::new(prompt_id, move |ctx: Arc<RunContext>| {
            let executor = Arc::clone(&executor);
            let include = include.clone();
            async move {
                let sections = collect_sections(&ctx, &include).await;
                let prompt_ctx = prompt_context(&ctx, &sections).await?;

                let analysis = executor.execute(prompt_id, &prompt_ctx).await;
                if !analysis.success {
                    warn!(
                        "Research module {} failed: {}",
                        prompt_id,
                        analysis.error.as_deref().unwrap_or("unknown error")
                    );
                }
                ctx.insert(section_key(prompt_id), serde_json::to_value(&analysis)?)
                    .await;
                Ok(())
            }
        })
        .depends_on(after.iter().copied())
    }

    fn synthesis(&self) -> Node {
        let executor = Arc::clone(&self.deps.executor);
        Node::new(ids::THESIS_SYNTHESIS, move |ctx: Arc<RunContext>| {
            let executor = Arc::clone(&executor);
            async move {
                let sections = collect_sections(&ctx, &RESEARCH_MODULES).await;
                let prompt_ctx = prompt_context(&ctx, &AnalysisMap::new())
                    .await?
                    .with_supporting_analyses(analyses_as_context(&sections));

                let content = executor
                    .synthesize(ids::THESIS_SYNTHESIS, &prompt_ctx)
                    .await?;
                ctx.insert(THESIS, serde_json::to_value(&content)?).await;
                Ok(())
            }
        })
        .named("Synthesize thesis")
        .depends_on(RESEARCH_MODULES)
    }

    fn persist(&self) -> Node {
        let research = Arc::clone(&self.deps.research);
        Node::new("persist_research", move |ctx: Arc<RunContext>| {
            let research = Arc::clone(&research);
            async move {
                let idea: Idea = ctx.get_as(IDEA).await?;
                let content: ArtifactContent = ctx.get_as(THESIS).await?;
                let sections = collect_sections(&ctx, &RESEARCH_MODULES).await;

                let doc = research
                    .insert_research(&ResearchDocument {
                        id: uuid::Uuid::new_v4().to_string(),
                        idea_id: idea.id.clone(),
                        ticker: idea.ticker.clone(),
                        company: idea.company.clone(),
                        content,
                        sections,
                        created_at: 0,
                    })
                    .await?;
                ctx.insert(DOCUMENT, serde_json::to_value(&doc)?).await;
                Ok(())
            }
        })
        .named("Persist research")
        .depends_on([ids::THESIS_SYNTHESIS])
    }
}

async fn collect_sections(ctx: &RunContext, prompt_ids: &[&str]) -> AnalysisMap {
    let mut sections = AnalysisMap::new();
    for id in prompt_ids {
        if let Ok(analysis) = ctx.get_as::<SupportingAnalysis>(&section_key(id)).await {
            sections.insert(id.to_string(), analysis);
        }
    }
    sections
}

/// Prompt context from the idea, market data and any earlier sections.
async fn prompt_context(ctx: &RunContext, sections: &AnalysisMap) -> Result<PromptContext> {
    let idea: Idea = ctx.get_as(IDEA).await?;
    let quant: Option<QuantSnapshot> = ctx.get_as(QUANT).await.ok();
    let macro_snapshot: Option<MacroSnapshot> = ctx.get_as(MACRO).await.ok();

    let mut prior = idea.thesis.clone();
    if !sections.is_empty() {
        prior.push_str("\n\nEarlier findings:\n");
        prior.push_str(&analyses_as_context(sections));
    }

    let mut prompt_ctx = PromptContext::for_company(&idea.ticker, &idea.company)
        .with_prior_research(prior);
    prompt_ctx.quant = quant;
    prompt_ctx.macro_snapshot = macro_snapshot;
    Ok(prompt_ctx)
}
