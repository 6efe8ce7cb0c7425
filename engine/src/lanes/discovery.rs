//! Discovery lane
//!
//! ```text
//! macro_snapshot ──┐
//!                  ├─► idea_generation ─► screen_ideas ─► persist_ideas
//! universe_snapshot┘
//! ```
//!
//! Screening drops malformed candidates, duplicates within the batch and
//! tickers that already have an idea.

use anyhow::Result;
use sdk::errors::EngineError;
use sdk::types::{ArtifactContent, LaneKind, MacroSnapshot, QuantSnapshot, RunStatus};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::LaneDeps;
use crate::dag::{DagRunner, Node, RunContext};
use crate::db::Idea;
use crate::prompts::{ids, PromptContext};

const MACRO: &str = "macro";
const UNIVERSE: &str = "universe";
const KNOWN_TICKERS: &str = "known_tickers";
const CANDIDATES: &str = "candidates";
const SCREENED: &str = "screened";
const PERSISTED: &str = "persisted";

pub struct DiscoveryLane {
    deps: LaneDeps,
    watchlist: Vec<String>,
}

impl DiscoveryLane {
    pub fn new(deps: LaneDeps, watchlist: Vec<String>) -> Self {
        Self { deps, watchlist }
    }

    /// Generate, screen and store new ideas under a run record.
    pub async fn run(&self) -> Result<Vec<Idea>> {
        let run = self.deps.runs.create(LaneKind::Discovery).await?;
        info!("Discovery run {} started", run.id);

        match self.execute(&run.id).await {
            Ok(ideas) => {
                self.deps
                    .runs
                    .update_payload(&run.id, "ideas_persisted", &json!(ideas.len()))
                    .await?;
                self.deps
                    .runs
                    .update_status(&run.id, RunStatus::Completed, None)
                    .await?;
                info!("Discovery run {} stored {} ideas", run.id, ideas.len());
                Ok(ideas)
            }
            Err(e) => {
                let message = format!("{:#}", e);
                warn!("Discovery run {} failed: {}", run.id, message);
                self.deps
                    .runs
                    .update_status(&run.id, RunStatus::Failed, Some(&message))
                    .await?;
                Err(e)
            }
        }
    }

    async fn execute(&self, run_id: &str) -> Result<Vec<Idea>> {
        let dag = DagRunner::new(self.nodes())?;
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
                .unwrap_or_else(|| "discovery graph failed".to_string());
            anyhow::bail!("Discovery failed: {}", summary);
        }

        ctx.get_as(PERSISTED).await
    }

    pub fn nodes(&self) -> Vec<Node> {
        let policy = self.deps.node_policy.clone();
        vec![
            self.macro_snapshot(),
            self.universe_snapshot(),
            self.idea_generation(),
            screen_node(),
            self.persist(),
        ]
        .into_iter()
        .map(|n| n.with_policy(policy.clone()))
        .collect()
    }

    fn macro_snapshot(&self) -> Node {
        let market = Arc::clone(&self.deps.market);
        Node::new("macro_snapshot", move |ctx: Arc<RunContext>| {
            let market = Arc::clone(&market);
            async move {
                let snapshot = market.macro_snapshot().await?;
                ctx.insert(MACRO, serde_json::to_value(&snapshot)?).await;
                Ok(())
            }
        })
        .named("Macro snapshot")
    }

    /// Provider universe plus watchlist tickers it lacks, and existing
    /// coverage.
    fn universe_snapshot(&self) -> Node {
        let market = Arc::clone(&self.deps.market);
        let research = Arc::clone(&self.deps.research);
        let watchlist = self.watchlist.clone();
        Node::new("universe_snapshot", move |ctx: Arc<RunContext>| {
            let market = Arc::clone(&market);
            let research = Arc::clone(&research);
            let watchlist = watchlist.clone();
            async move {
                let mut universe = market.universe().await?;
                let listed: HashSet<String> =
                    universe.iter().map(|q| q.ticker.to_uppercase()).collect();
                for ticker in watchlist.iter().filter(|t| !listed.contains(*t)) {
                    universe.push(market.quant(ticker).await?);
                }
                debug!("Discovery universe has {} tickers", universe.len());

                let known = research.known_tickers().await?;
                ctx.insert(UNIVERSE, serde_json::to_value(&universe)?).await;
                ctx.insert(KNOWN_TICKERS, json!(known)).await;
                Ok(())
            }
        })
        .named("Universe snapshot")
    }

    fn idea_generation(&self) -> Node {
        let executor = Arc::clone(&self.deps.executor);
        Node::new(ids::IDEA_GENERATION, move |ctx: Arc<RunContext>| {
            let executor = Arc::clone(&executor);
            async move {
                let macro_snapshot: MacroSnapshot = ctx.get_as(MACRO).await?;
                let universe: Vec<QuantSnapshot> = ctx.get_as(UNIVERSE).await?;
                let known: Vec<String> = ctx.get_as(KNOWN_TICKERS).await?;

                let coverage = json!({ "universe": universe, "already_covered": known });
                let prompt_ctx = PromptContext::default()
                    .with_macro(macro_snapshot)
                    .with_prior_research(serde_json::to_string_pretty(&coverage)?);

                match executor.synthesize(ids::IDEA_GENERATION, &prompt_ctx).await? {
                    ArtifactContent::WellFormed(value) => {
                        ctx.insert(CANDIDATES, value).await;
                        Ok(())
                    }
                    ArtifactContent::Fallback { parse_error, .. } => {
                        Err(EngineError::ParseRecovery {
                            stage: ids::IDEA_GENERATION.to_string(),
                            message: parse_error,
                        }
                        .into())
                    }
                }
            }
        })
        .named("Generate ideas")
        .depends_on(["macro_snapshot", "universe_snapshot"])
    }

    fn persist(&self) -> Node {
        let research = Arc::clone(&self.deps.research);
        Node::new("persist_ideas", move |ctx: Arc<RunContext>| {
            let research = Arc::clone(&research);
            async move {
                let screened: Vec<Idea> = ctx.get_as(SCREENED).await?;
                let mut stored = Vec::with_capacity(screened.len());
                for idea in &screened {
                    stored.push(research.insert_idea(idea).await?);
                }
                ctx.insert(PERSISTED, serde_json::to_value(&stored)?).await;
                Ok(())
            }
        })
        .named("Persist ideas")
        .depends_on(["screen_ideas"])
    }
}

fn screen_node() -> Node {
    Node::new("screen_ideas", |ctx: Arc<RunContext>| async move {
        let candidates = ctx.get(CANDIDATES).await.unwrap_or(Value::Null);
        let known: Vec<String> = ctx.get_as(KNOWN_TICKERS).await?;
        let screened = screen_ideas(&candidates, &known);
        ctx.insert(SCREENED, serde_json::to_value(&screened)?).await;
        Ok(())
    })
    .named("Screen ideas")
    .depends_on([ids::IDEA_GENERATION])
}

/// Well-formed, previously unseen ideas from a model reply
pub fn screen_ideas(candidates: &Value, known_tickers: &[String]) -> Vec<Idea> {
    let mut seen: HashSet<String> = known_tickers.iter().map(|t| t.to_uppercase()).collect();
    let entries = candidates
        .get("ideas")
        .and_then(Value::as_array)
        .or_else(|| candidates.as_array())
        .cloned()
        .unwrap_or_default();

    let mut ideas = Vec::new();
    for entry in entries {
        let field = |name: &str| {
            entry
                .get(name)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let (Some(ticker), Some(company), Some(thesis)) =
            (field("ticker"), field("company"), field("thesis"))
        else {
            debug!("Dropping malformed idea candidate: {}", entry);
            continue;
        };

        let ticker = ticker.to_uppercase();
        if !is_valid_ticker(&ticker) {
            debug!("Dropping idea with invalid ticker '{}'", ticker);
            continue;
        }
        if !seen.insert(ticker.clone()) {
            debug!("Dropping already covered ticker {}", ticker);
            continue;
        }

        ideas.push(Idea::new(ticker, company, thesis, ids::IDEA_GENERATION));
    }
    ideas
}

fn is_valid_ticker(ticker: &str) -> bool {
    (1..=10).contains(&ticker.len())
        && ticker
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
}
