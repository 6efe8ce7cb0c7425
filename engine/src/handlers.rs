//! Command handlers for CLI operations
//!
//! Every handler opens the database, runs one operation and closes the pool
//! so the WAL is checkpointed before the process exits.

use anyhow::{Context, Result};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::budget::BudgetLimiter;
use crate::config::Config;
use crate::data::JsonFileMarketData;
use crate::db::Database;
use crate::lanes::{DiscoveryLane, LaneDeps, MemoLane, ResearchLane, WeeklyLane};
use crate::llm::ollama::OllamaProvider;
use crate::llm::openai::OpenAIProvider;
use crate::llm::router::LLMRouter;
use crate::llm::{LLMProvider, ModelClient};
use crate::prompts::{PromptRegistry, SupportingPromptExecutor};
use crate::scheduler::BatchScheduler;

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Everything a lane-running command needs
struct Pipeline {
    database: Database,
    router: Arc<LLMRouter>,
    budget: Arc<BudgetLimiter>,
    deps: LaneDeps,
}

impl Pipeline {
    async fn open(config: &Config) -> Result<Self> {
        let database = open_database(config).await?;

        let budget = Arc::new(BudgetLimiter::new(
            database.pool().clone(),
            config.budget.daily_ceiling_usd,
        ));

        let providers: Vec<Box<dyn LLMProvider>> = vec![
            Box::new(OllamaProvider::new(
                config.llm.ollama.base_url.clone(),
                config.llm.ollama.model.clone(),
            )),
            Box::new(OpenAIProvider::new(config.llm.openai.clone())),
        ];
        let router = Arc::new(
            LLMRouter::new(providers, Arc::new(config.llm.clone()))
                .with_budget(Arc::clone(&budget)),
        );

        let registry = PromptRegistry::load(config.prompts.dir.as_deref())
            .context("Failed to load prompt templates")?;
        info!("Loaded {} prompt templates", registry.len());

        let model = Arc::clone(&router) as Arc<dyn ModelClient>;
        let executor = SupportingPromptExecutor::new(model, Arc::new(registry))
            .with_telemetry(Arc::new(database.calls()));
        let market = Arc::new(JsonFileMarketData::under_data_dir(&config.core.data_dir));
        let deps = LaneDeps::new(&database, Arc::new(executor), market, config);

        Ok(Self {
            database,
            router,
            budget,
            deps,
        })
    }
}

async fn open_database(config: &Config) -> Result<Database> {
    Database::new(&config.database_path())
        .await
        .context("Failed to open database")
}

/// Process pending artifacts through the memo lane
pub async fn handle_batch(config: &Config, format: OutputFormat) -> Result<()> {
    let pipeline = Pipeline::open(config).await?;

    let lane = Arc::new(MemoLane::new(pipeline.deps.clone()));
    let scheduler = BatchScheduler::new(
        Arc::clone(&pipeline.deps.artifacts),
        lane,
        config.pipeline.batch_size,
        config.pipeline.max_artifacts,
    );
    let report = scheduler.run().await.context("Batch run failed")?;

    match format {
        OutputFormat::Text => {
            if report.total() == 0 {
                println!("No pending artifacts");
            } else {
                println!(
                    "Processed {} artifacts in {} batches",
                    report.total(),
                    report.batch_sizes.len()
                );
                println!("  Completed: {}", report.completed);
                println!("  Failed:    {}", report.failed);
                println!("  Skipped:   {}", report.skipped);
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    pipeline.database.close().await
}

/// Generate and store new ideas
pub async fn handle_discover(config: &Config, format: OutputFormat) -> Result<()> {
    let pipeline = Pipeline::open(config).await?;
    let lane = DiscoveryLane::new(pipeline.deps.clone(), config.pipeline.watchlist.clone());
    let ideas = lane.run().await?;

    match format {
        OutputFormat::Text => {
            if ideas.is_empty() {
                println!("No new ideas");
            } else {
                println!("Stored {} ideas:", ideas.len());
                for idea in &ideas {
                    println!("  {} {} ({})", idea.id, idea.ticker, idea.company);
                    println!("    {}", idea.thesis);
                }
            }
        }
        OutputFormat::Json => {
            let output = json!({ "ideas": ideas, "count": ideas.len() });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    pipeline.database.close().await
}

/// Research one idea into a stored research document
pub async fn handle_research(idea_id: String, config: &Config, format: OutputFormat) -> Result<()> {
    let pipeline = Pipeline::open(config).await?;
    let lane = ResearchLane::new(pipeline.deps.clone());
    let document = lane.run(&idea_id).await?;

    match format {
        OutputFormat::Text => {
            println!("Research document: {}", document.id);
            println!("  Ticker:   {} ({})", document.ticker, document.company);
            let failed = document.sections.values().filter(|s| !s.success).count();
            println!(
                "  Sections: {} ({} failed)",
                document.sections.len(),
                failed
            );
            if document.content.is_fallback() {
                println!("  Thesis could not be parsed; raw reply kept");
            }
            println!();
            println!("Approve with: arc approve {}", document.id);
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&document)?);
        }
    }

    pipeline.database.close().await
}

/// Queue a memo artifact for an approved research document
pub async fn handle_approve(
    research_id: String,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let database = open_database(config).await?;
    let research = database
        .research()
        .get_research(&research_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Research document not found: {}", research_id))?;

    let artifact = database.artifacts().create_pending(&research).await?;
    info!("Approved research {} as artifact {}", research_id, artifact.id);

    match format {
        OutputFormat::Text => {
            println!("Queued artifact {} for {}", artifact.id, artifact.ticker);
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&artifact)?);
        }
    }

    database.close().await
}

/// Build the weekly bundle
pub async fn handle_weekly(config: &Config, format: OutputFormat) -> Result<()> {
    let pipeline = Pipeline::open(config).await?;
    let lane = WeeklyLane::new(pipeline.deps.clone(), config.pipeline.weekly_top_n);
    let bundle = lane.run().await?;

    match format {
        OutputFormat::Text => match &bundle {
            Some(bundle) => {
                println!("Weekly bundle {} (week of {})", bundle.id, bundle.week_start);
                println!("  Memos: {}", bundle.artifact_ids.join(", "));
            }
            None => println!("No memos completed this week"),
        },
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&json!({ "bundle": bundle }))?);
        }
    }

    pipeline.database.close().await
}

/// Show one artifact
pub async fn handle_status(
    artifact_id: String,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let database = open_database(config).await?;
    let artifact = database
        .artifacts()
        .get_by_id(&artifact_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Artifact not found: {}", artifact_id))?;

    match format {
        OutputFormat::Text => {
            println!("Artifact: {}", artifact.id);
            println!("  Ticker:   {}", artifact.ticker);
            println!("  Status:   {}", artifact.status);
            println!("  Progress: {}%", artifact.progress);
            if let (Some(score), Some(rec)) = (artifact.conviction_score, artifact.recommendation)
            {
                println!("  Score:    {} ({})", score, rec.as_str());
            }
            let failed: Vec<&str> = artifact
                .analyses
                .values()
                .filter(|a| !a.success)
                .map(|a| a.name.as_str())
                .collect();
            if !failed.is_empty() {
                println!("  Failed analyses: {}", failed.join(", "));
            }
            if let Some(error) = &artifact.error_message {
                println!("  Error:    {}", error);
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&artifact)?);
        }
    }

    database.close().await
}

/// Show recent lane runs
pub async fn handle_runs(limit: i64, config: &Config, format: OutputFormat) -> Result<()> {
    let database = open_database(config).await?;
    let runs = database
        .runs()
        .recent(limit)
        .await
        .context("Failed to fetch runs")?;

    match format {
        OutputFormat::Text => {
            if runs.is_empty() {
                println!("No runs recorded");
            } else {
                println!("Recent runs (last {}):", limit);
                println!();
                for run in &runs {
                    let created = chrono::DateTime::from_timestamp(run.created_at, 0)
                        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_else(|| "Unknown".to_string());
                    println!("{} [{}] {}", run.id, run.run_type, run.status.as_str());
                    println!("  Started: {}", created);
                    if let Some(error) = &run.error {
                        println!("  Error:   {}", error);
                    }
                }
            }
        }
        OutputFormat::Json => {
            let output = json!({ "runs": runs, "count": runs.len(), "limit": limit });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    database.close().await
}

/// Provider reachability and budget position
pub async fn handle_doctor(config: &Config, format: OutputFormat) -> Result<()> {
    let pipeline = Pipeline::open(config).await?;
    let health: Vec<(String, bool)> = pipeline
        .router
        .check_health()
        .await
        .into_iter()
        .map(|(name, ok)| (name.to_string(), ok))
        .collect();
    let budget = pipeline.budget.status().await?;

    match format {
        OutputFormat::Text => {
            println!("Providers:");
            for (name, ok) in &health {
                println!(
                    "  {:<8} {}",
                    name,
                    if *ok { "available" } else { "unavailable" }
                );
            }
            if budget.ceiling > 0.0 {
                println!(
                    "Budget: ${:.2} of ${:.2} spent in the last 24h",
                    budget.spent, budget.ceiling
                );
            } else {
                println!("Budget: no ceiling");
            }
        }
        OutputFormat::Json => {
            let providers: serde_json::Map<String, serde_json::Value> = health
                .iter()
                .map(|(name, ok)| (name.clone(), json!(ok)))
                .collect();
            let output = json!({
                "providers": providers,
                "budget": { "spent": budget.spent, "ceiling": budget.ceiling },
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    pipeline.database.close().await
}
