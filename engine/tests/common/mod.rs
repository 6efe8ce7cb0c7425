//! Shared fixtures for the lane and scheduler integration tests

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use arc_engine::artifacts::AnalysisMap;
use arc_engine::config::Config;
use arc_engine::data::MarketDataProvider;
use arc_engine::db::{Database, Idea, ResearchDocument};
use arc_engine::lanes::LaneDeps;
use arc_engine::llm::{Completion, CompletionRequest, LLMError, ModelClient};
use arc_engine::prompts::{PromptRegistry, SupportingPromptExecutor};
use sdk::types::{ArtifactContent, MacroSnapshot, QuantSnapshot};

/// How the scripted model answers one prompt
#[derive(Clone)]
pub enum Reply {
    Text(String),
    Fail,
    OverBudget,
    Slow(Duration, String),
}

/// Answers by matching a phrase in the user message. Unmatched prompts fail.
#[derive(Default)]
pub struct ScriptedModel {
    rules: Vec<(String, Reply)>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, phrase: &str, reply: Reply) -> Self {
        self.rules.push((phrase.to_string(), reply));
        self
    }

    pub fn reply(self, phrase: &str, text: &str) -> Self {
        self.on(phrase, Reply::Text(text.to_string()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LLMError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let prompt = request
            .messages
            .last()
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        let reply = self
            .rules
            .iter()
            .find(|(phrase, _)| prompt.contains(phrase.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or(Reply::Fail);

        let content = match reply {
            Reply::Text(text) => text,
            Reply::Slow(delay, text) => {
                tokio::time::sleep(delay).await;
                text
            }
            Reply::Fail => {
                return Err(LLMError::ProviderUnavailable("scripted failure".to_string()))
            }
            Reply::OverBudget => {
                return Err(LLMError::CallsDisallowed {
                    spent: 12.5,
                    ceiling: 10.0,
                })
            }
        };

        Ok(Completion {
            content,
            provider: "scripted".to_string(),
        })
    }
}

/// Phrases unique to each built-in template
pub mod phrase {
    pub const IDEAS: &str = "Propose new long ideas";
    pub const BUSINESS: &str = "Describe the business model";
    pub const FINANCIALS: &str = "Analyse growth, margins";
    pub const VALUATION: &str = "Value the company against";
    pub const THESIS: &str = "consolidated investment thesis";
    pub const VARIANT: &str = "differ from consensus";
    pub const BULL_BEAR: &str = "Build bull, base and bear scenarios";
    pub const PRE_MORTEM: &str = "Assume the position lost";
    pub const RISK: &str = "Assess business, financial";
    pub const CATALYSTS: &str = "dated catalysts";
    pub const SIZING: &str = "Recommend a position size";
    pub const EXIT: &str = "Define the sell discipline";
    pub const MEMO: &str = "investment committee memo";
    pub const WEEKLY: &str = "weekly digest";
}

/// In-memory market data
#[derive(Default)]
pub struct StaticMarket {
    pub quotes: HashMap<String, QuantSnapshot>,
    pub universe: Vec<QuantSnapshot>,
}

impl StaticMarket {
    pub fn with_price(ticker: &str, price: f64) -> Self {
        let mut market = Self::default();
        market.quotes.insert(
            ticker.to_string(),
            QuantSnapshot {
                ticker: ticker.to_string(),
                price: Some(price),
                ..Default::default()
            },
        );
        market
    }
}

#[async_trait]
impl MarketDataProvider for StaticMarket {
    async fn quant(&self, ticker: &str) -> Result<QuantSnapshot> {
        Ok(self
            .quotes
            .get(ticker)
            .cloned()
            .unwrap_or_else(|| QuantSnapshot::empty(ticker)))
    }

    async fn macro_snapshot(&self) -> Result<MacroSnapshot> {
        Ok(MacroSnapshot {
            fed_funds_rate: Some(4.25),
            ..Default::default()
        })
    }

    async fn universe(&self) -> Result<Vec<QuantSnapshot>> {
        Ok(self.universe.clone())
    }
}

pub async fn test_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(&temp_dir.path().join("arc.db")).await.unwrap();
    (db, temp_dir)
}

pub fn lane_deps(db: &Database, model: Arc<ScriptedModel>, market: StaticMarket) -> LaneDeps {
    let mut config = Config::default_config();
    config.dag.max_retries = 0;
    config.dag.backoff_ms = 1;

    let executor = SupportingPromptExecutor::new(model, Arc::new(PromptRegistry::builtin()))
        .with_telemetry(Arc::new(db.calls()));
    LaneDeps::new(db, Arc::new(executor), Arc::new(market), &config)
}

/// An idea plus an approved-looking research document for it
pub async fn seed_research(db: &Database, ticker: &str) -> ResearchDocument {
    let repo = db.research();
    let idea = repo
        .insert_idea(&Idea::new(ticker, format!("{} Corp", ticker), "Underearning franchise", "test"))
        .await
        .unwrap();

    repo.insert_research(&ResearchDocument {
        id: uuid::Uuid::new_v4().to_string(),
        idea_id: idea.id.clone(),
        ticker: idea.ticker.clone(),
        company: idea.company.clone(),
        content: ArtifactContent::WellFormed(serde_json::json!({
            "thesis": "Margins recover as pricing resets"
        })),
        sections: AnalysisMap::new(),
        created_at: 0,
    })
    .await
    .unwrap()
}
