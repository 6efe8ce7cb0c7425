//! Prompt templates and rendering
//!
//! Templates reference context through `[[field]]` markers. Only the fields
//! enumerated by [`ContextField`] exist; anything the context lacks, and any
//! marker that names no field, renders as [`NOT_AVAILABLE`]. A rendered prompt
//! never contains a raw marker.
//!
//! The [`PromptRegistry`] is built once at startup from the built-in set,
//! optionally overlaid with `*.toml` files from `prompts.dir`, and handed to
//! the executor. It is never mutated afterwards.

use anyhow::{Context, Result};
use regex::Regex;
use sdk::types::{MacroSnapshot, QuantSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, info};

mod builtin;
pub mod executor;

pub use executor::SupportingPromptExecutor;

/// Substituted for every absent field
pub const NOT_AVAILABLE: &str = "N/A";

/// Prompt ids used by the lanes
pub mod ids {
    pub const IDEA_GENERATION: &str = "lane_a_idea_generation";

    pub const BUSINESS_OVERVIEW: &str = "business_overview_report";
    pub const FINANCIAL_STATEMENTS: &str = "financial_statement_analysis";
    pub const VALUATION: &str = "valuation_analysis";
    pub const THESIS_SYNTHESIS: &str = "investment_thesis_synthesis";

    pub const VARIANT_PERCEPTION: &str = "variant_perception";
    pub const BULL_BEAR: &str = "bull_bear_analysis";
    pub const PRE_MORTEM: &str = "pre_mortem_analysis";
    pub const RISK_ASSESSMENT: &str = "risk_assessment";
    pub const CATALYSTS: &str = "catalyst_identification";
    pub const POSITION_SIZING: &str = "position_sizing";
    pub const EXIT_STRATEGY: &str = "exit_strategy";
    pub const INVESTMENT_MEMO: &str = "investment_memo";

    pub const WEEKLY_BUNDLE: &str = "weekly_bundle_synthesis";
}

/// One model prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub id: String,
    pub system: String,
    pub user_template: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Provider asked to answer this prompt first. `None` follows the
    /// configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_tokens() -> u32 {
    2048
}

impl PromptTemplate {
    pub fn render(&self, ctx: &PromptContext) -> String {
        render(&self.user_template, ctx)
    }
}

/// The fields a template can reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextField {
    Ticker,
    Company,
    QuantSnapshot,
    MacroSnapshot,
    PriorResearch,
    SupportingAnalyses,
}

impl ContextField {
    pub const ALL: [ContextField; 6] = [
        ContextField::Ticker,
        ContextField::Company,
        ContextField::QuantSnapshot,
        ContextField::MacroSnapshot,
        ContextField::PriorResearch,
        ContextField::SupportingAnalyses,
    ];

    pub fn marker_name(&self) -> &'static str {
        match self {
            ContextField::Ticker => "ticker",
            ContextField::Company => "company",
            ContextField::QuantSnapshot => "quant_snapshot",
            ContextField::MacroSnapshot => "macro_snapshot",
            ContextField::PriorResearch => "prior_research",
            ContextField::SupportingAnalyses => "supporting_analyses",
        }
    }

    pub fn from_marker(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.marker_name() == name)
    }
}

/// Values available to a template
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    pub ticker: Option<String>,
    pub company: Option<String>,
    pub quant: Option<QuantSnapshot>,
    pub macro_snapshot: Option<MacroSnapshot>,
    pub prior_research: Option<String>,
    /// Only consolidating templates use this
    pub supporting_analyses: Option<String>,
}

impl PromptContext {
    pub fn for_company(ticker: impl Into<String>, company: impl Into<String>) -> Self {
        Self {
            ticker: Some(ticker.into()),
            company: Some(company.into()),
            ..Default::default()
        }
    }

    pub fn with_quant(mut self, quant: QuantSnapshot) -> Self {
        self.quant = Some(quant);
        self
    }

    pub fn with_macro(mut self, snapshot: MacroSnapshot) -> Self {
        self.macro_snapshot = Some(snapshot);
        self
    }

    pub fn with_prior_research(mut self, text: impl Into<String>) -> Self {
        self.prior_research = Some(text.into());
        self
    }

    pub fn with_supporting_analyses(mut self, text: impl Into<String>) -> Self {
        self.supporting_analyses = Some(text.into());
        self
    }

    /// Rendered text for one field, `None` when absent or blank.
    pub fn field_text(&self, field: ContextField) -> Option<String> {
        let text = match field {
            ContextField::Ticker => self.ticker.clone(),
            ContextField::Company => self.company.clone(),
            ContextField::QuantSnapshot => self.quant.as_ref().and_then(to_pretty_json),
            ContextField::MacroSnapshot => self.macro_snapshot.as_ref().and_then(to_pretty_json),
            ContextField::PriorResearch => self.prior_research.clone(),
            ContextField::SupportingAnalyses => self.supporting_analyses.clone(),
        };
        text.filter(|t| !t.trim().is_empty())
    }
}

fn to_pretty_json<T: Serialize>(value: &T) -> Option<String> {
    serde_json::to_string_pretty(value).ok()
}

static MARKER: OnceLock<Option<Regex>> = OnceLock::new();

fn marker_regex() -> Option<&'static Regex> {
    MARKER
        .get_or_init(|| Regex::new(r"\[\[\s*([^\]]*?)\s*\]\]").ok())
        .as_ref()
}

/// Substitute every `[[field]]` marker in `template`.
pub fn render(template: &str, ctx: &PromptContext) -> String {
    let Some(marker) = marker_regex() else {
        return template.to_string();
    };

    marker
        .replace_all(template, |caps: &regex::Captures| {
            ContextField::from_marker(&caps[1])
                .and_then(|field| ctx.field_text(field))
                .unwrap_or_else(|| NOT_AVAILABLE.to_string())
        })
        .into_owned()
}

/// Immutable template lookup
#[derive(Debug, Clone)]
pub struct PromptRegistry {
    templates: HashMap<String, PromptTemplate>,
}

impl PromptRegistry {
    pub fn builtin() -> Self {
        let templates = builtin::templates()
            .into_iter()
            .map(|t| (t.id.clone(), t))
            .collect();
        Self { templates }
    }

    /// Built-in templates, overlaid with `dir/*.toml` when a directory is
    /// configured.
    pub fn load(dir: Option<&Path>) -> Result<Self> {
        let registry = Self::builtin();
        match dir {
            Some(dir) => registry.with_overrides_from(dir),
            None => Ok(registry),
        }
    }

    fn with_overrides_from(mut self, dir: &Path) -> Result<Self> {
        if !dir.exists() {
            debug!("Prompt directory {} does not exist; using built-ins", dir.display());
            return Ok(self);
        }

        let mut entries: Vec<_> = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read prompt directory {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "toml"))
            .collect();
        entries.sort();

        for path in entries {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read prompt file {}", path.display()))?;
            let template: PromptTemplate = toml::from_str(&text)
                .with_context(|| format!("Failed to parse prompt file {}", path.display()))?;
            info!("Loaded prompt override '{}' from {}", template.id, path.display());
            self.templates.insert(template.id.clone(), template);
        }

        Ok(self)
    }

    pub fn get(&self, id: &str) -> Option<&PromptTemplate> {
        self.templates.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.templates.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_field_renders_sentinel() {
        let ctx = PromptContext {
            ticker: Some("ACME".to_string()),
            ..Default::default()
        };
        let rendered = render("Ticker [[ticker]] / company [[company]]", &ctx);
        assert_eq!(rendered, "Ticker ACME / company N/A");
    }

    #[test]
    fn test_unknown_marker_never_survives() {
        let ctx = PromptContext::for_company("ACME", "Acme Corp");
        let rendered = render("[[ticker]] [[sector]] [[ ]] [[company]]", &ctx);
        assert_eq!(rendered, "ACME N/A N/A Acme Corp");
        assert!(!rendered.contains("[["));

        let rendered = render("[[quant-snapshot]] / [[Company Name]] / [[ticker]]", &ctx);
        assert_eq!(rendered, "N/A / N/A / ACME");
    }

    #[test]
    fn test_blank_field_counts_as_missing() {
        let ctx = PromptContext::for_company("ACME", "Acme Corp").with_prior_research("   ");
        assert_eq!(render("[[prior_research]]", &ctx), "N/A");
    }

    #[test]
    fn test_snapshot_rendered_as_json() {
        let mut quant = QuantSnapshot::empty("ACME");
        quant.price = Some(42.5);
        let ctx = PromptContext::for_company("ACME", "Acme Corp").with_quant(quant);

        let rendered = render("[[quant_snapshot]]", &ctx);
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["price"], 42.5);
    }

    #[test]
    fn test_builtin_registry_covers_lane_prompts() {
        let registry = PromptRegistry::builtin();
        for id in [
            ids::IDEA_GENERATION,
            ids::BUSINESS_OVERVIEW,
            ids::FINANCIAL_STATEMENTS,
            ids::VALUATION,
            ids::THESIS_SYNTHESIS,
            ids::VARIANT_PERCEPTION,
            ids::BULL_BEAR,
            ids::PRE_MORTEM,
            ids::RISK_ASSESSMENT,
            ids::CATALYSTS,
            ids::POSITION_SIZING,
            ids::EXIT_STRATEGY,
            ids::INVESTMENT_MEMO,
            ids::WEEKLY_BUNDLE,
        ] {
            assert!(registry.contains(id), "missing built-in prompt {}", id);
        }
    }

    #[test]
    fn test_directory_overlay_replaces_builtin() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("risk.toml"),
            r#"
id = "risk_assessment"
system = "Be terse."
user_template = "Rate [[ticker]]"
temperature = 0.1
"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let registry = PromptRegistry::load(Some(dir.path())).unwrap();
        let template = registry.get(ids::RISK_ASSESSMENT).unwrap();
        assert_eq!(template.user_template, "Rate [[ticker]]");
        assert_eq!(template.max_tokens, 2048);
        assert_eq!(template.provider, None);
        assert_eq!(registry.len(), PromptRegistry::builtin().len());
    }

    #[test]
    fn test_reasoning_prompts_route_to_cloud_provider() {
        let registry = PromptRegistry::builtin();
        for id in [
            ids::THESIS_SYNTHESIS,
            ids::VARIANT_PERCEPTION,
            ids::BULL_BEAR,
            ids::INVESTMENT_MEMO,
        ] {
            let template = registry.get(id).unwrap();
            assert_eq!(template.provider.as_deref(), Some("openai"), "{}", id);
        }
        for id in [ids::BUSINESS_OVERVIEW, ids::RISK_ASSESSMENT, ids::POSITION_SIZING] {
            assert_eq!(registry.get(id).unwrap().provider, None, "{}", id);
        }
    }

    #[test]
    fn test_overlay_can_pin_a_provider() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("valuation.toml"),
            r#"
id = "valuation_analysis"
system = "Be precise."
user_template = "Value [[ticker]]"
provider = "ollama"
"#,
        )
        .unwrap();

        let registry = PromptRegistry::load(Some(dir.path())).unwrap();
        assert_eq!(
            registry.get(ids::VALUATION).unwrap().provider.as_deref(),
            Some("ollama")
        );
    }

    #[test]
    fn test_missing_directory_keeps_builtins() {
        let dir = TempDir::new().unwrap();
        let registry = PromptRegistry::load(Some(&dir.path().join("absent"))).unwrap();
        assert!(!registry.is_empty());
    }
}
