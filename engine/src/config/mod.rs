//! Configuration management
//!
//! This module handles loading, validation, and management of the ARC configuration.
//! Configuration is stored in TOML format at ~/.arc/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Data directory and log level
//! - **llm**: Model provider settings and generation defaults
//! - **pipeline**: Batch sizing, lane timeouts, weekly bundle size, watchlist
//! - **dag**: Default node timeout and retry policy
//! - **budget**: Daily model spend ceiling
//! - **prompts**: Optional directory of prompt template overrides
//!
//! # Path Expansion
//!
//! `~` is expanded to the user's home directory and the data directory is
//! created if it does not exist.
//!
//! # Examples
//!
//! ```no_run
//! use arc_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Data dir: {:?}", config.core.data_dir);
//! println!("Batch size: {}", config.pipeline.batch_size);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dag::NodePolicy;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub core: CoreConfig,

    pub llm: LLMConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub dag: DagConfig,

    #[serde(default)]
    pub budget: BudgetConfig,

    #[serde(default)]
    pub prompts: PromptsConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Data directory path (supports ~ expansion). Holds the database and
    /// market snapshots.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Model provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Preferred provider (ollama, openai)
    pub default_provider: String,

    /// Sampling temperature used when a template does not set one
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Completion token limit used when a template does not set one
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default)]
    pub ollama: OllamaConfig,

    #[serde(default)]
    pub openai: OpenAIConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,

    #[serde(default = "default_ollama_model")]
    pub model: String,
}

/// Any OpenAI-compatible chat completions endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIConfig {
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    #[serde(default = "default_openai_model")]
    pub model: String,

    /// Name of the environment variable holding the API key
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,

    /// USD per 1K tokens, used for ranking and the spend ceiling
    #[serde(default = "default_openai_cost")]
    pub cost_per_1k_tokens: f64,
}

/// Lane and scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Artifacts processed concurrently per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Upper bound on pending artifacts picked up per scheduler run
    #[serde(default = "default_max_artifacts")]
    pub max_artifacts: usize,

    /// Whole-run timeout for a single lane run
    #[serde(default = "default_lane_timeout_secs")]
    pub lane_timeout_secs: u64,

    /// Memos included in the weekly bundle
    #[serde(default = "default_weekly_top_n")]
    pub weekly_top_n: usize,

    /// Tickers the discovery lane considers
    #[serde(default)]
    pub watchlist: Vec<String>,
}

/// Default node policy for lane graphs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DagConfig {
    #[serde(default = "default_node_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Rolling 24h model spend ceiling in USD. 0 disables the ceiling.
    #[serde(default)]
    pub daily_ceiling_usd: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptsConfig {
    /// Directory of `*.toml` templates overriding the built-in ones
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_artifacts: default_max_artifacts(),
            lane_timeout_secs: default_lane_timeout_secs(),
            weekly_top_n: default_weekly_top_n(),
            watchlist: Vec::new(),
        }
    }
}

impl Default for DagConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_node_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl DagConfig {
    pub fn node_policy(&self) -> NodePolicy {
        NodePolicy::new(
            Duration::from_secs(self.timeout_secs),
            self.max_retries,
            Duration::from_millis(self.backoff_ms),
        )
    }
}

impl PipelineConfig {
    pub fn lane_timeout(&self) -> Duration {
        Duration::from_secs(self.lane_timeout_secs)
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.arc")
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_openai_cost() -> f64 {
    0.002
}

fn default_batch_size() -> usize {
    5
}

fn default_max_artifacts() -> usize {
    20
}

fn default_lane_timeout_secs() -> u64 {
    900
}

fn default_weekly_top_n() -> usize {
    5
}

fn default_node_timeout_secs() -> u64 {
    180
}

fn default_max_retries() -> u32 {
    2
}

fn default_backoff_ms() -> u64 {
    1000
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_base_url(),
            model: default_ollama_model(),
        }
    }
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            base_url: default_openai_base_url(),
            model: default_openai_model(),
            api_key_env: default_openai_key_env(),
            cost_per_1k_tokens: default_openai_cost(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.arc/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration text
    pub fn from_toml_str(contents: &str) -> Result<Self, EngineError> {
        let mut config: Config = toml::from_str(contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let mut config = Self::default_config();

        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.arc/config.toml)
    fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".arc").join("config.toml"))
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            core: CoreConfig {
                data_dir: default_data_dir(),
                log_level: default_log_level(),
            },
            llm: LLMConfig {
                default_provider: "ollama".to_string(),
                temperature: default_temperature(),
                max_tokens: default_max_tokens(),
                ollama: OllamaConfig::default(),
                openai: OpenAIConfig::default(),
            },
            pipeline: PipelineConfig::default(),
            dag: DagConfig::default(),
            budget: BudgetConfig::default(),
            prompts: PromptsConfig::default(),
        }
    }

    /// Path of the SQLite database inside the data directory
    pub fn database_path(&self) -> PathBuf {
        self.core.data_dir.join("arc.db")
    }

    /// Validate and process configuration
    ///
    /// Rejects unknown log levels and providers, a zero batch size, negative
    /// ceilings and out-of-range temperatures. Expands `~` in paths and
    /// creates the data directory.
    fn validate_and_process(&mut self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        let valid_providers = ["ollama", "openai"];
        if !valid_providers.contains(&self.llm.default_provider.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid default provider '{}'. Must be one of: {}",
                self.llm.default_provider,
                valid_providers.join(", ")
            )));
        }

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(EngineError::Config(
                "temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        if self.pipeline.batch_size == 0 {
            return Err(EngineError::Config(
                "batch_size must be at least 1".to_string(),
            ));
        }

        if self.pipeline.lane_timeout_secs == 0 || self.dag.timeout_secs == 0 {
            return Err(EngineError::Config(
                "timeouts must be greater than zero".to_string(),
            ));
        }

        if self.budget.daily_ceiling_usd < 0.0 || !self.budget.daily_ceiling_usd.is_finite() {
            return Err(EngineError::Config(
                "daily_ceiling_usd must be zero (unlimited) or positive".to_string(),
            ));
        }

        self.pipeline.watchlist = self
            .pipeline
            .watchlist
            .iter()
            .map(|t| t.trim().to_uppercase())
            .filter(|t| !t.is_empty())
            .collect();

        self.core.data_dir = expand_path(&self.core.data_dir)?;
        if !self.core.data_dir.exists() {
            fs::create_dir_all(&self.core.data_dir).map_err(|e| {
                EngineError::Config(format!("Failed to create data directory: {}", e))
            })?;
        }

        if let Some(dir) = &self.prompts.dir {
            self.prompts.dir = Some(expand_path(dir)?);
        }

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}
