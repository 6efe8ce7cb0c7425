//! Shared domain types
//!
//! Types exchanged between the engine, its persistence layer and its
//! collaborators. Everything here is plain data with serde support.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of a generated artifact
///
/// ```text
/// pending --claim--> generating --+--> complete
///                                 +--> failed
/// ```
///
/// `complete` and `failed` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStatus {
    Pending,
    Generating,
    Complete,
    Failed,
}

impl ArtifactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactStatus::Pending => "pending",
            ArtifactStatus::Generating => "generating",
            ArtifactStatus::Complete => "complete",
            ArtifactStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ArtifactStatus::Complete | ArtifactStatus::Failed)
    }

    /// Whether `self -> next` is a legal lifecycle edge.
    pub fn can_transition_to(&self, next: ArtifactStatus) -> bool {
        matches!(
            (self, next),
            (ArtifactStatus::Pending, ArtifactStatus::Generating)
                | (ArtifactStatus::Generating, ArtifactStatus::Complete)
                | (ArtifactStatus::Generating, ArtifactStatus::Failed)
        )
    }
}

impl fmt::Display for ArtifactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ArtifactStatus::Pending),
            "generating" => Ok(ArtifactStatus::Generating),
            "complete" => Ok(ArtifactStatus::Complete),
            "failed" => Ok(ArtifactStatus::Failed),
            other => Err(format!("unknown artifact status '{}'", other)),
        }
    }
}

/// Status of one pipeline invocation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status '{}'", other)),
        }
    }
}

/// The research-to-decision stages
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LaneKind {
    Discovery,
    Research,
    Memo,
    Weekly,
}

impl LaneKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LaneKind::Discovery => "discovery",
            LaneKind::Research => "research",
            LaneKind::Memo => "memo",
            LaneKind::Weekly => "weekly",
        }
    }
}

impl fmt::Display for LaneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LaneKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discovery" => Ok(LaneKind::Discovery),
            "research" => Ok(LaneKind::Research),
            "memo" => Ok(LaneKind::Memo),
            "weekly" => Ok(LaneKind::Weekly),
            other => Err(format!("unknown lane '{}'", other)),
        }
    }
}

/// Payload of a generated document
///
/// Either the model output parsed into JSON, or the raw text together with
/// the reason it could not be parsed. Consumers must branch on the variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactContent {
    WellFormed(Value),
    Fallback { raw: String, parse_error: String },
}

impl ArtifactContent {
    /// The structured payload, or `None` for a raw fallback.
    pub fn structured(&self) -> Option<&Value> {
        match self {
            ArtifactContent::WellFormed(value) => Some(value),
            ArtifactContent::Fallback { .. } => None,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, ArtifactContent::Fallback { .. })
    }

    /// Text suitable for feeding into a later prompt.
    pub fn as_prompt_text(&self) -> String {
        match self {
            ArtifactContent::WellFormed(value) => {
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            }
            ArtifactContent::Fallback { raw, .. } => raw.clone(),
        }
    }
}

/// Investment recommendation derived from the conviction score
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    StrongBuy,
    Buy,
    Hold,
    Reduce,
    Avoid,
}

impl Recommendation {
    pub fn from_score(score: u8) -> Self {
        match score {
            75.. => Recommendation::StrongBuy,
            60..=74 => Recommendation::Buy,
            45..=59 => Recommendation::Hold,
            30..=44 => Recommendation::Reduce,
            _ => Recommendation::Avoid,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::StrongBuy => "strong_buy",
            Recommendation::Buy => "buy",
            Recommendation::Hold => "hold",
            Recommendation::Reduce => "reduce",
            Recommendation::Avoid => "avoid",
        }
    }
}

impl FromStr for Recommendation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strong_buy" => Ok(Recommendation::StrongBuy),
            "buy" => Ok(Recommendation::Buy),
            "hold" => Ok(Recommendation::Hold),
            "reduce" => Ok(Recommendation::Reduce),
            "avoid" => Ok(Recommendation::Avoid),
            other => Err(format!("unknown recommendation '{}'", other)),
        }
    }
}

/// Quantitative company snapshot. Providers fill what they have.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QuantSnapshot {
    pub ticker: String,
    pub price: Option<f64>,
    pub market_cap: Option<f64>,
    pub pe_ratio: Option<f64>,
    pub ev_ebitda: Option<f64>,
    pub revenue_growth: Option<f64>,
    pub gross_margin: Option<f64>,
    pub operating_margin: Option<f64>,
    pub debt_to_equity: Option<f64>,
    pub week52_high: Option<f64>,
    pub week52_low: Option<f64>,
    pub as_of: Option<String>,
}

impl QuantSnapshot {
    pub fn empty(ticker: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            ..Default::default()
        }
    }
}

/// Macro environment snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MacroSnapshot {
    pub fed_funds_rate: Option<f64>,
    pub ten_year_yield: Option<f64>,
    pub cpi_yoy: Option<f64>,
    pub unemployment_rate: Option<f64>,
    pub vix: Option<f64>,
    pub regime: Option<String>,
    pub as_of: Option<String>,
}
