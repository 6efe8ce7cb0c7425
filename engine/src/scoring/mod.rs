//! Conviction scoring
//!
//! Turns the qualitative sub-analyses of a memo into a bounded integer score.
//! The score starts at a baseline of 50 and each signal contributes an
//! independently bounded adjustment:
//!
//! | signal            | bound      |
//! |-------------------|------------|
//! | conviction        | -8 ..= 8   |
//! | scenario skew     | -10 ..= 10 |
//! | asymmetry         | -15 ..= 12 |
//! | risk rating       | -12 ..= 5  |
//! | failure scenarios | -16 ..= 0  |
//!
//! The total is clamped to `[10, 95]`. A missing input contributes nothing.
//! All functions here are pure.

use sdk::types::Recommendation;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

pub const BASELINE: i32 = 50;
pub const MIN_SCORE: i32 = 10;
pub const MAX_SCORE: i32 = 95;

/// Probability at or above which a pre-mortem scenario counts as likely.
const LIKELY_FAILURE_PROBABILITY: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
    /// Normalized to 0..=10
    Numeric(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskRating {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl RiskRating {
    pub fn parse(label: &str) -> Option<Self> {
        let normalized = label.trim().to_lowercase().replace(['_', '-'], " ");
        match normalized.as_str() {
            "low" | "minimal" => Some(RiskRating::Low),
            "medium" | "moderate" => Some(RiskRating::Medium),
            "high" | "elevated" => Some(RiskRating::High),
            "very high" | "extreme" | "critical" | "severe" => Some(RiskRating::VeryHigh),
            _ => None,
        }
    }
}

/// Scoring inputs. Probabilities are fractions in `[0, 1]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreInputs {
    pub confidence: Option<Confidence>,
    pub bull_probability: Option<f64>,
    pub bear_probability: Option<f64>,
    pub price: Option<f64>,
    pub bear_value: Option<f64>,
    pub base_value: Option<f64>,
    pub bull_value: Option<f64>,
    pub risk_rating: Option<RiskRating>,
    pub likely_failures: Option<u32>,
}

/// Per-signal adjustments applied on top of the baseline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub conviction: i32,
    pub skew: i32,
    pub asymmetry: i32,
    pub risk: i32,
    pub failure_scenarios: i32,
}

impl ScoreBreakdown {
    pub fn total(&self) -> i32 {
        self.conviction + self.skew + self.asymmetry + self.risk + self.failure_scenarios
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvictionScore {
    pub score: u8,
    pub breakdown: ScoreBreakdown,
}

impl ConvictionScore {
    pub fn recommendation(&self) -> Recommendation {
        Recommendation::from_score(self.score)
    }
}

/// Compute the conviction score.
pub fn score(inputs: &ScoreInputs) -> ConvictionScore {
    let breakdown = ScoreBreakdown {
        conviction: conviction_adjustment(inputs.confidence),
        skew: skew_adjustment(inputs.bull_probability, inputs.bear_probability),
        asymmetry: asymmetry_adjustment(
            inputs.price,
            inputs.bear_value,
            inputs.base_value,
            inputs.bull_value,
        ),
        risk: risk_adjustment(inputs.risk_rating),
        failure_scenarios: failure_adjustment(inputs.likely_failures),
    };

    let total = (BASELINE + breakdown.total()).clamp(MIN_SCORE, MAX_SCORE);
    ConvictionScore {
        score: total as u8,
        breakdown,
    }
}

pub fn conviction_adjustment(confidence: Option<Confidence>) -> i32 {
    match confidence {
        Some(Confidence::High) => 8,
        Some(Confidence::Medium) => 3,
        Some(Confidence::Low) => -5,
        Some(Confidence::Numeric(n)) if n.is_finite() => {
            ((n.clamp(0.0, 10.0) - 5.0) * 1.6).round() as i32
        }
        _ => 0,
    }
    .clamp(-8, 8)
}

pub fn skew_adjustment(bull: Option<f64>, bear: Option<f64>) -> i32 {
    match (bull, bear) {
        (Some(bull), Some(bear)) if bull.is_finite() && bear.is_finite() => {
            let diff = bull.clamp(0.0, 1.0) - bear.clamp(0.0, 1.0);
            ((diff * 20.0).round() as i32).clamp(-10, 10)
        }
        _ => 0,
    }
}

/// Reward upside relative to downside from the current price.
pub fn asymmetry_adjustment(
    price: Option<f64>,
    bear: Option<f64>,
    base: Option<f64>,
    bull: Option<f64>,
) -> i32 {
    let (price, bear, bull) = match (price, bear, bull) {
        (Some(p), Some(b), Some(u)) if p > 0.0 && p.is_finite() && b.is_finite() && u.is_finite() => {
            (p, b, u)
        }
        _ => return 0,
    };

    let upside = bull - price;
    let downside = price - bear;

    let tier = if upside <= 0.0 {
        -12
    } else if downside <= 0.0 {
        12
    } else {
        match upside / downside {
            r if r >= 3.0 => 12,
            r if r >= 2.0 => 8,
            r if r >= 1.5 => 4,
            r if r >= 1.0 => 0,
            r if r >= 0.5 => -6,
            _ => -12,
        }
    };

    let base_penalty = match base {
        Some(base) if base.is_finite() && base < price => -3,
        _ => 0,
    };

    (tier + base_penalty).clamp(-15, 12)
}

pub fn risk_adjustment(rating: Option<RiskRating>) -> i32 {
    match rating {
        Some(RiskRating::Low) => 5,
        Some(RiskRating::Medium) | None => 0,
        Some(RiskRating::High) => -7,
        Some(RiskRating::VeryHigh) => -12,
    }
}

pub fn failure_adjustment(likely_failures: Option<u32>) -> i32 {
    let count = likely_failures.unwrap_or(0).min(4) as i32;
    -4 * count
}

impl ScoreInputs {
    /// Pull scoring inputs out of structured sub-analyses keyed by prompt id.
    ///
    /// Percent-style probabilities (e.g. `65`) are normalized to fractions
    /// here. Anything missing or malformed is left as `None`.
    pub fn from_analyses(analyses: &HashMap<String, Value>, price: Option<f64>) -> Self {
        let mut inputs = ScoreInputs {
            price,
            ..Default::default()
        };

        if let Some(vp) = analyses.get("variant_perception") {
            inputs.confidence = vp
                .get("confidence")
                .or_else(|| vp.get("confidence_level"))
                .and_then(parse_confidence);
        }

        if let Some(bb) = analyses.get("bull_bear_analysis") {
            inputs.bull_probability = scenario_field(bb, "bull", "probability")
                .and_then(as_f64)
                .map(normalize_probability);
            inputs.bear_probability = scenario_field(bb, "bear", "probability")
                .and_then(as_f64)
                .map(normalize_probability);
            inputs.bull_value = scenario_target(bb, "bull");
            inputs.base_value = scenario_target(bb, "base");
            inputs.bear_value = scenario_target(bb, "bear");
        }

        if let Some(risk) = analyses.get("risk_assessment") {
            inputs.risk_rating = risk
                .get("overall_risk_rating")
                .or_else(|| risk.get("risk_rating"))
                .and_then(Value::as_str)
                .and_then(RiskRating::parse);
        }

        if let Some(pm) = analyses.get("pre_mortem_analysis") {
            inputs.likely_failures = pm
                .get("failure_scenarios")
                .or_else(|| pm.get("scenarios"))
                .and_then(Value::as_array)
                .map(|scenarios| scenarios.iter().filter(|s| is_likely_failure(s)).count() as u32);
        }

        inputs
    }
}

fn parse_confidence(value: &Value) -> Option<Confidence> {
    if let Some(label) = value.as_str() {
        let label = label.trim().to_lowercase();
        return match label.as_str() {
            "high" | "very high" | "strong" => Some(Confidence::High),
            "medium" | "moderate" => Some(Confidence::Medium),
            "low" | "weak" => Some(Confidence::Low),
            other => other.parse::<f64>().ok().map(normalize_confidence),
        };
    }
    value.as_f64().map(normalize_confidence)
}

/// Map 0-1, 0-10 or 0-100 scales onto 0-10.
fn normalize_confidence(n: f64) -> Confidence {
    let scaled = if n <= 1.0 {
        n * 10.0
    } else if n <= 10.0 {
        n
    } else {
        n / 10.0
    };
    Confidence::Numeric(scaled.clamp(0.0, 10.0))
}

fn normalize_probability(p: f64) -> f64 {
    if p > 1.0 {
        (p / 100.0).clamp(0.0, 1.0)
    } else {
        p.clamp(0.0, 1.0)
    }
}

/// Numbers may arrive as JSON numbers or strings like "35%" or "$42.10".
fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s
            .trim()
            .trim_start_matches('$')
            .trim_end_matches('%')
            .replace(',', "")
            .parse()
            .ok(),
        _ => None,
    }
}

/// Look up `<scenario>_case.<field>` or the flat `<scenario>_<field>`.
fn scenario_field<'a>(analysis: &'a Value, scenario: &str, field: &str) -> Option<&'a Value> {
    analysis
        .get(format!("{}_case", scenario))
        .and_then(|case| case.get(field))
        .or_else(|| analysis.get(format!("{}_{}", scenario, field)))
}

fn scenario_target(analysis: &Value, scenario: &str) -> Option<f64> {
    ["price_target", "target_price", "value"]
        .iter()
        .find_map(|field| scenario_field(analysis, scenario, field).and_then(as_f64))
}

fn is_likely_failure(scenario: &Value) -> bool {
    let probability = scenario
        .get("probability")
        .or_else(|| scenario.get("likelihood"));

    match probability {
        Some(Value::String(label)) => {
            let label = label.trim().to_lowercase();
            if label == "high" || label == "very high" {
                return true;
            }
            as_f64(&Value::String(label))
                .map(normalize_probability)
                .is_some_and(|p| p >= LIKELY_FAILURE_PROBABILITY)
        }
        Some(value) => as_f64(value)
            .map(normalize_probability)
            .is_some_and(|p| p >= LIKELY_FAILURE_PROBABILITY),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_inputs_score_baseline() {
        let result = score(&ScoreInputs::default());
        assert_eq!(result.score, 50);
        assert_eq!(result.breakdown, ScoreBreakdown::default());
        assert_eq!(result.recommendation(), Recommendation::Hold);
    }

    #[test]
    fn test_conviction_bounds() {
        assert_eq!(conviction_adjustment(Some(Confidence::High)), 8);
        assert_eq!(conviction_adjustment(Some(Confidence::Low)), -5);
        assert_eq!(conviction_adjustment(Some(Confidence::Numeric(10.0))), 8);
        assert_eq!(conviction_adjustment(Some(Confidence::Numeric(0.0))), -8);
        assert_eq!(conviction_adjustment(Some(Confidence::Numeric(5.0))), 0);
        assert_eq!(conviction_adjustment(Some(Confidence::Numeric(f64::NAN))), 0);
    }

    #[test]
    fn test_skew() {
        assert_eq!(skew_adjustment(Some(0.6), Some(0.2)), 8);
        assert_eq!(skew_adjustment(Some(1.0), Some(0.0)), 10);
        assert_eq!(skew_adjustment(Some(0.0), Some(1.0)), -10);
        assert_eq!(skew_adjustment(Some(0.5), None), 0);
        // Out-of-range inputs are clamped, not rescaled
        assert_eq!(skew_adjustment(Some(3.0), Some(0.0)), 10);
    }

    #[test]
    fn test_asymmetry_tiers() {
        // upside 30, downside 10 -> ratio 3
        assert_eq!(asymmetry_adjustment(Some(100.0), Some(90.0), None, Some(130.0)), 12);
        // ratio 2
        assert_eq!(asymmetry_adjustment(Some(100.0), Some(90.0), None, Some(120.0)), 8);
        // ratio 1
        assert_eq!(asymmetry_adjustment(Some(100.0), Some(80.0), None, Some(120.0)), 0);
        // ratio 0.25
        assert_eq!(asymmetry_adjustment(Some(100.0), Some(60.0), None, Some(110.0)), -12);
        // base below price costs 3 more, floor at -15
        assert_eq!(
            asymmetry_adjustment(Some(100.0), Some(60.0), Some(95.0), Some(110.0)),
            -15
        );
        // no downside at all
        assert_eq!(asymmetry_adjustment(Some(100.0), Some(100.0), None, Some(110.0)), 12);
        // zero price is ignored
        assert_eq!(asymmetry_adjustment(Some(0.0), Some(1.0), None, Some(2.0)), 0);
    }

    #[test]
    fn test_risk_and_failures() {
        assert_eq!(risk_adjustment(Some(RiskRating::Low)), 5);
        assert_eq!(risk_adjustment(Some(RiskRating::VeryHigh)), -12);
        assert_eq!(failure_adjustment(Some(2)), -8);
        assert_eq!(failure_adjustment(Some(9)), -16);
        assert_eq!(RiskRating::parse("Very_High"), Some(RiskRating::VeryHigh));
        assert_eq!(RiskRating::parse("unclear"), None);
    }

    #[test]
    fn test_clamped_to_range() {
        let best = ScoreInputs {
            confidence: Some(Confidence::High),
            bull_probability: Some(1.0),
            bear_probability: Some(0.0),
            price: Some(10.0),
            bear_value: Some(9.0),
            base_value: Some(20.0),
            bull_value: Some(40.0),
            risk_rating: Some(RiskRating::Low),
            likely_failures: Some(0),
        };
        // 50 + 8 + 10 + 12 + 5
        assert_eq!(score(&best).score, 85);

        let worst = ScoreInputs {
            confidence: Some(Confidence::Numeric(0.0)),
            bull_probability: Some(0.0),
            bear_probability: Some(1.0),
            price: Some(10.0),
            bear_value: Some(1.0),
            base_value: Some(5.0),
            bull_value: Some(9.0),
            risk_rating: Some(RiskRating::VeryHigh),
            likely_failures: Some(6),
        };
        let result = score(&worst);
        assert_eq!(result.score, 10);
        assert_eq!(result.recommendation(), Recommendation::Avoid);
    }

    #[test]
    fn test_extraction_from_analyses() {
        let mut analyses = HashMap::new();
        analyses.insert(
            "variant_perception".to_string(),
            json!({"confidence": "High"}),
        );
        analyses.insert(
            "bull_bear_analysis".to_string(),
            json!({
                "bull_case": {"probability": 60, "price_target": "$150"},
                "base_case": {"price_target": 120},
                "bear_case": {"probability": "25%", "price_target": 80.0}
            }),
        );
        analyses.insert(
            "risk_assessment".to_string(),
            json!({"overall_risk_rating": "medium"}),
        );
        analyses.insert(
            "pre_mortem_analysis".to_string(),
            json!({"failure_scenarios": [
                {"scenario": "margin squeeze", "probability": 0.4},
                {"scenario": "fraud", "probability": 0.05},
                {"scenario": "competition", "likelihood": "high"}
            ]}),
        );

        let inputs = ScoreInputs::from_analyses(&analyses, Some(100.0));
        assert_eq!(inputs.confidence, Some(Confidence::High));
        assert_eq!(inputs.bull_probability, Some(0.6));
        assert_eq!(inputs.bear_probability, Some(0.25));
        assert_eq!(inputs.bull_value, Some(150.0));
        assert_eq!(inputs.base_value, Some(120.0));
        assert_eq!(inputs.bear_value, Some(80.0));
        assert_eq!(inputs.risk_rating, Some(RiskRating::Medium));
        assert_eq!(inputs.likely_failures, Some(2));

        // 50 + 8 (high) + 7 (0.35 * 20) + 8 (ratio 2.5) + 0 - 8
        assert_eq!(score(&inputs).score, 65);
    }

    #[test]
    fn test_extraction_tolerates_missing_and_raw() {
        let mut analyses = HashMap::new();
        analyses.insert("variant_perception".to_string(), json!({"thesis": "x"}));
        let inputs = ScoreInputs::from_analyses(&analyses, None);
        assert_eq!(inputs, ScoreInputs::default());
    }
}
