//! Artifact lifecycle helpers
//!
//! The persisted state machine lives in [`crate::db::artifacts`]. This module
//! holds what lanes need around it: the per-analysis result record, the
//! transition check, and monotonic progress reporting.

use anyhow::Result;
use sdk::errors::EngineError;
use sdk::types::{ArtifactContent, ArtifactStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

use crate::db::ArtifactRepository;

/// Outcome of one auxiliary sub-report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupportingAnalysis {
    pub name: String,
    /// Parsed output, or the raw text when parsing failed. `None` when the
    /// model call itself failed.
    pub result: Option<ArtifactContent>,
    pub success: bool,
    pub error: Option<String>,
    pub latency_ms: u64,
    /// The spend ceiling refused the call
    #[serde(default)]
    pub calls_disallowed: bool,
}

impl SupportingAnalysis {
    pub fn structured(&self) -> Option<&Value> {
        if self.success {
            self.result.as_ref().and_then(ArtifactContent::structured)
        } else {
            None
        }
    }
}

/// Analyses keyed by prompt id
pub type AnalysisMap = BTreeMap<String, SupportingAnalysis>;

/// Structured results only, for scoring and synthesis context.
pub fn structured_results(analyses: &AnalysisMap) -> HashMap<String, Value> {
    analyses
        .iter()
        .filter_map(|(name, analysis)| analysis.structured().map(|v| (name.clone(), v.clone())))
        .collect()
}

/// Reject edges the lifecycle does not allow.
pub fn check_transition(from: ArtifactStatus, to: ArtifactStatus) -> Result<(), EngineError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(EngineError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// Progress within `[start, end]` after `done` of `total` stages.
///
/// With no stages the span counts as finished.
pub fn apportion(start: u8, end: u8, done: usize, total: usize) -> u8 {
    let end = end.max(start);
    if total == 0 {
        return end;
    }
    let span = (end - start) as usize;
    start + (span * done.min(total) / total) as u8
}

/// Monotonic progress value
#[derive(Debug, Default, Clone, Copy)]
pub struct ProgressTracker {
    current: u8,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u8 {
        self.current
    }

    /// Move to `pct` if it is higher. Returns the new value when it moved.
    pub fn advance(&mut self, pct: u8) -> Option<u8> {
        let pct = pct.min(100);
        if pct > self.current {
            self.current = pct;
            Some(pct)
        } else {
            None
        }
    }
}

/// Writes progress for one artifact, never going backwards
///
/// Concurrent stages may report out of order; the lock serializes writes so
/// the stored value only grows.
pub struct ProgressReporter {
    repo: Arc<ArtifactRepository>,
    artifact_id: String,
    tracker: Mutex<ProgressTracker>,
}

impl ProgressReporter {
    pub fn new(repo: Arc<ArtifactRepository>, artifact_id: impl Into<String>) -> Self {
        Self {
            repo,
            artifact_id: artifact_id.into(),
            tracker: Mutex::new(ProgressTracker::new()),
        }
    }

    /// Persist `pct` if it advances progress. Storage errors are logged and
    /// swallowed: progress is informational.
    pub async fn advance(&self, pct: u8) {
        let mut tracker = self.tracker.lock().await;
        if let Some(next) = tracker.advance(pct) {
            if let Err(e) = self.repo.update_progress(&self.artifact_id, next).await {
                warn!(
                    "Failed to persist progress {} for artifact {}: {:#}",
                    next, self.artifact_id, e
                );
            }
        }
    }

    pub async fn current(&self) -> u8 {
        self.tracker.lock().await.current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apportion_even_split() {
        assert_eq!(apportion(20, 80, 0, 7), 20);
        assert_eq!(apportion(20, 80, 1, 6), 30);
        assert_eq!(apportion(20, 80, 3, 6), 50);
        assert_eq!(apportion(20, 80, 6, 6), 80);
        assert_eq!(apportion(20, 80, 9, 6), 80);
    }

    #[test]
    fn test_apportion_zero_stages() {
        assert_eq!(apportion(20, 80, 0, 0), 80);
    }

    #[test]
    fn test_tracker_never_decreases() {
        let mut tracker = ProgressTracker::new();
        assert_eq!(tracker.advance(20), Some(20));
        assert_eq!(tracker.advance(10), None);
        assert_eq!(tracker.advance(20), None);
        assert_eq!(tracker.advance(150), Some(100));
        assert_eq!(tracker.current(), 100);
    }

    #[test]
    fn test_transition_check() {
        assert!(check_transition(ArtifactStatus::Pending, ArtifactStatus::Generating).is_ok());
        let err = check_transition(ArtifactStatus::Pending, ArtifactStatus::Complete).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid artifact transition: pending -> complete"
        );
        assert!(check_transition(ArtifactStatus::Failed, ArtifactStatus::Generating).is_err());
    }

    #[test]
    fn test_structured_results_skip_failures() {
        let mut analyses = AnalysisMap::new();
        analyses.insert(
            "risk_assessment".to_string(),
            SupportingAnalysis {
                name: "risk_assessment".to_string(),
                result: Some(ArtifactContent::WellFormed(
                    serde_json::json!({"overall_risk_rating": "low"}),
                )),
                success: true,
                error: None,
                latency_ms: 12,
                calls_disallowed: false,
            },
        );
        analyses.insert(
            "exit_strategy".to_string(),
            SupportingAnalysis {
                name: "exit_strategy".to_string(),
                result: Some(ArtifactContent::Fallback {
                    raw: "sell eventually".to_string(),
                    parse_error: "no braces".to_string(),
                }),
                success: false,
                error: Some("no braces".to_string()),
                latency_ms: 9,
                calls_disallowed: false,
            },
        );

        let structured = structured_results(&analyses);
        assert_eq!(structured.len(), 1);
        assert!(structured.contains_key("risk_assessment"));
    }
}
