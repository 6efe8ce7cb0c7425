//! Error types and handling
//!
//! This module provides the error taxonomy used throughout the ARC engine.
//! All errors implement the `ArcErrorExt` trait which provides user-friendly
//! hints and indicates whether errors are recoverable.
//!
//! # Error Categories
//!
//! - **Graph validation**: malformed dependency graphs, fatal at construction
//! - **Node execution**: timeouts and failures inside a graph run
//! - **Parsing**: model output that survived no recovery strategy
//! - **External calls**: model, data and persistence collaborators
//! - **Budget**: model calls refused by the spend ceiling
//! - **Lifecycle**: illegal artifact state transitions
//!
//! # Examples
//!
//! ```
//! use sdk::errors::{ArcErrorExt, EngineError};
//!
//! let error = EngineError::DagCycle(vec!["a".into(), "b".into(), "a".into()]);
//! assert_eq!(error.to_string(), "Dependency cycle detected: a -> b -> a");
//! assert!(!error.is_recoverable());
//!
//! let budget = EngineError::BudgetExceeded { spent: 12.5, ceiling: 10.0 };
//! assert!(budget.is_budget_refusal());
//! ```

use thiserror::Error;

/// Trait for ARC error extensions
///
/// Provides additional context for errors: a hint that is safe to show to an
/// operator, and whether retrying the same operation later can succeed.
pub trait ArcErrorExt {
    /// Returns a user-friendly hint for the error
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be retried or worked around. Non-recoverable
    /// errors need a code or configuration change.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(String),

    // Graph validation errors
    #[error("Dependency cycle detected: {}", .0.join(" -> "))]
    DagCycle(Vec<String>),

    #[error("Node '{node}' depends on unknown node '{dependency}'")]
    DagUnknownDependency { node: String, dependency: String },

    #[error("Duplicate node id: {0}")]
    DagDuplicateNode(String),

    // Node execution errors
    #[error("Node '{node}' timed out after {timeout_ms}ms")]
    NodeTimeout { node: String, timeout_ms: u64 },

    #[error("Node '{node}' failed: {message}")]
    NodeExecution { node: String, message: String },

    #[error("Node '{node}' skipped: dependency '{dependency}' failed")]
    DependencyFailed { node: String, dependency: String },

    #[error("Run deadline of {timeout_ms}ms reached before node '{node}' finished")]
    RunDeadline { node: String, timeout_ms: u64 },

    // Parsing errors
    #[error("Could not recover JSON ({stage}): {message}")]
    ParseRecovery { stage: String, message: String },

    // External collaborator errors
    #[error("External call failed: {0}")]
    ExternalCall(String),

    #[error("Model calls disallowed: spent ${spent:.2} of ${ceiling:.2} budget")]
    BudgetExceeded { spent: f64, ceiling: f64 },

    // Lifecycle errors
    #[error("Invalid artifact transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("Upstream reference not found: {0}")]
    UpstreamNotFound(String),

    #[error("Lane '{lane}' exceeded its {timeout_secs}s run timeout")]
    LaneTimeout { lane: String, timeout_secs: u64 },

    #[error("Unknown prompt: {0}")]
    UnknownPrompt(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// True when the error is the spend ceiling refusing further model calls.
    pub fn is_budget_refusal(&self) -> bool {
        matches!(self, Self::BudgetExceeded { .. })
    }

    /// True for the three graph validation variants.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::DagCycle(_) | Self::DagUnknownDependency { .. } | Self::DagDuplicateNode(_)
        )
    }
}

impl ArcErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",
            Self::Database(_) => "Database operation failed. Check the data directory",

            Self::DagCycle(_) => "Pipeline graph contains a cycle. Fix the node dependencies",
            Self::DagUnknownDependency { .. } => "Pipeline graph references an undeclared node",
            Self::DagDuplicateNode(_) => "Pipeline graph declares the same node twice",

            Self::NodeTimeout { .. } => "A pipeline stage took too long. It may succeed on rerun",
            Self::NodeExecution { .. } => "A pipeline stage failed. Check the run record",
            Self::DependencyFailed { .. } => "Skipped because an earlier stage failed",
            Self::RunDeadline { .. } => "The run hit its overall deadline",

            Self::ParseRecovery { .. } => "Model output was not valid JSON. Raw text was kept",

            Self::ExternalCall(_) => "An external service failed. Check provider availability",
            Self::BudgetExceeded { .. } => "Model spend ceiling reached. Retry after the window resets",

            Self::InvalidTransition { .. } => "Artifact is not in a state that allows this action",
            Self::ArtifactNotFound(_) => "No artifact with that id",
            Self::UpstreamNotFound(_) => "The research document or idea is missing",
            Self::LaneTimeout { .. } => "The lane run took too long and was stopped",
            Self::UnknownPrompt(_) => "No prompt template registered under that id",

            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::DagCycle(_)
            | Self::DagUnknownDependency { .. }
            | Self::DagDuplicateNode(_)
            | Self::InvalidTransition { .. }
            | Self::UnknownPrompt(_)
            | Self::Config(_) => false,

            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_names_path() {
        let err = EngineError::DagCycle(vec![
            "fetch".to_string(),
            "score".to_string(),
            "fetch".to_string(),
        ]);
        assert_eq!(err.to_string(), "Dependency cycle detected: fetch -> score -> fetch");
        assert!(err.is_validation());
    }

    #[test]
    fn test_unknown_dependency_message() {
        let err = EngineError::DagUnknownDependency {
            node: "memo".to_string(),
            dependency: "ghost".to_string(),
        };
        assert!(err.to_string().contains("ghost"));
        assert!(err.to_string().contains("memo"));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_budget_refusal_is_distinguishable() {
        let err = EngineError::BudgetExceeded {
            spent: 5.0,
            ceiling: 5.0,
        };
        assert!(err.is_budget_refusal());
        assert!(err.is_recoverable());
        assert!(!EngineError::ExternalCall("boom".into()).is_budget_refusal());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: EngineError = io.into();
        assert!(matches!(err, EngineError::Io(_)));
        assert_eq!(err.user_hint(), "File system operation failed");
    }
}
