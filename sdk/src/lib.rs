//! ARC SDK
//!
//! Shared error taxonomy and domain types for the ARC research pipeline.
//! This crate is used by the engine and by anything that reads its output.

/// Error types and handling
pub mod errors;

/// Shared domain types
pub mod types;

// Re-export commonly used types
pub use errors::{ArcErrorExt, EngineError};
pub use types::{
    ArtifactContent, ArtifactStatus, LaneKind, MacroSnapshot, QuantSnapshot, Recommendation,
    RunStatus,
};
