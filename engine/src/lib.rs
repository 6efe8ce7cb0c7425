//! ARC Engine Library
//!
//! Research pipeline engine: a DAG runner, four lane pipelines, a
//! supporting-prompt executor, a JSON recovery parser, conviction scoring
//! and a batch scheduler over SQLite-backed artifacts. Used by the `arc`
//! binary and the integration tests.

/// Artifact lifecycle helpers and progress reporting
pub mod artifacts;

/// Rolling model spend ceiling
pub mod budget;

/// CLI interface module
pub mod cli;

/// Configuration management module
pub mod config;

/// Dependency-ordered async graph runner
pub mod dag;

/// Market data collaborator
pub mod data;

/// Database persistence module
pub mod db;

/// Command handlers module
pub mod handlers;

/// Lane pipelines
pub mod lanes;

/// LLM provider abstraction layer
pub mod llm;

/// Prompt templates and the supporting-prompt executor
pub mod prompts;

/// Tolerant JSON extraction from model replies
pub mod recovery;

/// Conviction scoring
pub mod scoring;

/// Batch scheduler for pending artifacts
pub mod scheduler;

/// Secret management module
pub mod secrets;

/// Telemetry and Observability
pub mod telemetry;
