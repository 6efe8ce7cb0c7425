//! Telemetry and Observability
//!
//! Sets up `tracing-subscriber` for structured logging, and defines the
//! per-prompt call record the executor emits after every model call.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber with the given log level from config.
///
/// Priority: `RUST_LOG` env var > `log_level` parameter > default "info"
///
/// In debug builds: pretty-printed terminal output.
/// In release builds: JSON structured output with spans.
/// Both write to stderr; stdout carries command output.
pub fn init_telemetry_with_level(log_level: &str) {
    let default_filter = format!("{},arc_engine={}", log_level, log_level);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_filter));

    #[cfg(debug_assertions)]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }

    #[cfg(not(debug_assertions))]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_current_span(true).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}

/// One supporting-prompt invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub id: String,
    /// Prompt id
    pub name: String,
    pub success: bool,
    pub latency_ms: u64,
    pub confidence: Option<f64>,
    pub error: Option<String>,
}

/// Sink for call records
///
/// Callers fire and forget: an error here is logged and never reaches the
/// pipeline.
#[async_trait]
pub trait CallTelemetry: Send + Sync {
    async fn log_call(&self, record: &CallRecord) -> anyhow::Result<()>;
}
