//! Supporting-prompt executor
//!
//! Renders a template, calls the model and runs the reply through the
//! recovery parser. [`SupportingPromptExecutor::execute`] never fails: every
//! problem, including an unknown prompt id, comes back as an unsuccessful
//! [`SupportingAnalysis`]. [`SupportingPromptExecutor::synthesize`] is the
//! consolidating variant used for final documents, where a model failure must
//! propagate.

use sdk::errors::EngineError;
use sdk::types::ArtifactContent;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use super::{PromptContext, PromptRegistry, PromptTemplate};
use crate::artifacts::SupportingAnalysis;
use crate::llm::{CompletionRequest, LLMError, Message, ModelClient};
use crate::recovery::parse_json_recovering;
use crate::telemetry::{CallRecord, CallTelemetry};

pub struct SupportingPromptExecutor {
    model: Arc<dyn ModelClient>,
    registry: Arc<PromptRegistry>,
    telemetry: Option<Arc<dyn CallTelemetry>>,
}

/// What came back from one model call
enum CallOutcome {
    Parsed(Value),
    Unparsed { raw: String, parse_error: String },
    Failed(LLMError),
}

impl SupportingPromptExecutor {
    pub fn new(model: Arc<dyn ModelClient>, registry: Arc<PromptRegistry>) -> Self {
        Self {
            model,
            registry,
            telemetry: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn CallTelemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn registry(&self) -> &PromptRegistry {
        &self.registry
    }

    /// Run one supporting prompt.
    pub async fn execute(&self, prompt_id: &str, ctx: &PromptContext) -> SupportingAnalysis {
        let Some(template) = self.registry.get(prompt_id) else {
            let error = EngineError::UnknownPrompt(prompt_id.to_string()).to_string();
            warn!("{}", error);
            self.emit(prompt_id, false, 0, None, Some(error.clone()));
            return SupportingAnalysis {
                name: prompt_id.to_string(),
                result: None,
                success: false,
                error: Some(error),
                latency_ms: 0,
                calls_disallowed: false,
            };
        };

        let start = Instant::now();
        let outcome = self.call(template, ctx).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        let analysis = match outcome {
            CallOutcome::Parsed(data) => {
                let confidence = confidence_of(&data);
                self.emit(prompt_id, true, latency_ms, confidence, None);
                SupportingAnalysis {
                    name: prompt_id.to_string(),
                    result: Some(ArtifactContent::WellFormed(data)),
                    success: true,
                    error: None,
                    latency_ms,
                    calls_disallowed: false,
                }
            }
            CallOutcome::Unparsed { raw, parse_error } => {
                self.emit(prompt_id, false, latency_ms, None, Some(parse_error.clone()));
                SupportingAnalysis {
                    name: prompt_id.to_string(),
                    result: Some(ArtifactContent::Fallback {
                        raw,
                        parse_error: parse_error.clone(),
                    }),
                    success: false,
                    error: Some(parse_error),
                    latency_ms,
                    calls_disallowed: false,
                }
            }
            CallOutcome::Failed(err) => {
                let calls_disallowed = err.is_calls_disallowed();
                let error = EngineError::from(err).to_string();
                self.emit(prompt_id, false, latency_ms, None, Some(error.clone()));
                SupportingAnalysis {
                    name: prompt_id.to_string(),
                    result: None,
                    success: false,
                    error: Some(error),
                    latency_ms,
                    calls_disallowed,
                }
            }
        };

        debug!(
            "Prompt {} finished in {}ms (success: {})",
            prompt_id, analysis.latency_ms, analysis.success
        );
        analysis
    }

    /// Run a consolidating prompt.
    ///
    /// Model failures are errors. Unparseable output still succeeds as a raw
    /// fallback so the text is kept.
    pub async fn synthesize(
        &self,
        prompt_id: &str,
        ctx: &PromptContext,
    ) -> Result<ArtifactContent, EngineError> {
        let template = self
            .registry
            .get(prompt_id)
            .ok_or_else(|| EngineError::UnknownPrompt(prompt_id.to_string()))?;

        let start = Instant::now();
        let outcome = self.call(template, ctx).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        match outcome {
            CallOutcome::Parsed(data) => {
                self.emit(prompt_id, true, latency_ms, confidence_of(&data), None);
                Ok(ArtifactContent::WellFormed(data))
            }
            CallOutcome::Unparsed { raw, parse_error } => {
                warn!(
                    "Synthesis {} returned unparseable output; keeping raw text: {}",
                    prompt_id, parse_error
                );
                self.emit(prompt_id, false, latency_ms, None, Some(parse_error.clone()));
                Ok(ArtifactContent::Fallback { raw, parse_error })
            }
            CallOutcome::Failed(err) => {
                let err = EngineError::from(err);
                self.emit(prompt_id, false, latency_ms, None, Some(err.to_string()));
                Err(err)
            }
        }
    }

    async fn call(&self, template: &PromptTemplate, ctx: &PromptContext) -> CallOutcome {
        let request = CompletionRequest::new(
            vec![
                Message::system(template.system.clone()),
                Message::user(template.render(ctx)),
            ],
            template.temperature,
            template.max_tokens,
        )
        .with_provider(template.provider.clone());

        let completion = match self.model.complete(&request).await {
            Ok(c) => c,
            Err(e) => return CallOutcome::Failed(e),
        };

        let parsed = parse_json_recovering(&completion.content);
        match parsed.data {
            Some(data) if parsed.success => CallOutcome::Parsed(data),
            _ => CallOutcome::Unparsed {
                parse_error: parsed
                    .error
                    .unwrap_or_else(|| "no JSON object found".to_string()),
                raw: completion.content,
            },
        }
    }

    /// Fire-and-forget telemetry
    fn emit(
        &self,
        name: &str,
        success: bool,
        latency_ms: u64,
        confidence: Option<f64>,
        error: Option<String>,
    ) {
        let Some(telemetry) = self.telemetry.clone() else {
            return;
        };

        let record = CallRecord {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            success,
            latency_ms,
            confidence,
            error,
        };

        tokio::spawn(async move {
            if let Err(e) = telemetry.log_call(&record).await {
                warn!("Failed to log prompt call {}: {:#}", record.name, e);
            }
        });
    }
}

/// Numeric `confidence` reported by the model, if any
fn confidence_of(data: &Value) -> Option<f64> {
    data.get("confidence").and_then(Value::as_f64)
}
