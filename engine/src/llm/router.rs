//! LLM Router
//!
//! Chooses which provider answers a request and fails over to the next one
//! when a provider errors or times out. Ranking prefers the provider the
//! request asks for, then the configured default provider, then cloud
//! providers for very large prompts, then the cheaper provider.
//!
//! When a [`BudgetLimiter`] is attached, the router checks the spend ceiling
//! before every call and records the estimated cost after every success.

use super::{Completion, CompletionRequest, LLMError, LLMProvider, ModelClient};
use crate::budget::BudgetLimiter;
use crate::config::LLMConfig;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Prompts above this size favour providers with larger context windows
const LARGE_PROMPT_TOKENS: usize = 4000;

pub struct LLMRouter {
    providers: Vec<Box<dyn LLMProvider>>,
    config: Arc<LLMConfig>,
    budget: Option<Arc<BudgetLimiter>>,
    local_timeout: Duration,
    cloud_timeout: Duration,
}

impl LLMRouter {
    pub fn new(providers: Vec<Box<dyn LLMProvider>>, config: Arc<LLMConfig>) -> Self {
        Self {
            providers,
            config,
            budget: None,
            // Local models need time to load before generating
            local_timeout: Duration::from_secs(120),
            cloud_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_budget(mut self, budget: Arc<BudgetLimiter>) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn with_timeouts(mut self, local: Duration, cloud: Duration) -> Self {
        self.local_timeout = local;
        self.cloud_timeout = cloud;
        self
    }

    /// Rank providers for a prompt of `estimated_tokens` tokens, best first.
    /// A `preferred` provider that is registered always ranks first.
    pub fn rank_providers(
        &self,
        estimated_tokens: usize,
        preferred: Option<&str>,
    ) -> Vec<&dyn LLMProvider> {
        let mut providers: Vec<&dyn LLMProvider> =
            self.providers.iter().map(|b| b.as_ref()).collect();

        let default_provider = &self.config.default_provider;
        let score = |p: &dyn LLMProvider| {
            let mut score = 0.0_f64;
            if preferred == Some(p.name()) {
                score += 1000.0;
            }
            if p.name() == default_provider {
                score += 200.0;
            }
            if estimated_tokens > LARGE_PROMPT_TOKENS && !p.is_local() {
                score += 50.0;
            }
            score - p.estimated_cost(estimated_tokens) * 1000.0
        };

        providers.sort_by(|a, b| {
            score(*b)
                .partial_cmp(&score(*a))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        providers
    }

    async fn ensure_budget(&self) -> super::Result<()> {
        let Some(budget) = &self.budget else {
            return Ok(());
        };

        let status = budget
            .status()
            .await
            .map_err(|e| LLMError::Unknown(format!("budget check failed: {:#}", e)))?;

        if status.allows_calls() {
            Ok(())
        } else {
            Err(LLMError::CallsDisallowed {
                spent: status.spent,
                ceiling: status.ceiling,
            })
        }
    }

    /// Check the health of all registered providers
    pub async fn check_health(&self) -> Vec<(&str, bool)> {
        let mut results = Vec::new();
        for provider in &self.providers {
            let is_healthy = provider.check_health().await;
            results.push((provider.name(), is_healthy));
        }
        results
    }
}

#[async_trait]
impl ModelClient for LLMRouter {
    async fn complete(&self, request: &CompletionRequest) -> super::Result<Completion> {
        if self.providers.is_empty() {
            return Err(LLMError::ProviderUnavailable(
                "No LLM providers configured".to_string(),
            ));
        }

        self.ensure_budget().await?;

        let prompt_tokens = request.estimated_tokens();

        for provider in self.rank_providers(prompt_tokens, request.provider.as_deref()) {
            let timeout = if provider.is_local() {
                self.local_timeout
            } else {
                self.cloud_timeout
            };
            tracing::debug!(
                "Attempting provider: {} (timeout: {:?})",
                provider.name(),
                timeout
            );

            match tokio::time::timeout(timeout, provider.complete(request)).await {
                Ok(Ok(content)) => {
                    tracing::info!("Provider {} succeeded", provider.name());

                    if let Some(budget) = &self.budget {
                        let tokens = prompt_tokens + content.len() / 4;
                        let cost = provider.estimated_cost(tokens);
                        if let Err(e) = budget.record_spend(provider.name(), tokens, cost).await {
                            tracing::warn!("Failed to record model spend: {:#}", e);
                        }
                    }

                    return Ok(Completion {
                        content,
                        provider: provider.name().to_string(),
                    });
                }
                Ok(Err(e)) => {
                    tracing::warn!("Provider {} failed: {}", provider.name(), e);
                }
                Err(_) => {
                    tracing::warn!("Provider {} timed out after {:?}", provider.name(), timeout);
                }
            }
        }

        tracing::error!("All LLM providers exhausted");
        Err(LLMError::ProviderUnavailable(
            "All LLM providers failed".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Message;

    struct MockProvider {
        name: String,
        is_local: bool,
        cost_per_1k: f64,
        reply: Option<String>,
    }

    impl MockProvider {
        fn new(name: &str, is_local: bool, cost_per_1k: f64) -> Self {
            Self {
                name: name.to_string(),
                is_local,
                cost_per_1k,
                reply: None,
            }
        }

        fn replying(mut self, reply: &str) -> Self {
            self.reply = Some(reply.to_string());
            self
        }
    }

    #[async_trait]
    impl LLMProvider for MockProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn is_local(&self) -> bool {
            self.is_local
        }

        fn estimated_cost(&self, tokens: usize) -> f64 {
            (tokens as f64 / 1000.0) * self.cost_per_1k
        }

        async fn complete(&self, _request: &CompletionRequest) -> crate::llm::Result<String> {
            self.reply
                .clone()
                .ok_or_else(|| LLMError::ProviderUnavailable(format!("{} is down", self.name)))
        }
    }

    fn create_test_config(default_provider: &str) -> Arc<LLMConfig> {
        Arc::new(LLMConfig {
            default_provider: default_provider.to_string(),
            temperature: 0.3,
            max_tokens: 1024,
            ollama: Default::default(),
            openai: Default::default(),
        })
    }

    fn request() -> CompletionRequest {
        CompletionRequest::new(vec![Message::user("Assess ACME")], 0.2, 256)
    }

    #[test]
    fn test_default_provider_ranks_first() {
        let providers: Vec<Box<dyn LLMProvider>> = vec![
            Box::new(MockProvider::new("ollama", true, 0.0)),
            Box::new(MockProvider::new("openai", false, 0.002)),
        ];
        let router = LLMRouter::new(providers, create_test_config("openai"));

        let ranked = router.rank_providers(1000, None);
        assert_eq!(ranked[0].name(), "openai");
    }

    #[test]
    fn test_rank_providers_consider_cost() {
        let providers: Vec<Box<dyn LLMProvider>> = vec![
            Box::new(MockProvider::new("expensive", false, 0.010)),
            Box::new(MockProvider::new("cheap", false, 0.001)),
            Box::new(MockProvider::new("medium", false, 0.005)),
        ];
        let router = LLMRouter::new(providers, create_test_config("ollama"));

        let ranked = router.rank_providers(1000, None);
        assert_eq!(ranked[0].name(), "cheap");
        assert_eq!(ranked[1].name(), "medium");
        assert_eq!(ranked[2].name(), "expensive");
    }

    #[test]
    fn test_large_prompt_prefers_cloud() {
        let providers: Vec<Box<dyn LLMProvider>> = vec![
            Box::new(MockProvider::new("local", true, 0.0)),
            Box::new(MockProvider::new("cloud", false, 0.002)),
        ];
        let router = LLMRouter::new(providers, create_test_config("ollama"));

        assert_eq!(router.rank_providers(500, None)[0].name(), "local");
        assert_eq!(router.rank_providers(8000, None)[0].name(), "cloud");
    }

    #[test]
    fn test_requested_provider_beats_default_and_cost() {
        let providers: Vec<Box<dyn LLMProvider>> = vec![
            Box::new(MockProvider::new("ollama", true, 0.0)),
            Box::new(MockProvider::new("openai", false, 0.002)),
        ];
        let router = LLMRouter::new(providers, create_test_config("ollama"));

        assert_eq!(router.rank_providers(1000, None)[0].name(), "ollama");
        assert_eq!(router.rank_providers(1000, Some("openai"))[0].name(), "openai");
        // An unregistered preference leaves the normal order alone
        assert_eq!(router.rank_providers(1000, Some("gemini"))[0].name(), "ollama");
    }

    #[tokio::test]
    async fn test_requested_provider_answers_first() {
        let providers: Vec<Box<dyn LLMProvider>> = vec![
            Box::new(MockProvider::new("ollama", true, 0.0).replying("{\"from\": \"ollama\"}")),
            Box::new(MockProvider::new("openai", false, 0.002).replying("{\"from\": \"openai\"}")),
        ];
        let router = LLMRouter::new(providers, create_test_config("ollama"));

        let completion = router
            .complete(&request().with_provider(Some("openai".to_string())))
            .await
            .unwrap();
        assert_eq!(completion.provider, "openai");

        let completion = router.complete(&request()).await.unwrap();
        assert_eq!(completion.provider, "ollama");
    }

    #[tokio::test]
    async fn test_failover_to_next_provider() {
        let providers: Vec<Box<dyn LLMProvider>> = vec![
            Box::new(MockProvider::new("ollama", true, 0.0)),
            Box::new(MockProvider::new("openai", false, 0.002).replying("{}")),
        ];
        let router = LLMRouter::new(providers, create_test_config("ollama"));

        let completion = router.complete(&request()).await.unwrap();
        assert_eq!(completion.provider, "openai");
        assert_eq!(completion.content, "{}");
    }

    #[tokio::test]
    async fn test_all_providers_exhausted() {
        let providers: Vec<Box<dyn LLMProvider>> =
            vec![Box::new(MockProvider::new("ollama", true, 0.0))];
        let router = LLMRouter::new(providers, create_test_config("ollama"));

        let err = router.complete(&request()).await.unwrap_err();
        assert!(matches!(err, LLMError::ProviderUnavailable(_)));
    }

    #[tokio::test]
    async fn test_no_providers() {
        let router = LLMRouter::new(vec![], create_test_config("ollama"));
        assert!(router.complete(&request()).await.is_err());
    }
}
