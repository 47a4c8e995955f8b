pub mod dezgo;
pub mod google;
pub mod grok;
pub mod http;
pub mod openai;
pub mod registry;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, Endpoints, ModelCatalog};
use crate::credentials::Credentials;
use crate::dispatch::http::HttpClient;
use crate::response::GenerationResult;
use crate::retry::RetryOptions;

/// Per-call knobs. Providers ignore fields they have no use for.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// `WIDTHxHEIGHT`, consumed by OpenAI and Google.
    pub size: Option<String>,
    /// Consumed by OpenAI and Google.
    pub quality: Option<String>,
    /// Vendor endpoint override (Dezgo model URL).
    pub url: Option<String>,
    pub seed: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub negative_prompt: Option<String>,
    pub steps: Option<u32>,
    /// Caller cancellation. Threaded into the HTTP call by Dezgo and Google;
    /// advisory only for OpenAI and Grok.
    pub cancel: Option<CancellationToken>,
    /// Per-call override of the provider's request timeout.
    pub timeout: Option<Duration>,
    /// Per-call override of the provider's retry budget.
    pub max_attempts: Option<u32>,
}

/// Internal request type accepted by every provider.
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub prompt: String,
    pub guidance: Option<f64>,
    pub model: Option<String>,
    pub user_id: Option<String>,
    pub options: GenerateOptions,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_guidance(mut self, guidance: f64) -> Self {
        self.guidance = Some(guidance);
        self
    }

    pub fn with_options(mut self, options: GenerateOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProviderMetadata {
    pub name: String,
    pub display_name: String,
    pub models: Vec<String>,
    pub capabilities: Vec<String>,
    pub supports_cancellation: bool,
}

/// Shared dependencies, resolved once and handed to every provider.
#[derive(Clone)]
pub struct ProviderContext {
    pub credentials: Arc<Credentials>,
    pub catalog: Arc<dyn ModelCatalog>,
    pub http: HttpClient,
    pub retry: RetryOptions,
    pub endpoints: Arc<Endpoints>,
}

impl ProviderContext {
    pub fn from_config(config: Config) -> Self {
        Self {
            credentials: Arc::new(config.credentials),
            catalog: Arc::new(config.catalog),
            http: HttpClient::new(),
            retry: config.retry,
            endpoints: Arc::new(config.endpoints),
        }
    }
}

#[async_trait]
pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Never fails: every outcome is folded into the result envelope.
    async fn generate_image(&self, req: &GenerationRequest) -> GenerationResult;

    async fn test_availability(&self, model: Option<&str>) -> bool;

    fn available_models(&self) -> Vec<String>;

    fn metadata(&self) -> ProviderMetadata;
}

/// Catalog models of this provider type, or the vendor's known models when
/// the catalog has none.
pub(crate) fn catalog_models_or(
    ctx: &ProviderContext,
    provider: &str,
    fallback: &[&str],
) -> Vec<String> {
    let mut models: Vec<String> = ctx
        .catalog
        .models_by_provider(provider)
        .into_iter()
        .filter_map(|(_, cfg)| cfg.model)
        .collect();
    if models.is_empty() {
        models = fallback.iter().map(|m| m.to_string()).collect();
    }
    models.sort();
    models.dedup();
    models
}
