use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use rand::Rng;
use tokio::sync::Semaphore;
use tokio::task::{Id as TaskId, JoinSet};

use crate::config::{Config, ModelCatalog, ProviderConfig};
use crate::dispatch::registry::ProviderRegistry;
use crate::dispatch::{GenerateOptions, GenerationRequest, ProviderContext};
use crate::response::{ErrorKind, ErrorOptions, GenerationResult, RequestMeta, create_error_result};
use crate::security::{validate_image_params, validate_provider_config};

/// Upper bound on provider calls in flight for one fan-out.
pub const MAX_CONCURRENT_PROVIDERS: usize = 5;

/// Options for `generate_random_provider_image`. A bare `u64` is taken as the seed.
#[derive(Debug, Clone, Default)]
pub struct RandomOptions {
    pub seed: Option<u64>,
    pub options: GenerateOptions,
}

impl From<u64> for RandomOptions {
    fn from(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            options: GenerateOptions::default(),
        }
    }
}

impl From<GenerateOptions> for RandomOptions {
    fn from(options: GenerateOptions) -> Self {
        Self {
            seed: options.seed,
            options,
        }
    }
}

/// Entry point for callers: resolves a provider key through the catalog and
/// hands the request to the matching provider.
#[derive(Clone)]
pub struct ImageGenerator {
    catalog: Arc<dyn ModelCatalog>,
    registry: Arc<ProviderRegistry>,
}

impl ImageGenerator {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            catalog: registry.context().catalog.clone(),
            registry,
        }
    }

    pub fn from_config(config: Config) -> Self {
        let ctx = ProviderContext::from_config(config);
        Self::new(Arc::new(ProviderRegistry::with_defaults(ctx)))
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub async fn generate_provider_image(
        &self,
        provider_key: &str,
        prompt: &str,
        guidance: Option<f64>,
        user_id: Option<&str>,
        options: GenerateOptions,
    ) -> GenerationResult {
        let start = Instant::now();

        let validation = validate_image_params(prompt, guidance, provider_key, self.catalog.as_ref());
        if !validation.is_valid {
            return invalid_params(
                provider_key,
                "invalid image parameters",
                validation.errors.join("; "),
                start,
            );
        }

        let Some(config) = self.catalog.provider_config(provider_key) else {
            return invalid_params(
                provider_key,
                "invalid image parameters",
                format!("unknown provider key: {provider_key}"),
                start,
            );
        };
        let check = validate_provider_config(&config);
        if !check.valid {
            return invalid_params(
                provider_key,
                "invalid provider configuration",
                check.error.unwrap_or_default(),
                start,
            );
        }

        let provider_type = config.provider_type.clone().unwrap_or_default();
        let provider = match self.registry.create_provider(&provider_type) {
            Ok(p) => p,
            Err(e) => {
                return invalid_params(&provider_type, "unsupported provider type", e.to_string(), start);
            }
        };

        let request = build_request(&config, prompt, guidance, user_id, options);
        tracing::info!(
            provider_key,
            provider = %provider_type,
            model = request.model.as_deref().unwrap_or("default"),
            "dispatching image generation"
        );
        provider.generate_image(&request).await
    }

    /// One result per input key, in input order. Never fails as a whole.
    pub async fn generate_multiple_provider_images(
        &self,
        providers: &[String],
        prompt: &str,
        guidance: Option<f64>,
        user_id: Option<&str>,
        options: GenerateOptions,
    ) -> Vec<GenerationResult> {
        let started = Instant::now();
        // No gate needed when everything fits in one window.
        let gate = (providers.len() > MAX_CONCURRENT_PROVIDERS)
            .then(|| Arc::new(Semaphore::new(MAX_CONCURRENT_PROVIDERS)));

        let mut set = JoinSet::new();
        let mut task_index: HashMap<TaskId, usize> = HashMap::new();

        for (idx, key) in providers.iter().enumerate() {
            let this = self.clone();
            let key = key.clone();
            let prompt = prompt.to_string();
            let user_id = user_id.map(str::to_string);
            let options = options.clone();
            let gate = gate.clone();

            let handle = set.spawn(async move {
                let _permit = match gate {
                    Some(sem) => sem.acquire_owned().await.ok(),
                    None => None,
                };
                let result = this
                    .generate_provider_image(&key, &prompt, guidance, user_id.as_deref(), options)
                    .await;
                (idx, result)
            });
            task_index.insert(handle.id(), idx);
        }

        let mut results: Vec<Option<GenerationResult>> = providers.iter().map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, result)) => results[idx] = Some(result),
                Err(join_err) => {
                    tracing::error!("provider task failed: {join_err}");
                    if let Some(&idx) = task_index.get(&join_err.id()) {
                        results[idx] = Some(rejected(&providers[idx], &join_err.to_string(), started));
                    }
                }
            }
        }

        results
            .into_iter()
            .zip(providers)
            .map(|(result, key)| {
                result.unwrap_or_else(|| rejected(key, "provider task produced no result", started))
            })
            .collect()
    }

    /// Picks one key (`seed % len` when seeded, uniform otherwise) and generates with it.
    pub async fn generate_random_provider_image(
        &self,
        providers: &[String],
        prompt: &str,
        guidance: Option<f64>,
        user_id: Option<&str>,
        options: impl Into<RandomOptions>,
    ) -> GenerationResult {
        let RandomOptions { seed, options } = options.into();
        if providers.is_empty() {
            return invalid_params(
                "unknown",
                "no providers to choose from",
                "provider list is empty".to_string(),
                Instant::now(),
            );
        }

        let idx = pick_index(providers.len(), seed);
        let key = &providers[idx];
        tracing::debug!(selected = %key, index = idx, seeded = seed.is_some(), "random provider pick");
        self.generate_provider_image(key, prompt, guidance, user_id, options)
            .await
    }

    pub fn available_providers(&self) -> Vec<String> {
        self.catalog.valid_model_names()
    }

    pub fn provider_config(&self, key: &str) -> Option<ProviderConfig> {
        self.catalog.provider_config(key)
    }

    pub fn is_provider_available(&self, key: &str) -> bool {
        self.catalog.is_model_valid(key)
    }
}

fn pick_index(len: usize, seed: Option<u64>) -> usize {
    match seed {
        Some(s) => (s % len as u64) as usize,
        None => rand::thread_rng().gen_range(0..len),
    }
}

/// Per-call options win over catalog defaults; an explicit empty string still counts.
fn build_request(
    config: &ProviderConfig,
    prompt: &str,
    guidance: Option<f64>,
    user_id: Option<&str>,
    mut options: GenerateOptions,
) -> GenerationRequest {
    options.size = options.size.or_else(|| config.size.clone());
    options.quality = options.quality.or_else(|| config.quality.clone());
    options.url = options.url.or_else(|| config.url.clone());
    GenerationRequest {
        prompt: prompt.to_string(),
        guidance,
        model: config.model.clone(),
        user_id: user_id.map(str::to_string),
        options,
    }
}

fn invalid_params(provider: &str, message: &str, details: String, start: Instant) -> GenerationResult {
    create_error_result(
        ErrorKind::InvalidParams,
        message,
        ErrorOptions {
            details: Some(details),
            retryable: false,
            meta: Some(RequestMeta::new(provider).finish(start)),
        },
    )
}

fn rejected(provider: &str, reason: &str, started: Instant) -> GenerationResult {
    create_error_result(
        ErrorKind::Unknown,
        format!("{provider} generation failed unexpectedly"),
        ErrorOptions {
            details: Some(reason.to_string()),
            retryable: false,
            meta: Some(RequestMeta::new(provider).finish(started)),
        },
    )
}
