use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::multipart::Form;
use serde::Deserialize;

use crate::credentials::{ProviderType, assert_credentials};
use crate::dispatch::http::{HttpReply, SAFETY_MARKERS, failure_result};
use crate::dispatch::{GenerationRequest, ImageProvider, ProviderContext, ProviderMetadata};
use crate::error::ProviderError;
use crate::features::{
    compute_dezgo_guidance, generate_random_nine_digit_number, is_abyss_model, is_flux_model,
    is_redshift_model, is_sdxl_model,
};
use crate::response::{GenerationResult, RequestMeta, create_success_result};
use crate::retry::{RetryOptions, with_retry};
use crate::security::{bytes_to_base64, validate_base64_size};

pub const NAME: &str = "dezgo";
pub const DEFAULT_URL: &str = "https://api.dezgo.com/text2image";
const API_KEY_HEADER: &str = "X-Dezgo-Key";
const DEFAULT_SAMPLER: &str = "dpmpp_2m_karras";
const FLUX_STEPS: u32 = 4;

/// Slow families (redshift, abyss) get a longer timeout and one extra attempt.
const SLOW_MODEL_TIMEOUT: Duration = Duration::from_secs(180);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(90);
const SLOW_MODEL_ATTEMPTS: u32 = 3;
const DEFAULT_ATTEMPTS: u32 = 2;
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Dezgo occasionally answers with JSON instead of raw image bytes.
#[derive(Deserialize)]
struct JsonImage {
    image: Option<String>,
}

/// Fully resolved Dezgo call parameters.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DezgoParams {
    pub url: String,
    pub model: Option<String>,
    pub prompt: String,
    pub guidance: f64,
    pub seed: u64,
    pub width: u32,
    pub height: u32,
    pub steps: Option<u32>,
    pub negative_prompt: Option<String>,
}

impl DezgoParams {
    fn flux(&self) -> bool {
        is_flux_model(Some(&self.url))
    }

    fn form_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("prompt", self.prompt.clone()),
            ("guidance", format_guidance(self.guidance)),
            ("seed", self.seed.to_string()),
            ("width", self.width.to_string()),
            ("height", self.height.to_string()),
            ("sampler", DEFAULT_SAMPLER.to_string()),
        ];
        if let Some(model) = &self.model {
            fields.push(("model", model.clone()));
        }
        if let Some(steps) = self.steps {
            fields.push(("steps", steps.to_string()));
        }
        if let Some(neg) = &self.negative_prompt {
            fields.push(("negative_prompt", neg.clone()));
        }
        fields
    }

    /// Flux endpoints take multipart and have no guidance/sampler knobs.
    fn multipart(&self) -> Form {
        let mut form = Form::new()
            .text("prompt", self.prompt.clone())
            .text("seed", self.seed.to_string())
            .text("width", self.width.to_string())
            .text("height", self.height.to_string())
            .text("steps", self.steps.unwrap_or(FLUX_STEPS).to_string());
        if let Some(model) = &self.model {
            form = form.text("model", model.clone());
        }
        form
    }
}

fn format_guidance(g: f64) -> String {
    if g.fract() == 0.0 {
        format!("{}", g as i64)
    } else {
        format!("{g}")
    }
}

pub(crate) fn is_slow_model(model: Option<&str>) -> bool {
    is_redshift_model(model) || is_abyss_model(model)
}

fn default_dimension(url: &str) -> u32 {
    if is_flux_model(Some(url)) || is_sdxl_model(Some(url)) {
        1024
    } else {
        512
    }
}

pub struct DezgoProvider {
    ctx: ProviderContext,
}

impl DezgoProvider {
    pub fn new(ctx: &ProviderContext) -> Self {
        Self { ctx: ctx.clone() }
    }

    pub(crate) fn resolve_params(req: &GenerationRequest) -> DezgoParams {
        let url = req
            .options
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_URL.to_string());
        let model = req.model.clone();
        let guidance = compute_dezgo_guidance(Some(&url), model.as_deref(), req.guidance);
        let dim = default_dimension(&url);
        DezgoParams {
            guidance,
            seed: req
                .options
                .seed
                .unwrap_or_else(generate_random_nine_digit_number),
            width: req.options.width.unwrap_or(dim),
            height: req.options.height.unwrap_or(dim),
            steps: req.options.steps,
            negative_prompt: req.options.negative_prompt.clone(),
            prompt: req.prompt.clone(),
            model,
            url,
        }
    }

    fn retry_for(&self, req: &GenerationRequest) -> RetryOptions {
        let default = if is_slow_model(req.model.as_deref()) {
            SLOW_MODEL_ATTEMPTS
        } else {
            DEFAULT_ATTEMPTS
        };
        self.ctx
            .retry
            .clone()
            .with_max_attempts(req.options.max_attempts.unwrap_or(default))
    }

    fn timeout_for(req: &GenerationRequest) -> Duration {
        req.options.timeout.unwrap_or(if is_slow_model(req.model.as_deref()) {
            SLOW_MODEL_TIMEOUT
        } else {
            DEFAULT_TIMEOUT
        })
    }

    async fn request_image(
        &self,
        params: &DezgoParams,
        api_key: &str,
        timeout: Duration,
        cancel: Option<&tokio_util::sync::CancellationToken>,
    ) -> Result<String, ProviderError> {
        let builder = self
            .ctx
            .http
            .inner()
            .post(&params.url)
            .header(API_KEY_HEADER, api_key);
        // Multipart forms are single-use, so the body is rebuilt per attempt.
        let builder = if params.flux() {
            builder.multipart(params.multipart())
        } else {
            builder.form(&params.form_fields())
        };
        let reply = self.ctx.http.execute(builder, timeout, cancel).await?;
        extract_image(&reply)
    }

    /// Minimal single-attempt request to check that `model` is served.
    pub async fn test_model_availability(&self, model: &str) -> bool {
        let Some(api_key) = self.ready_key() else {
            return false;
        };

        let url = self
            .ctx
            .catalog
            .models_by_provider(NAME)
            .into_iter()
            .find(|(key, cfg)| key == model || cfg.model.as_deref() == Some(model))
            .and_then(|(_, cfg)| cfg.url)
            .unwrap_or_else(|| DEFAULT_URL.to_string());

        let params = DezgoParams {
            guidance: compute_dezgo_guidance(Some(&url), Some(model), None),
            seed: generate_random_nine_digit_number(),
            width: 512,
            height: 512,
            steps: Some(if is_flux_model(Some(&url)) { 1 } else { 10 }),
            negative_prompt: None,
            prompt: "test".to_string(),
            model: Some(model.to_string()),
            url,
        };

        match self.request_image(&params, &api_key, PROBE_TIMEOUT, None).await {
            Ok(_) => true,
            Err(mut e) => {
                crate::security::mask_sensitive_headers(&mut e);
                tracing::warn!(model, "dezgo model availability probe failed: {e}");
                false
            }
        }
    }

    fn ready_key(&self) -> Option<String> {
        assert_credentials(ProviderType::Dezgo, &self.ctx.credentials).ok()?;
        self.ctx.credentials.dezgo_api_key.clone()
    }
}

fn extract_image(reply: &HttpReply) -> Result<String, ProviderError> {
    if reply.body.is_empty() {
        return Err(ProviderError::InvalidResponse(
            "empty image body from Dezgo".to_string(),
        ));
    }
    let is_json = reply
        .content_type
        .as_deref()
        .is_some_and(|ct| ct.to_lowercase().contains("json"));
    let b64 = if is_json {
        let parsed: JsonImage = reply.json()?;
        parsed.image.filter(|s| !s.is_empty()).ok_or_else(|| {
            ProviderError::InvalidResponse("Dezgo JSON response has no image".to_string())
        })?
    } else {
        bytes_to_base64(&reply.body)
    };
    validate_base64_size(&b64)?;
    Ok(b64)
}

#[async_trait]
impl ImageProvider for DezgoProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn generate_image(&self, req: &GenerationRequest) -> GenerationResult {
        let start = Instant::now();
        let params = Self::resolve_params(req);
        let mut meta = RequestMeta::new(NAME).with_endpoint(&params.url);
        if let Some(model) = &params.model {
            meta = meta.with_model(model);
        }

        if let Err(e) = assert_credentials(ProviderType::Dezgo, &self.ctx.credentials) {
            return handle_dezgo_error(e, meta.finish(start));
        }
        let api_key = self.ctx.credentials.dezgo_api_key.as_deref().unwrap_or_default();

        let retry = self.retry_for(req);
        let timeout = Self::timeout_for(req);
        let cancel = req.options.cancel.as_ref();

        tracing::info!(
            request_id = %meta.request_id,
            url = %params.url,
            guidance = params.guidance,
            flux = params.flux(),
            max_attempts = retry.max_attempts,
            "dezgo image request"
        );

        let params = &params;
        let result = with_retry(
            |_attempt| async move { self.request_image(params, api_key, timeout, cancel).await },
            &retry,
        )
        .await;

        match result {
            Ok(b64) => create_success_result(b64, meta.finish(start)),
            Err(e) => handle_dezgo_error(e, meta.finish(start)),
        }
    }

    async fn test_availability(&self, model: Option<&str>) -> bool {
        match model {
            Some(m) => self.test_model_availability(m).await,
            None => self.ready_key().is_some(),
        }
    }

    /// Catalog keys configured for Dezgo.
    fn available_models(&self) -> Vec<String> {
        self.ctx
            .catalog
            .models_by_provider(NAME)
            .into_iter()
            .map(|(key, _)| key)
            .collect()
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            name: NAME.to_string(),
            display_name: "Dezgo".to_string(),
            models: self.available_models(),
            capabilities: vec![
                "text-to-image".to_string(),
                "guidance".to_string(),
                "seed".to_string(),
                "negative-prompt".to_string(),
            ],
            supports_cancellation: true,
        }
    }
}

fn handle_dezgo_error(err: ProviderError, meta: RequestMeta) -> GenerationResult {
    failure_result(NAME, err, SAFETY_MARKERS, meta)
}
