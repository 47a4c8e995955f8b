use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;

use crate::credentials::{ProviderType, assert_credentials};
use crate::dispatch::http::{SAFETY_MARKERS, failure_result};
use crate::dispatch::{
    GenerationRequest, ImageProvider, ProviderContext, ProviderMetadata, catalog_models_or,
};
use crate::error::ProviderError;
use crate::response::{GenerationResult, RequestMeta, create_success_result};
use crate::retry::with_retry;
use crate::security::validate_base64_size;

pub const NAME: &str = "openai";
pub const DEFAULT_MODEL: &str = "dall-e-3";
pub const DEFAULT_SIZE: &str = "1024x1024";
pub const DEFAULT_QUALITY: &str = "standard";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const KNOWN_MODELS: &[&str] = &["dall-e-3", "dall-e-2", "gpt-image-1"];

#[derive(Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageDatum>,
}

#[derive(Deserialize)]
struct ImageDatum {
    b64_json: Option<String>,
}

/// OpenAI Images API.
///
/// Caller cancellation is not threaded into this call: the vendor request
/// runs to completion (or timeout) once started.
pub struct OpenAiProvider {
    ctx: ProviderContext,
}

impl OpenAiProvider {
    pub fn new(ctx: &ProviderContext) -> Self {
        Self { ctx: ctx.clone() }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/images/generations",
            self.ctx.endpoints.openai_base_url.trim_end_matches('/')
        )
    }

    fn build_body(&self, req: &GenerationRequest, model: &str) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": model,
            "prompt": req.prompt,
            "n": 1,
            "size": req.options.size.as_deref().unwrap_or(DEFAULT_SIZE),
            "quality": req.options.quality.as_deref().unwrap_or(DEFAULT_QUALITY),
        });
        // gpt-image models always return base64 and reject response_format.
        if !model.starts_with("gpt-image") {
            body["response_format"] = serde_json::json!("b64_json");
        }
        if let Some(user) = &req.user_id {
            body["user"] = serde_json::json!(user);
        }
        body
    }

    async fn request_image(
        &self,
        url: &str,
        api_key: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<String, ProviderError> {
        let builder = self
            .ctx
            .http
            .inner()
            .post(url)
            .bearer_auth(api_key)
            .json(body);
        let reply = self.ctx.http.execute(builder, timeout, None).await?;
        let parsed: ImagesResponse = reply.json()?;
        let b64 = parsed
            .data
            .into_iter()
            .next()
            .and_then(|d| d.b64_json)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ProviderError::InvalidResponse("no b64_json image in OpenAI response".to_string())
            })?;
        validate_base64_size(&b64)?;
        Ok(b64)
    }
}

#[async_trait]
impl ImageProvider for OpenAiProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn generate_image(&self, req: &GenerationRequest) -> GenerationResult {
        let start = Instant::now();
        let model = req.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let url = self.endpoint();
        let meta = RequestMeta::new(NAME).with_model(&model).with_endpoint(&url);

        if let Err(e) = assert_credentials(ProviderType::OpenAi, &self.ctx.credentials) {
            return handle_openai_error(e, meta.finish(start));
        }
        let api_key = self.ctx.credentials.openai_api_key.as_deref().unwrap_or_default();

        if req.options.cancel.is_some() {
            tracing::debug!(
                request_id = %meta.request_id,
                "openai image calls ignore cancellation once started"
            );
        }

        let body = self.build_body(req, &model);
        let timeout = req.options.timeout.unwrap_or(REQUEST_TIMEOUT);
        let retry = match req.options.max_attempts {
            Some(n) => self.ctx.retry.clone().with_max_attempts(n),
            None => self.ctx.retry.clone(),
        };

        tracing::info!(request_id = %meta.request_id, model = %model, "openai image request");
        let body = &body;
        let url_ref = url.as_str();
        let result = with_retry(
            |_attempt| async move { self.request_image(url_ref, api_key, body, timeout).await },
            &retry,
        )
        .await;

        match result {
            Ok(b64) => create_success_result(b64, meta.finish(start)),
            Err(e) => handle_openai_error(e, meta.finish(start)),
        }
    }

    async fn test_availability(&self, _model: Option<&str>) -> bool {
        assert_credentials(ProviderType::OpenAi, &self.ctx.credentials).is_ok()
    }

    fn available_models(&self) -> Vec<String> {
        catalog_models_or(&self.ctx, NAME, KNOWN_MODELS)
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            name: NAME.to_string(),
            display_name: "OpenAI (DALL-E)".to_string(),
            models: self.available_models(),
            capabilities: vec![
                "text-to-image".to_string(),
                "size".to_string(),
                "quality".to_string(),
            ],
            supports_cancellation: false,
        }
    }
}

/// `content_policy_violation` arrives as a 400 vendor code; the shared
/// safety markers catch it.
fn handle_openai_error(err: ProviderError, meta: RequestMeta) -> GenerationResult {
    failure_result(NAME, err, SAFETY_MARKERS, meta)
}
