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

pub const NAME: &str = "grok";
pub const DEFAULT_MODEL: &str = "grok-2-image";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Deserialize)]
struct GrokResponse {
    #[serde(default)]
    data: Vec<GrokImage>,
}

#[derive(Deserialize)]
struct GrokImage {
    b64_json: Option<String>,
}

/// xAI image generation. Size and quality are not forwarded.
pub struct GrokProvider {
    ctx: ProviderContext,
}

impl GrokProvider {
    pub fn new(ctx: &ProviderContext) -> Self {
        Self { ctx: ctx.clone() }
    }

    async fn request_image(
        &self,
        api_key: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<String, ProviderError> {
        let builder = self
            .ctx
            .http
            .inner()
            .post(&self.ctx.endpoints.grok_api_url)
            .bearer_auth(api_key)
            .json(body);
        let reply = self.ctx.http.execute(builder, timeout, None).await?;
        let parsed: GrokResponse = reply.json()?;
        let b64 = parsed
            .data
            .into_iter()
            .find_map(|img| img.b64_json.filter(|s| !s.is_empty()))
            .ok_or_else(|| ProviderError::InvalidResponse("no image in Grok response".into()))?;
        validate_base64_size(&b64)?;
        Ok(b64)
    }
}

#[async_trait]
impl ImageProvider for GrokProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn generate_image(&self, req: &GenerationRequest) -> GenerationResult {
        let start = Instant::now();
        let model = req.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let meta = RequestMeta::new(NAME)
            .with_model(&model)
            .with_endpoint(&self.ctx.endpoints.grok_api_url);

        if let Err(e) = assert_credentials(ProviderType::Grok, &self.ctx.credentials) {
            return failure_result(NAME, e, SAFETY_MARKERS, meta.finish(start));
        }
        let api_key = self.ctx.credentials.grok_api_key.as_deref().unwrap_or_default();

        let body = serde_json::json!({
            "model": model,
            "prompt": req.prompt,
            "n": 1,
            "response_format": "b64_json",
        });
        let timeout = req.options.timeout.unwrap_or(REQUEST_TIMEOUT);
        let retry = match req.options.max_attempts {
            Some(n) => self.ctx.retry.clone().with_max_attempts(n),
            None => self.ctx.retry.clone(),
        };

        tracing::info!(request_id = %meta.request_id, model = %model, "grok image request");
        let body = &body;
        let result = with_retry(
            |_attempt| async move { self.request_image(api_key, body, timeout).await },
            &retry,
        )
        .await;

        match result {
            Ok(b64) => create_success_result(b64, meta.finish(start)),
            Err(e) => failure_result(NAME, e, SAFETY_MARKERS, meta.finish(start)),
        }
    }

    async fn test_availability(&self, _model: Option<&str>) -> bool {
        assert_credentials(ProviderType::Grok, &self.ctx.credentials).is_ok()
    }

    fn available_models(&self) -> Vec<String> {
        catalog_models_or(&self.ctx, NAME, &[DEFAULT_MODEL])
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            name: NAME.to_string(),
            display_name: "xAI Grok".to_string(),
            models: self.available_models(),
            capabilities: vec!["text-to-image".to_string()],
            supports_cancellation: false,
        }
    }
}
