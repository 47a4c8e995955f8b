use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::credentials::{ProviderType, assert_credentials};
use crate::dispatch::http::failure_result;
use crate::dispatch::{
    GenerationRequest, ImageProvider, ProviderContext, ProviderMetadata, catalog_models_or,
};
use crate::error::ProviderError;
use crate::response::{GenerationResult, RequestMeta, create_success_result};
use crate::retry::with_retry;
use crate::security::validate_base64_size;

pub const NAME: &str = "google";
pub const DEFAULT_MODEL: &str = "imagegeneration@006";
const KNOWN_MODELS: &[&str] = &[
    "imagegeneration@006",
    "imagen-3.0-generate-002",
    "imagen-3.0-fast-generate-001",
];
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const TOKEN_TIMEOUT: Duration = Duration::from_secs(30);

const SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Access tokens are minted for an hour.
pub const TOKEN_LIFETIME: Duration = Duration::from_secs(3600);
/// Cached tokens are dropped this long before they actually expire.
pub const TOKEN_SAFETY_WINDOW: Duration = Duration::from_secs(600);

/// Imagen's supported aspect ratios.
const ASPECT_RATIOS: &[(&str, f64)] = &[
    ("1:1", 1.0),
    ("4:3", 4.0 / 3.0),
    ("3:4", 3.0 / 4.0),
    ("16:9", 16.0 / 9.0),
    ("9:16", 9.0 / 16.0),
];

/// Phrases Vertex uses in 400 bodies for filtered prompts.
const GOOGLE_SAFETY_MARKERS: &[&str] = &[
    "safety",
    "content policy",
    "policy violation",
    "blocked",
    "responsible ai",
    "raifilteredreason",
    "filtered",
];

pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: SystemTime,
}

/// Single-slot OAuth token cache. The async mutex also serializes refreshes,
/// so concurrent callers on a cold cache trigger one token exchange.
pub struct TokenCache {
    slot: Mutex<Option<CachedToken>>,
    clock: Arc<dyn Clock>,
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl TokenCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            slot: Mutex::new(None),
            clock,
        }
    }

    /// A cached token that has not passed its cutoff.
    pub async fn get(&self) -> Option<String> {
        let slot = self.slot.lock().await;
        self.valid(&slot)
    }

    /// Stores `token` issued now with the given lifetime.
    pub async fn store(&self, token: impl Into<String>, lifetime: Duration) {
        let mut slot = self.slot.lock().await;
        *slot = Some(self.entry(token.into(), lifetime));
    }

    pub async fn clear(&self) {
        *self.slot.lock().await = None;
    }

    pub async fn get_or_refresh<F, Fut>(&self, refresh: F) -> Result<String, ProviderError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(String, Duration), ProviderError>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some(token) = self.valid(&slot) {
            return Ok(token);
        }
        let (token, lifetime) = refresh().await?;
        *slot = Some(self.entry(token.clone(), lifetime));
        Ok(token)
    }

    fn valid(&self, slot: &Option<CachedToken>) -> Option<String> {
        let cached = slot.as_ref()?;
        (self.clock.now() < cached.expires_at).then(|| cached.token.clone())
    }

    fn entry(&self, token: String, lifetime: Duration) -> CachedToken {
        let usable = lifetime.saturating_sub(TOKEN_SAFETY_WINDOW);
        CachedToken {
            token,
            expires_at: self.clock.now() + usable,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub token_uri: Option<String>,
}

impl ServiceAccountKey {
    pub fn from_json(json: &str) -> Result<Self, ProviderError> {
        serde_json::from_str(json)
            .map_err(|e| ProviderError::Auth(format!("invalid service account JSON: {e}")))
    }

    /// `GOOGLE_APPLICATION_CREDENTIALS` holds either the JSON itself or a path to it.
    pub async fn load(value: &str) -> Result<Self, ProviderError> {
        let trimmed = value.trim();
        if trimmed.starts_with('{') {
            return Self::from_json(trimmed);
        }
        let raw = tokio::fs::read_to_string(trimmed).await.map_err(|e| {
            ProviderError::Auth(format!("failed to read service account file {trimmed}: {e}"))
        })?;
        Self::from_json(&raw)
    }
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Prediction {
    bytes_base64_encoded: Option<String>,
    rai_filtered_reason: Option<String>,
}

enum Auth {
    Bearer(String),
    ApiKey(String),
}

/// Nearest supported ratio for a `WIDTHxHEIGHT` size. Unparseable sizes get `1:1`.
pub fn aspect_ratio_for(size: Option<&str>) -> &'static str {
    let parsed = size.and_then(|s| {
        let (w, h) = s.trim().to_lowercase().split_once('x').map(|(w, h)| {
            (w.trim().parse::<f64>(), h.trim().parse::<f64>())
        })?;
        match (w, h) {
            (Ok(w), Ok(h)) if w > 0.0 && h > 0.0 => Some(w / h),
            _ => None,
        }
    });
    let Some(ratio) = parsed else {
        return "1:1";
    };
    ASPECT_RATIOS
        .iter()
        .min_by(|a, b| (a.1 - ratio).abs().total_cmp(&(b.1 - ratio).abs()))
        .map(|(name, _)| *name)
        .unwrap_or("1:1")
}

fn wants_2k(quality: Option<&str>) -> bool {
    quality.is_some_and(|q| q.eq_ignore_ascii_case("hd") || q.eq_ignore_ascii_case("high"))
}

pub struct GoogleProvider {
    ctx: ProviderContext,
    tokens: Arc<TokenCache>,
}

impl GoogleProvider {
    pub fn new(ctx: &ProviderContext) -> Self {
        Self::with_token_cache(ctx, Arc::new(TokenCache::default()))
    }

    pub fn with_token_cache(ctx: &ProviderContext, tokens: Arc<TokenCache>) -> Self {
        Self {
            ctx: ctx.clone(),
            tokens,
        }
    }

    pub fn token_cache(&self) -> &Arc<TokenCache> {
        &self.tokens
    }

    fn endpoint(&self, project: &str, model: &str) -> String {
        format!(
            "{}/projects/{project}/locations/{}/publishers/google/models/{model}:predict",
            self.ctx.endpoints.google_vertex_base(),
            self.ctx.endpoints.google_location
        )
    }

    pub(crate) fn build_body(req: &GenerationRequest) -> serde_json::Value {
        let mut parameters = serde_json::json!({
            "sampleCount": 1,
            "aspectRatio": aspect_ratio_for(req.options.size.as_deref()),
        });
        if let Some(g) = req.guidance {
            parameters["guidanceScale"] = serde_json::json!(g);
        }
        if let Some(seed) = req.options.seed {
            parameters["seed"] = serde_json::json!(seed);
        }
        if let Some(neg) = &req.options.negative_prompt {
            parameters["negativePrompt"] = serde_json::json!(neg);
        }
        if wants_2k(req.options.quality.as_deref()) {
            parameters["sampleImageSize"] = serde_json::json!("2K");
        }
        serde_json::json!({
            "instances": [{ "prompt": req.prompt }],
            "parameters": parameters,
        })
    }

    async fn auth(&self, cancel: Option<&CancellationToken>) -> Result<Auth, ProviderError> {
        let creds = &self.ctx.credentials;
        if let Some(sa) = creds.google_application_credentials.as_deref() {
            let token = self
                .tokens
                .get_or_refresh(|| self.exchange_token(sa, cancel))
                .await?;
            return Ok(Auth::Bearer(token));
        }
        match creds.google_api_key.as_deref() {
            Some(key) => Ok(Auth::ApiKey(key.to_string())),
            None => Err(ProviderError::MissingCredentials(
                "google requires GOOGLE_APPLICATION_CREDENTIALS or GOOGLE_CLOUD_API_KEY"
                    .to_string(),
            )),
        }
    }

    /// JWT bearer grant: sign an RS256 assertion and trade it for an access token.
    async fn exchange_token(
        &self,
        credentials: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<(String, Duration), ProviderError> {
        let key = ServiceAccountKey::load(credentials).await?;
        let token_uri = key
            .token_uri
            .clone()
            .unwrap_or_else(|| self.ctx.endpoints.google_token_uri.clone());

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let claims = Claims {
            iss: &key.client_email,
            scope: SCOPE,
            aud: &token_uri,
            iat: now,
            exp: now + TOKEN_LIFETIME.as_secs(),
        };
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| ProviderError::Auth(format!("invalid service account private key: {e}")))?;
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &signing_key)
            .map_err(|e| ProviderError::Auth(format!("failed to sign token assertion: {e}")))?;

        let form = [("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())];
        let builder = self.ctx.http.inner().post(&token_uri).form(&form);
        let reply = self
            .ctx
            .http
            .execute(builder, TOKEN_TIMEOUT, cancel)
            .await
            .map_err(|e| match e {
                ProviderError::Http {
                    status, message, ..
                } => ProviderError::Auth(format!("token exchange failed ({status}): {message}")),
                other => other,
            })?;
        let parsed: TokenResponse = reply.json()?;

        tracing::debug!(client = %key.client_email, "obtained google access token");
        let lifetime = parsed
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(TOKEN_LIFETIME);
        Ok((parsed.access_token, lifetime))
    }

    async fn request_image(
        &self,
        url: &str,
        body: &serde_json::Value,
        timeout: Duration,
        cancel: Option<&CancellationToken>,
    ) -> Result<String, ProviderError> {
        let builder = self.ctx.http.inner().post(url).json(body);
        let auth = self.auth(cancel).await?;
        let bearer = matches!(auth, Auth::Bearer(_));
        let builder = match auth {
            Auth::Bearer(token) => builder.bearer_auth(token),
            Auth::ApiKey(key) => builder.query(&[("key", key)]),
        };
        let reply = match self.ctx.http.execute(builder, timeout, cancel).await {
            Ok(reply) => reply,
            Err(e) => {
                if bearer && matches!(e.status(), Some(401 | 403)) {
                    // Revoked or rotated token: fetch a fresh one next call.
                    tracing::warn!(status = ?e.status(), "google rejected cached access token");
                    self.tokens.clear().await;
                }
                return Err(e);
            }
        };
        let parsed: PredictResponse = reply.json()?;

        let Some(prediction) = parsed.predictions.into_iter().next() else {
            return Err(ProviderError::ContentPolicy(
                "Imagen returned no predictions; the prompt was likely filtered".to_string(),
            ));
        };
        if let Some(reason) = prediction.rai_filtered_reason {
            return Err(ProviderError::ContentPolicy(reason));
        }
        let b64 = prediction
            .bytes_base64_encoded
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ProviderError::InvalidResponse("no image bytes in Imagen prediction".to_string())
            })?;
        validate_base64_size(&b64)?;
        Ok(b64)
    }
}

#[async_trait]
impl ImageProvider for GoogleProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn generate_image(&self, req: &GenerationRequest) -> GenerationResult {
        let start = Instant::now();
        let model = req.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let project = self.ctx.credentials.google_project_id.clone().unwrap_or_default();
        let url = self.endpoint(&project, &model);
        let meta = RequestMeta::new(NAME).with_model(&model).with_endpoint(&url);

        if let Err(e) = assert_credentials(ProviderType::Google, &self.ctx.credentials) {
            return failure_result(NAME, e, GOOGLE_SAFETY_MARKERS, meta.finish(start));
        }

        let body = Self::build_body(req);
        let timeout = req.options.timeout.unwrap_or(REQUEST_TIMEOUT);
        let cancel = req.options.cancel.as_ref();
        let retry = match req.options.max_attempts {
            Some(n) => self.ctx.retry.clone().with_max_attempts(n),
            None => self.ctx.retry.clone(),
        };

        tracing::info!(
            request_id = %meta.request_id,
            model = %model,
            project = %project,
            "google imagen request"
        );
        let body = &body;
        let url_ref = url.as_str();
        let result = with_retry(
            |_attempt| async move { self.request_image(url_ref, body, timeout, cancel).await },
            &retry,
        )
        .await;

        match result {
            Ok(b64) => create_success_result(b64, meta.finish(start)),
            Err(e) => failure_result(NAME, e, GOOGLE_SAFETY_MARKERS, meta.finish(start)),
        }
    }

    async fn test_availability(&self, _model: Option<&str>) -> bool {
        assert_credentials(ProviderType::Google, &self.ctx.credentials).is_ok()
    }

    fn available_models(&self) -> Vec<String> {
        catalog_models_or(&self.ctx, NAME, KNOWN_MODELS)
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            name: NAME.to_string(),
            display_name: "Google Imagen (Vertex AI)".to_string(),
            models: self.available_models(),
            capabilities: vec![
                "text-to-image".to_string(),
                "aspect-ratio".to_string(),
                "guidance".to_string(),
                "seed".to_string(),
                "negative-prompt".to_string(),
            ],
            supports_cancellation: true,
        }
    }
}
