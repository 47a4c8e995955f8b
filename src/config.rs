use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::credentials::{Credentials, ProviderType, non_blank_env};
use crate::error::ProviderError;
use crate::retry::RetryOptions;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_GROK_API_URL: &str = "https://api.x.ai/v1/images/generations";
pub const DEFAULT_GOOGLE_LOCATION: &str = "us-central1";
pub const DEFAULT_GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Catalog file consulted when `IMAGEGEN_MODELS` is unset.
pub const DEFAULT_CATALOG_FILE: &str = "imagegen.toml";

/// One configured model/provider combination. Read-only input.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProviderConfig {
    #[serde(rename = "type")]
    pub provider_type: Option<String>,
    pub model: Option<String>,
    /// Vendor endpoint (Dezgo picks its request shape from it).
    pub url: Option<String>,
    pub size: Option<String>,
    pub quality: Option<String>,
}

impl ProviderConfig {
    pub fn new(provider_type: impl Into<String>) -> Self {
        Self {
            provider_type: Some(provider_type.into()),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_size(mut self, size: impl Into<String>) -> Self {
        self.size = Some(size.into());
        self
    }

    pub fn with_quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = Some(quality.into());
        self
    }

    /// Built-in provider family, if `type` names one.
    pub fn kind(&self) -> Option<ProviderType> {
        self.provider_type.as_deref()?.parse().ok()
    }
}

/// Lookup of provider keys to configurations. Caching and invalidation
/// belong to the implementation.
pub trait ModelCatalog: Send + Sync {
    fn provider_config(&self, key: &str) -> Option<ProviderConfig>;

    fn provider_keys(&self) -> Vec<String>;

    fn models_by_provider(&self, provider: &str) -> Vec<(String, ProviderConfig)> {
        let provider = provider.to_lowercase();
        let mut out: Vec<(String, ProviderConfig)> = self
            .provider_keys()
            .into_iter()
            .filter_map(|key| {
                let cfg = self.provider_config(&key)?;
                let matches = cfg
                    .provider_type
                    .as_deref()
                    .is_some_and(|t| t.to_lowercase() == provider);
                matches.then_some((key, cfg))
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    fn valid_model_names(&self) -> Vec<String> {
        let mut keys = self.provider_keys();
        keys.sort();
        keys
    }

    fn is_model_valid(&self, key: &str) -> bool {
        self.provider_config(key).is_some()
    }
}

#[derive(Debug, Deserialize, Default)]
struct CatalogFile {
    #[serde(default)]
    models: HashMap<String, ProviderConfig>,
}

/// In-memory catalog, optionally loaded from TOML:
///
/// ```toml
/// [models.dezgo-flux]
/// type = "dezgo"
/// url = "https://api.dezgo.com/text2image_flux"
/// model = "flux_1_schnell"
/// ```
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    models: HashMap<String, ProviderConfig>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, config: ProviderConfig) -> Self {
        self.insert(key, config);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, config: ProviderConfig) {
        self.models.insert(key.into(), config);
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ProviderError> {
        let file: CatalogFile = toml::from_str(s)
            .map_err(|e| ProviderError::Other(format!("invalid model catalog: {e}")))?;
        Ok(Self {
            models: file.models,
        })
    }

    pub fn from_path(path: &Path) -> Result<Self, ProviderError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ProviderError::Other(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }
}

impl ModelCatalog for StaticCatalog {
    fn provider_config(&self, key: &str) -> Option<ProviderConfig> {
        self.models.get(key).cloned()
    }

    fn provider_keys(&self) -> Vec<String> {
        self.models.keys().cloned().collect()
    }
}

/// Vendor base URLs. Overridable for proxies and tests.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub openai_base_url: String,
    pub grok_api_url: String,
    pub google_location: String,
    /// Defaults to the regional Vertex host for `google_location`.
    pub google_vertex_base_url: Option<String>,
    pub google_token_uri: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            grok_api_url: DEFAULT_GROK_API_URL.to_string(),
            google_location: DEFAULT_GOOGLE_LOCATION.to_string(),
            google_vertex_base_url: None,
            google_token_uri: DEFAULT_GOOGLE_TOKEN_URI.to_string(),
        }
    }
}

impl Endpoints {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            openai_base_url: non_blank_env("OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url),
            grok_api_url: non_blank_env("GROK_API_URL").unwrap_or(defaults.grok_api_url),
            google_location: non_blank_env("GOOGLE_CLOUD_LOCATION")
                .unwrap_or(defaults.google_location),
            google_vertex_base_url: non_blank_env("GOOGLE_VERTEX_BASE_URL"),
            google_token_uri: non_blank_env("GOOGLE_TOKEN_URI")
                .unwrap_or(defaults.google_token_uri),
        }
    }

    pub fn google_vertex_base(&self) -> String {
        match &self.google_vertex_base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://{}-aiplatform.googleapis.com/v1", self.google_location),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub credentials: Credentials,
    pub endpoints: Endpoints,
    pub catalog: StaticCatalog,
    pub retry: RetryOptions,
}

impl Config {
    /// Environment credentials plus the model catalog file.
    pub fn load() -> Self {
        let credentials = Credentials::from_env();
        let endpoints = Endpoints::from_env();

        for kind in ProviderType::ALL {
            if !credentials.has(kind) {
                tracing::warn!("{kind} credentials not set, {kind} models unavailable");
            }
        }

        let catalog = match catalog_path() {
            Some(path) => match StaticCatalog::from_path(&path) {
                Ok(catalog) => {
                    tracing::info!(
                        models = catalog.len(),
                        "loaded model catalog from {}",
                        path.display()
                    );
                    catalog
                }
                Err(e) => {
                    tracing::error!("{e}");
                    StaticCatalog::new()
                }
            },
            None => {
                tracing::warn!(
                    "no model catalog found (set IMAGEGEN_MODELS or create {DEFAULT_CATALOG_FILE})"
                );
                StaticCatalog::new()
            }
        };

        Config {
            credentials,
            endpoints,
            catalog,
            retry: RetryOptions::default(),
        }
    }
}

fn catalog_path() -> Option<PathBuf> {
    if let Some(p) = non_blank_env("IMAGEGEN_MODELS") {
        return Some(PathBuf::from(p));
    }
    let default = PathBuf::from(DEFAULT_CATALOG_FILE);
    default.exists().then_some(default)
}
