use serde::Serialize;

use crate::config::ProviderConfig;
use crate::dispatch::ProviderMetadata;

#[derive(Debug, Serialize)]
pub struct CatalogEntry {
    pub key: String,
    #[serde(rename = "type")]
    pub provider_type: Option<String>,
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
}

impl From<(String, ProviderConfig)> for CatalogEntry {
    fn from((key, cfg): (String, ProviderConfig)) -> Self {
        Self {
            key,
            provider_type: cfg.provider_type,
            model: cfg.model,
            size: cfg.size,
            quality: cfg.quality,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProviderStatus {
    #[serde(flatten)]
    pub metadata: ProviderMetadata,
    pub available: bool,
}

#[derive(Debug, Serialize)]
pub struct ListProvidersResponse {
    /// Keys accepted by the generate tools.
    pub models: Vec<CatalogEntry>,
    pub providers: Vec<ProviderStatus>,
}

impl ListProvidersResponse {
    pub fn to_markdown(&self) -> String {
        let mut out = String::from("## Provider keys\n\n");
        if self.models.is_empty() {
            out.push_str("_No catalog entries configured._\n");
        }
        for m in &self.models {
            out.push_str(&format!(
                "- `{}` ({}, model: {})\n",
                m.key,
                m.provider_type.as_deref().unwrap_or("?"),
                m.model.as_deref().unwrap_or("default")
            ));
        }
        out.push_str("\n## Providers\n\n");
        for p in &self.providers {
            let status = if p.available { "ready" } else { "missing credentials" };
            out.push_str(&format!(
                "- **{}** (`{}`): {status}; {}\n",
                p.metadata.display_name,
                p.metadata.name,
                p.metadata.capabilities.join(", ")
            ));
        }
        out
    }
}
