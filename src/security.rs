use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::config::{ModelCatalog, ProviderConfig};
use crate::error::ProviderError;

/// Ceiling for any image payload accepted from a provider.
pub const MAX_PAYLOAD_BYTES: usize = 20 * 1024 * 1024;

pub const DEFAULT_MAX_ERROR_LENGTH: usize = 500;

pub const MIN_REQUEST_GUIDANCE: f64 = 0.0;
pub const MAX_REQUEST_GUIDANCE: f64 = 20.0;

const SENSITIVE_HEADER_PATTERNS: &[&str] = &[
    "authorization",
    "api-key",
    "apikey",
    "x-dezgo-key",
    "token",
    "secret",
    "cookie",
    "password",
];

const REDACTED_BEARER: &str = "Bearer [REDACTED]";

pub fn validate_payload_size(data: &[u8]) -> Result<(), ProviderError> {
    if data.len() > MAX_PAYLOAD_BYTES {
        return Err(ProviderError::PayloadTooLarge {
            size: data.len(),
            limit: MAX_PAYLOAD_BYTES,
        });
    }
    Ok(())
}

/// Checks the decoded-size estimate (`len * 3 / 4`) without decoding.
pub fn validate_base64_size(encoded: &str) -> Result<(), ProviderError> {
    let estimated = encoded.len().saturating_mul(3) / 4;
    if estimated > MAX_PAYLOAD_BYTES {
        return Err(ProviderError::PayloadTooLarge {
            size: estimated,
            limit: MAX_PAYLOAD_BYTES,
        });
    }
    Ok(())
}

fn is_sensitive_header(name: &str) -> bool {
    let lower = name.to_lowercase();
    SENSITIVE_HEADER_PATTERNS.iter().any(|p| lower.contains(p))
}

fn looks_like_bearer(value: &str) -> bool {
    value
        .get(..7)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("bearer "))
}

/// Redact credentials on the error's captured request, in place.
/// Sensitive header names are removed; stray bearer values elsewhere are rewritten.
pub fn mask_sensitive_headers(err: &mut ProviderError) {
    let Some(snapshot) = err.request_snapshot_mut() else {
        return;
    };
    snapshot.headers.retain(|name, _| !is_sensitive_header(name));
    for value in snapshot.headers.values_mut() {
        if looks_like_bearer(value) {
            *value = REDACTED_BEARER.to_string();
        }
    }
}

pub fn truncate_error_message(message: &str, max_len: usize) -> String {
    let total = message.chars().count();
    if total <= max_len {
        return message.to_string();
    }
    let kept: String = message.chars().take(max_len).collect();
    format!("{kept}... [truncated {} chars]", total - max_len)
}

/// Bounded, log-safe rendering of a response body. Binary bodies are never dumped.
pub fn safe_error_data(content_type: Option<&str>, body: &[u8]) -> String {
    let binary_type = content_type.is_some_and(|ct| {
        let ct = ct.to_lowercase();
        ct.starts_with("image/") || ct.contains("octet-stream")
    });
    if body.is_empty() {
        return String::new();
    }
    if binary_type {
        return format!("[binary data: {} bytes]", body.len());
    }
    match std::str::from_utf8(body) {
        Ok(text) => truncate_error_message(text, DEFAULT_MAX_ERROR_LENGTH),
        Err(_) => format!("[binary data: {} bytes]", body.len()),
    }
}

/// Base64 for any binary representation the HTTP layer hands back.
pub fn bytes_to_base64(data: impl AsRef<[u8]>) -> String {
    STANDARD.encode(data.as_ref())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigValidation {
    pub valid: bool,
    pub error: Option<String>,
}

impl ConfigValidation {
    fn ok() -> Self {
        Self {
            valid: true,
            error: None,
        }
    }

    fn fail(msg: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(msg.into()),
        }
    }
}

fn blank(v: &Option<String>) -> bool {
    v.as_deref().is_none_or(|s| s.trim().is_empty())
}

pub fn validate_provider_config(config: &ProviderConfig) -> ConfigValidation {
    if blank(&config.provider_type) {
        return ConfigValidation::fail("provider config is missing required field: type");
    }
    let is_dezgo = config
        .provider_type
        .as_deref()
        .is_some_and(|t| t.eq_ignore_ascii_case("dezgo"));
    if is_dezgo {
        if blank(&config.url) {
            return ConfigValidation::fail("dezgo provider config requires url");
        }
        if blank(&config.model) {
            return ConfigValidation::fail("dezgo provider config requires model");
        }
    }
    ConfigValidation::ok()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

pub fn validate_image_params(
    prompt: &str,
    guidance: Option<f64>,
    provider_key: &str,
    catalog: &dyn ModelCatalog,
) -> ParamValidation {
    let mut errors = Vec::new();

    if prompt.trim().is_empty() {
        errors.push("prompt must be a non-empty string".to_string());
    }

    if let Some(g) = guidance
        && !(g.is_finite() && (MIN_REQUEST_GUIDANCE..=MAX_REQUEST_GUIDANCE).contains(&g))
    {
        errors.push(format!(
            "guidance must be between {MIN_REQUEST_GUIDANCE} and {MAX_REQUEST_GUIDANCE}, got {g}"
        ));
    }

    if provider_key.trim().is_empty() {
        errors.push("provider key is required".to_string());
    } else if catalog.provider_config(provider_key).is_none() {
        errors.push(format!("unknown provider key: {provider_key}"));
    }

    ParamValidation {
        is_valid: errors.is_empty(),
        errors,
    }
}
