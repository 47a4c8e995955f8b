use std::time::Instant;

use rmcp::model::{CallToolResult, Content};
use serde::{Serialize, Serializer};

/// Provider-agnostic failure taxonomy surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    MissingCredentials,
    InvalidParams,
    AuthFailed,
    RateLimit,
    Timeout,
    NetworkError,
    ServerError,
    ContentPolicy,
    InvalidResponse,
    ProviderUnavailable,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingCredentials => "MISSING_CREDENTIALS",
            Self::InvalidParams => "INVALID_PARAMS",
            Self::AuthFailed => "AUTH_FAILED",
            Self::RateLimit => "RATE_LIMIT",
            Self::Timeout => "TIMEOUT",
            Self::NetworkError => "NETWORK_ERROR",
            Self::ServerError => "SERVER_ERROR",
            Self::ContentPolicy => "CONTENT_POLICY",
            Self::InvalidResponse => "INVALID_RESPONSE",
            Self::ProviderUnavailable => "PROVIDER_UNAVAILABLE",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Correlation data returned with every result. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMeta {
    pub request_id: String,
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub duration_ms: u64,
}

impl RequestMeta {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            request_id: generate_request_id(),
            provider: provider.into(),
            model: None,
            endpoint: None,
            duration_ms: 0,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Stamp elapsed wall-clock time since `start`.
    pub fn finish(mut self, start: Instant) -> Self {
        self.duration_ms = start.elapsed().as_millis() as u64;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationFailure {
    pub error: String,
    pub error_code: ErrorKind,
    pub details: Option<String>,
    /// Whether the caller may retry the same request later. Independent of
    /// whether the internal retry budget was already spent.
    pub retryable: bool,
    pub meta: RequestMeta,
}

/// Normalized outcome of a generation call. Exactly one variant per call.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationResult {
    /// `data` is the base64-encoded image.
    Success { data: String, meta: RequestMeta },
    Error(GenerationFailure),
}

impl GenerationResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn data(&self) -> Option<&str> {
        match self {
            Self::Success { data, .. } => Some(data),
            Self::Error(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&GenerationFailure> {
        match self {
            Self::Success { .. } => None,
            Self::Error(f) => Some(f),
        }
    }

    pub fn error_code(&self) -> Option<ErrorKind> {
        self.failure().map(|f| f.error_code)
    }

    pub fn meta(&self) -> &RequestMeta {
        match self {
            Self::Success { meta, .. } => meta,
            Self::Error(f) => &f.meta,
        }
    }

    /// Convert to MCP CallToolResult.
    /// Always a transport-level success; the JSON envelope carries `"success": false`
    /// so sibling tool calls are not cascaded into failure.
    pub fn into_call_tool_result(self) -> CallToolResult {
        match serde_json::to_string(&self) {
            Ok(json) => CallToolResult::success(vec![Content::text(json)]),
            Err(e) => {
                let escaped = e.to_string().replace('\\', "\\\\").replace('"', "\\\"");
                CallToolResult::success(vec![Content::text(format!(
                    r#"{{"success":false,"error":"serialization failed: {escaped}","errorCode":"UNKNOWN","retryable":false}}"#
                ))])
            }
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireResult<'a> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retryable: Option<bool>,
    meta: &'a RequestMeta,
}

impl Serialize for GenerationResult {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let wire = match self {
            Self::Success { data, meta } => WireResult {
                success: true,
                data: Some(data),
                error: None,
                error_code: None,
                details: None,
                retryable: None,
                meta,
            },
            Self::Error(f) => WireResult {
                success: false,
                data: None,
                error: Some(&f.error),
                error_code: Some(f.error_code),
                details: f.details.as_deref(),
                retryable: Some(f.retryable),
                meta: &f.meta,
            },
        };
        wire.serialize(s)
    }
}

/// JSON array of envelopes, one per requested provider, as a single tool result.
pub fn batch_call_tool_result(results: &[GenerationResult]) -> CallToolResult {
    match serde_json::to_string(results) {
        Ok(json) => CallToolResult::success(vec![Content::text(json)]),
        Err(e) => CallToolResult::success(vec![Content::text(format!(
            r#"[{{"success":false,"error":"serialization failed","details":{},"errorCode":"UNKNOWN","retryable":false}}]"#,
            serde_json::Value::String(e.to_string())
        ))]),
    }
}

/// Optional fields for `create_error_result`.
#[derive(Debug, Default)]
pub struct ErrorOptions {
    pub details: Option<String>,
    pub retryable: bool,
    pub meta: Option<RequestMeta>,
}

pub fn create_success_result(data: String, meta: RequestMeta) -> GenerationResult {
    GenerationResult::Success { data, meta }
}

pub fn create_error_result(
    code: ErrorKind,
    message: impl Into<String>,
    opts: ErrorOptions,
) -> GenerationResult {
    GenerationResult::Error(GenerationFailure {
        error: message.into(),
        error_code: code,
        details: opts.details,
        retryable: opts.retryable,
        meta: opts.meta.unwrap_or_else(|| RequestMeta::new("unknown")),
    })
}

/// Opaque per-call identifier (UUID v4).
pub fn generate_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
