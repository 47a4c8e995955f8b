use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use reqwest::{Client, RequestBuilder};
use tokio_util::sync::CancellationToken;

use crate::error::{NetworkCode, ProviderError, RequestSnapshot};
use crate::response::{ErrorKind, ErrorOptions, GenerationResult, RequestMeta, create_error_result};
use crate::retry::is_retryable_error;
use crate::security::{
    DEFAULT_MAX_ERROR_LENGTH, MAX_PAYLOAD_BYTES, mask_sensitive_headers, safe_error_data,
    truncate_error_message,
};

/// Phrases vendors use when a prompt is rejected on safety grounds.
pub const SAFETY_MARKERS: &[&str] = &[
    "safety",
    "content policy",
    "content_policy",
    "policy violation",
    "blocked",
    "nsfw",
    "responsible ai",
    "moderation",
];

/// Pooled client shared by every provider for socket reuse.
#[derive(Clone, Debug)]
pub struct HttpClient {
    client: Client,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Successful (2xx) response with the body already read.
#[derive(Debug)]
pub struct HttpReply {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl HttpReply {
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, ProviderError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| ProviderError::InvalidResponse(format!("failed to parse response: {e}")))
    }
}

impl HttpClient {
    pub fn new() -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("failed to build tuned HTTP client, using defaults: {e}");
                Client::new()
            });
        Self { client }
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Send the request, honouring `cancel`, and stream the body, aborting
    /// once it passes `MAX_PAYLOAD_BYTES`. Non-2xx statuses become `ProviderError::Http`
    /// carrying a snapshot of the outgoing request.
    pub async fn execute(
        &self,
        builder: RequestBuilder,
        timeout: Duration,
        cancel: Option<&CancellationToken>,
    ) -> Result<HttpReply, ProviderError> {
        let request = builder.timeout(timeout).build()?;
        let snapshot = RequestSnapshot::from_request(&request);
        let started = Instant::now();

        let call = async move {
            let response = self.client.execute(request).await?;
            read_reply(response, snapshot).await
        };

        let result = match cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(ProviderError::aborted()),
                    r = call => r,
                }
            }
            None => call.await,
        };

        tracing::debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "vendor call finished"
        );
        result
    }
}

async fn read_reply(
    response: reqwest::Response,
    snapshot: RequestSnapshot,
) -> Result<HttpReply, ProviderError> {
    let status = response.status();
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    if let Some(len) = response.content_length()
        && len as usize > MAX_PAYLOAD_BYTES
    {
        return Err(ProviderError::PayloadTooLarge {
            size: len as usize,
            limit: MAX_PAYLOAD_BYTES,
        });
    }

    let body = read_capped(response).await?;

    if !status.is_success() {
        let (message, vendor_code) = vendor_error(&body, status);
        return Err(ProviderError::Http {
            status: status.as_u16(),
            message,
            vendor_code,
            details: Some(safe_error_data(content_type.as_deref(), &body)),
            request: Some(Box::new(snapshot)),
        });
    }

    Ok(HttpReply {
        status: status.as_u16(),
        content_type,
        body,
    })
}

/// Stream the body, failing as soon as it grows past `MAX_PAYLOAD_BYTES`.
async fn read_capped(mut response: reqwest::Response) -> Result<Bytes, ProviderError> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = response.chunk().await? {
        let size = buf.len() + chunk.len();
        if size > MAX_PAYLOAD_BYTES {
            return Err(ProviderError::PayloadTooLarge {
                size,
                limit: MAX_PAYLOAD_BYTES,
            });
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

/// Pull a human message and vendor code out of the common JSON error shapes:
/// `{"error":{"message","code"|"status"|"type"}}`, `{"error":"..."}`,
/// `{"message": ...}`, `{"detail": ...}`.
fn vendor_error(body: &[u8], status: reqwest::StatusCode) -> (String, Option<String>) {
    let fallback = status
        .canonical_reason()
        .unwrap_or("request failed")
        .to_string();

    let Ok(v) = serde_json::from_slice::<serde_json::Value>(body) else {
        let text = String::from_utf8_lossy(body);
        let text = text.trim();
        if text.is_empty() || std::str::from_utf8(body).is_err() {
            return (fallback, None);
        }
        return (truncate_error_message(text, DEFAULT_MAX_ERROR_LENGTH), None);
    };

    let err = &v["error"];
    let message = err["message"]
        .as_str()
        .or_else(|| err.as_str())
        .or_else(|| v["message"].as_str())
        .or_else(|| v["detail"].as_str())
        .map(|s| truncate_error_message(s, DEFAULT_MAX_ERROR_LENGTH))
        .unwrap_or(fallback);

    let code = err["code"]
        .as_str()
        .map(|s| s.to_string())
        .or_else(|| err["status"].as_str().map(|s| s.to_string()))
        .or_else(|| err["type"].as_str().map(|s| s.to_string()));

    (message, code)
}

fn mentions_safety(err: &ProviderError, markers: &[&str]) -> bool {
    let ProviderError::Http {
        message,
        vendor_code,
        details,
        ..
    } = err
    else {
        return false;
    };
    let haystack = format!(
        "{} {} {}",
        message,
        vendor_code.as_deref().unwrap_or(""),
        details.as_deref().unwrap_or("")
    )
    .to_lowercase();
    markers.iter().any(|m| haystack.contains(m))
}

/// Map a provider error onto the fixed taxonomy. Returns (kind, caller-retryable).
pub fn classify_failure(err: &ProviderError, safety_markers: &[&str]) -> (ErrorKind, bool) {
    match err {
        ProviderError::MissingCredentials(_) => (ErrorKind::MissingCredentials, false),
        ProviderError::InvalidParams(_) | ProviderError::UnknownProvider { .. } => {
            (ErrorKind::InvalidParams, false)
        }
        ProviderError::Auth(_) => (ErrorKind::AuthFailed, false),
        ProviderError::ContentPolicy(_) => (ErrorKind::ContentPolicy, false),
        ProviderError::InvalidResponse(_) | ProviderError::PayloadTooLarge { .. } => {
            (ErrorKind::InvalidResponse, false)
        }
        ProviderError::Http { status, .. } => match *status {
            400 if mentions_safety(err, safety_markers) => (ErrorKind::ContentPolicy, false),
            400 => (ErrorKind::InvalidParams, false),
            401 | 403 => (ErrorKind::AuthFailed, false),
            408 => (ErrorKind::Timeout, true),
            429 => (ErrorKind::RateLimit, true),
            500..=599 => (ErrorKind::ServerError, true),
            _ => (ErrorKind::Unknown, is_retryable_error(err)),
        },
        ProviderError::Network { code, .. } => match code {
            NetworkCode::TimedOut | NetworkCode::ConnAborted => (ErrorKind::Timeout, true),
            NetworkCode::NotFound | NetworkCode::ConnRefused | NetworkCode::ConnReset => {
                (ErrorKind::NetworkError, true)
            }
            NetworkCode::Other(_) => (ErrorKind::Unknown, is_retryable_error(err)),
        },
        ProviderError::Other(_) => (ErrorKind::Unknown, is_retryable_error(err)),
    }
}

fn summary(kind: ErrorKind, provider: &str) -> String {
    match kind {
        ErrorKind::MissingCredentials => format!("{provider} credentials are not configured"),
        ErrorKind::InvalidParams => format!("{provider} rejected the request parameters"),
        ErrorKind::AuthFailed => format!("{provider} authentication failed"),
        ErrorKind::RateLimit => format!("{provider} rate limit exceeded"),
        ErrorKind::Timeout => format!("{provider} request timed out"),
        ErrorKind::NetworkError => format!("network error while calling {provider}"),
        ErrorKind::ServerError => format!("{provider} server error"),
        ErrorKind::ContentPolicy => format!("{provider} rejected the prompt (content policy)"),
        ErrorKind::InvalidResponse => format!("{provider} returned an invalid response"),
        ErrorKind::ProviderUnavailable => format!("{provider} is unavailable"),
        ErrorKind::Unknown => format!("{provider} request failed"),
    }
}

/// Mask, log, and fold a provider error into the result envelope.
pub fn failure_result(
    provider: &str,
    mut err: ProviderError,
    safety_markers: &[&str],
    meta: RequestMeta,
) -> GenerationResult {
    mask_sensitive_headers(&mut err);
    let (kind, retryable) = classify_failure(&err, safety_markers);

    let mut details = truncate_error_message(&err.to_string(), DEFAULT_MAX_ERROR_LENGTH);
    if let ProviderError::Http {
        details: Some(body),
        ..
    } = &err
        && !body.is_empty()
        && !details.contains(body.as_str())
    {
        details = format!("{details} | {body}");
    }

    match &err {
        ProviderError::Http { status, request, .. } => tracing::warn!(
            provider,
            request_id = %meta.request_id,
            status,
            request = ?request,
            kind = %kind,
            "image generation failed: {err}"
        ),
        _ => tracing::warn!(
            provider,
            request_id = %meta.request_id,
            kind = %kind,
            "image generation failed: {err}"
        ),
    }

    create_error_result(
        kind,
        summary(kind, provider),
        ErrorOptions {
            details: Some(details),
            retryable,
            meta: Some(meta),
        },
    )
}
