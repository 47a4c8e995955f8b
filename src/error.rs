use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

/// Low-level network failure codes surfaced by the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkCode {
    ConnAborted,
    NotFound,
    ConnRefused,
    ConnReset,
    TimedOut,
    Other(String),
}

impl NetworkCode {
    pub fn as_str(&self) -> &str {
        match self {
            Self::ConnAborted => "ECONNABORTED",
            Self::NotFound => "ENOTFOUND",
            Self::ConnRefused => "ECONNREFUSED",
            Self::ConnReset => "ECONNRESET",
            Self::TimedOut => "ETIMEDOUT",
            Self::Other(code) => code,
        }
    }

    pub fn parse(code: &str) -> Self {
        match code.to_ascii_uppercase().as_str() {
            "ECONNABORTED" => Self::ConnAborted,
            "ENOTFOUND" => Self::NotFound,
            "ECONNREFUSED" => Self::ConnRefused,
            "ECONNRESET" => Self::ConnReset,
            "ETIMEDOUT" => Self::TimedOut,
            _ => Self::Other(code.to_string()),
        }
    }
}

impl fmt::Display for NetworkCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Captured outgoing request, kept on HTTP errors for diagnostics.
/// Run `security::mask_sensitive_headers` before logging it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestSnapshot {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
}

impl RequestSnapshot {
    pub fn from_request(req: &reqwest::Request) -> Self {
        let headers = req
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    String::from_utf8_lossy(v.as_bytes()).into_owned(),
                )
            })
            .collect();
        Self {
            method: req.method().to_string(),
            url: strip_query(req.url().as_str()),
            headers,
        }
    }
}

/// Query strings can carry API keys (Vertex `?key=`), never keep them.
fn strip_query(url: &str) -> String {
    match url.split_once('?') {
        Some((base, _)) => base.to_string(),
        None => url.to_string(),
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("missing credentials: {0}")]
    MissingCredentials(String),

    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("unknown provider: {name} (valid providers: {})", .valid.join(", "))]
    UnknownProvider { name: String, valid: Vec<String> },

    #[error("network error ({code}): {message}")]
    Network { code: NetworkCode, message: String },

    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        message: String,
        /// Vendor error code, when the body carries one (e.g. `content_policy_violation`).
        vendor_code: Option<String>,
        /// Bounded, log-safe rendering of the error body.
        details: Option<String>,
        request: Option<Box<RequestSnapshot>>,
    },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("payload too large: {size} bytes (max {limit})")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("authentication failed: {0}")]
    Auth(String),

    /// Vendor accepted the call but filtered the output on safety grounds.
    #[error("content policy: {0}")]
    ContentPolicy(String),

    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn network_code(&self) -> Option<&NetworkCode> {
        match self {
            Self::Network { code, .. } => Some(code),
            _ => None,
        }
    }

    pub fn request_snapshot_mut(&mut self) -> Option<&mut RequestSnapshot> {
        match self {
            Self::Http { request, .. } => request.as_deref_mut(),
            _ => None,
        }
    }

    pub fn aborted() -> Self {
        Self::Network {
            code: NetworkCode::ConnAborted,
            message: "request aborted by caller".to_string(),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        let code = classify_reqwest_error(&e);
        // Display appends the request URL, which carries `?key=` for Vertex.
        Self::Network {
            code,
            message: e.without_url().to_string(),
        }
    }
}

/// Walk the error source chain to recover a socket-level failure code.
fn classify_reqwest_error(e: &reqwest::Error) -> NetworkCode {
    if e.is_timeout() {
        return NetworkCode::TimedOut;
    }

    let mut source: Option<&(dyn std::error::Error + 'static)> = std::error::Error::source(e);
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            match io.kind() {
                std::io::ErrorKind::ConnectionRefused => return NetworkCode::ConnRefused,
                std::io::ErrorKind::ConnectionReset => return NetworkCode::ConnReset,
                std::io::ErrorKind::ConnectionAborted => return NetworkCode::ConnAborted,
                std::io::ErrorKind::TimedOut => return NetworkCode::TimedOut,
                std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::BrokenPipe => {
                    return NetworkCode::ConnReset;
                }
                _ => {}
            }
        }
        let text = err.to_string().to_lowercase();
        if text.contains("dns error") || text.contains("failed to lookup address") {
            return NetworkCode::NotFound;
        }
        source = err.source();
    }

    if e.is_connect() {
        NetworkCode::ConnRefused
    } else if e.is_request() || e.is_body() {
        NetworkCode::ConnReset
    } else {
        NetworkCode::Other("EUNKNOWN".to_string())
    }
}
