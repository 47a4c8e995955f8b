use std::env;
use std::fmt;
use std::str::FromStr;

use crate::error::ProviderError;

/// Built-in provider families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderType {
    OpenAi,
    Dezgo,
    Google,
    Grok,
}

impl ProviderType {
    pub const ALL: [ProviderType; 4] = [Self::OpenAi, Self::Dezgo, Self::Google, Self::Grok];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Dezgo => "dezgo",
            Self::Google => "google",
            Self::Grok => "grok",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "dezgo" => Ok(Self::Dezgo),
            "google" => Ok(Self::Google),
            "grok" => Ok(Self::Grok),
            _ => Err(ProviderError::UnknownProvider {
                name: s.to_string(),
                valid: Self::ALL.iter().map(|t| t.as_str().to_string()).collect(),
            }),
        }
    }
}

/// Vendor credentials, resolved once and injected into providers.
#[derive(Clone, Default)]
pub struct Credentials {
    pub openai_api_key: Option<String>,
    pub dezgo_api_key: Option<String>,
    pub google_project_id: Option<String>,
    /// Service-account JSON, inline or as a file path.
    pub google_application_credentials: Option<String>,
    pub google_api_key: Option<String>,
    pub grok_api_key: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        Self {
            openai_api_key: non_blank_env("OPENAI_API_KEY"),
            dezgo_api_key: non_blank_env("DEZGO_API_KEY"),
            google_project_id: non_blank_env("GOOGLE_CLOUD_PROJECT_ID"),
            google_application_credentials: non_blank_env("GOOGLE_APPLICATION_CREDENTIALS"),
            google_api_key: non_blank_env("GOOGLE_CLOUD_API_KEY"),
            grok_api_key: non_blank_env("GROK_API_KEY"),
        }
    }

    pub fn has(&self, provider: ProviderType) -> bool {
        assert_credentials(provider, self).is_ok()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn mark(v: &Option<String>) -> &'static str {
            if v.is_some() { "[REDACTED]" } else { "<unset>" }
        }
        f.debug_struct("Credentials")
            .field("openai_api_key", &mark(&self.openai_api_key))
            .field("dezgo_api_key", &mark(&self.dezgo_api_key))
            .field("google_project_id", &self.google_project_id)
            .field(
                "google_application_credentials",
                &mark(&self.google_application_credentials),
            )
            .field("google_api_key", &mark(&self.google_api_key))
            .field("grok_api_key", &mark(&self.grok_api_key))
            .finish()
    }
}

pub(crate) fn non_blank_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn present(v: &Option<String>) -> bool {
    v.as_deref().is_some_and(|s| !s.trim().is_empty())
}

/// Check that every value `provider` needs is configured.
/// No return value on success; the error names what is missing.
pub fn assert_credentials(provider: ProviderType, creds: &Credentials) -> Result<(), ProviderError> {
    let missing = match provider {
        ProviderType::OpenAi => (!present(&creds.openai_api_key)).then_some("OPENAI_API_KEY"),
        ProviderType::Dezgo => (!present(&creds.dezgo_api_key)).then_some("DEZGO_API_KEY"),
        ProviderType::Grok => (!present(&creds.grok_api_key)).then_some("GROK_API_KEY"),
        ProviderType::Google => {
            if !present(&creds.google_project_id) {
                Some("GOOGLE_CLOUD_PROJECT_ID")
            } else if !present(&creds.google_application_credentials)
                && !present(&creds.google_api_key)
            {
                Some("GOOGLE_APPLICATION_CREDENTIALS or GOOGLE_CLOUD_API_KEY")
            } else {
                None
            }
        }
    };

    match missing {
        Some(var) => Err(ProviderError::MissingCredentials(format!(
            "{provider} requires {var}"
        ))),
        None => Ok(()),
    }
}

/// Same as `assert_credentials`, for a provider given by name.
/// Names outside the built-in set always fail.
pub fn assert_credentials_for(provider: &str, creds: &Credentials) -> Result<(), ProviderError> {
    let kind: ProviderType = provider
        .parse()
        .map_err(|_| ProviderError::MissingCredentials(format!("unknown provider type: {provider}")))?;
    assert_credentials(kind, creds)
}
