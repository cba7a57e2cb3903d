//! Credentials boundary between the gateways and whatever holds configuration.

use std::time::Duration;

use super::error::GatewayError;
use super::retry::RetryPolicy;

/// Everything needed to construct a gateway for one backend.
#[derive(Clone, PartialEq, Eq)]
pub struct BackendCredentials {
    pub api_key: String,
    pub base_url: Option<String>,
    pub default_model: Option<String>,
    /// Models accepted in addition to the backend's built-in list.
    pub extra_models: Vec<String>,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

impl BackendCredentials {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            default_model: None,
            extra_models: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn with_extra_models(mut self, models: Vec<String>) -> Self {
        self.extra_models = models;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

// Keep API keys out of debug logs.
impl std::fmt::Debug for BackendCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendCredentials")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("default_model", &self.default_model)
            .field("extra_models", &self.extra_models)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .finish()
    }
}

/// Source of per-backend credentials.
pub trait CredentialSource: Send + Sync {
    /// Credentials for `backend`, or a configuration error if it is unknown.
    fn backend_config(&self, backend: &str) -> Result<BackendCredentials, GatewayError>;

    /// Backends this source has credentials for.
    fn configured_backends(&self) -> Vec<String>;
}

/// A fixed in-memory credential map.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    entries: Vec<(String, BackendCredentials)>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, backend: impl Into<String>, credentials: BackendCredentials) -> Self {
        let backend = backend.into();
        self.entries.retain(|(id, _)| id != &backend);
        self.entries.push((backend, credentials));
        self
    }
}

impl CredentialSource for StaticCredentials {
    fn backend_config(&self, backend: &str) -> Result<BackendCredentials, GatewayError> {
        self.entries
            .iter()
            .find(|(id, _)| id == backend)
            .map(|(_, c)| c.clone())
            .ok_or_else(|| {
                GatewayError::configuration(backend, "no credentials configured for backend")
            })
    }

    fn configured_backends(&self) -> Vec<String> {
        self.entries.iter().map(|(id, _)| id.clone()).collect()
    }
}
