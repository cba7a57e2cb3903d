//! Configuration as the gateway credential source.

use std::time::Duration;

use super::types::{Config, GatewayConfig};
use crate::gateway::{BackendCredentials, CredentialSource, GatewayError};

/// Expand a `${VAR}` reference from the environment; other values pass through.
fn expand_api_key(backend: &str, raw: &str) -> Result<String, GatewayError> {
    let trimmed = raw.trim();
    match trimmed
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
    {
        Some(var) => std::env::var(var).map_err(|_| {
            GatewayError::configuration(
                backend,
                format!("API key environment variable {} is not set", var),
            )
        }),
        None => Ok(trimmed.to_string()),
    }
}

impl GatewayConfig {
    pub fn to_credentials(&self, backend: &str) -> Result<BackendCredentials, GatewayError> {
        let api_key = expand_api_key(backend, &self.api_key)?;
        if api_key.is_empty() {
            return Err(GatewayError::configuration(backend, "missing API key"));
        }

        Ok(BackendCredentials {
            api_key,
            base_url: self.base_url.clone(),
            default_model: self.default_model.clone(),
            extra_models: self.extra_models.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            retry: self.retry,
        })
    }
}

impl CredentialSource for Config {
    fn backend_config(&self, backend: &str) -> Result<BackendCredentials, GatewayError> {
        self.gateways
            .get(backend)
            .ok_or_else(|| {
                GatewayError::configuration(
                    backend,
                    format!("no [gateways.{}] section in configuration", backend),
                )
            })?
            .to_credentials(backend)
    }

    fn configured_backends(&self) -> Vec<String> {
        self.gateways.keys().cloned().collect()
    }
}
