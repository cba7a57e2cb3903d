//! Backend identifier to gateway resolution.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use super::anthropic::AnthropicGateway;
use super::credentials::{BackendCredentials, CredentialSource};
use super::error::GatewayError;
use super::openai_compat::{OpenAiCompatibleGateway, DEEPSEEK, DOUBAO, OPENAI};
use super::traits::ProviderGateway;

/// Builds a gateway from credentials.
pub type GatewayFactory =
    Arc<dyn Fn(BackendCredentials) -> Result<Arc<dyn ProviderGateway>, GatewayError> + Send + Sync>;

/// Split a model identifier of the form `backend` or `backend:model`.
pub fn parse_model_identifier(identifier: &str) -> (&str, Option<&str>) {
    match identifier.split_once(':') {
        Some((backend, model)) if !model.is_empty() => (backend, Some(model)),
        Some((backend, _)) => (backend, None),
        None => (identifier, None),
    }
}

/// Registry of gateway factories with a per-identifier instance cache.
///
/// Constructed once at startup and shared by reference. The first request
/// for an identifier must supply credentials; later requests reuse the
/// cached instance.
pub struct GatewayRegistry {
    factories: RwLock<BTreeMap<String, GatewayFactory>>,
    instances: RwLock<HashMap<String, Arc<dyn ProviderGateway>>>,
}

impl Default for GatewayRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(BTreeMap::new()),
            instances: RwLock::new(HashMap::new()),
        }
    }

    /// A registry with doubao, deepseek, openai, and anthropic registered.
    pub fn with_builtin_backends() -> Self {
        let registry = Self::new();
        registry.register(DOUBAO.id, |c| {
            Ok(Arc::new(OpenAiCompatibleGateway::doubao(c)?) as Arc<dyn ProviderGateway>)
        });
        registry.register(DEEPSEEK.id, |c| {
            Ok(Arc::new(OpenAiCompatibleGateway::deepseek(c)?) as Arc<dyn ProviderGateway>)
        });
        registry.register(OPENAI.id, |c| {
            Ok(Arc::new(OpenAiCompatibleGateway::openai(c)?) as Arc<dyn ProviderGateway>)
        });
        registry.register("anthropic", |c| {
            Ok(Arc::new(AnthropicGateway::new(c)?) as Arc<dyn ProviderGateway>)
        });
        registry
    }

    /// Register (or replace) a backend factory.
    pub fn register<F>(&self, identifier: impl Into<String>, factory: F)
    where
        F: Fn(BackendCredentials) -> Result<Arc<dyn ProviderGateway>, GatewayError>
            + Send
            + Sync
            + 'static,
    {
        let identifier = identifier.into();
        tracing::debug!(backend = %identifier, "Registered gateway backend");
        self.factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identifier, Arc::new(factory));
    }

    /// Cache a ready-made gateway under `identifier`.
    pub fn insert_instance(&self, identifier: impl Into<String>, gateway: Arc<dyn ProviderGateway>) {
        self.instances
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identifier.into(), gateway);
    }

    /// Every identifier that can be resolved, sorted.
    pub fn known_identifiers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        for id in self
            .instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
        {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids.sort();
        ids
    }

    pub fn is_known(&self, identifier: &str) -> bool {
        self.cached(identifier).is_some()
            || self
                .factories
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .contains_key(identifier)
    }

    /// Drop every cached instance. Factories stay registered.
    pub fn clear_instances(&self) {
        self.instances
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn cached(&self, identifier: &str) -> Option<Arc<dyn ProviderGateway>> {
        self.instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identifier)
            .cloned()
    }

    fn unknown(&self, identifier: &str) -> GatewayError {
        GatewayError::configuration(
            identifier,
            format!(
                "unsupported backend '{}'; known backends: [{}]",
                identifier,
                self.known_identifiers().join(", ")
            ),
        )
    }

    /// Get the gateway for `identifier`, constructing it on first use.
    pub fn get(
        &self,
        identifier: &str,
        credentials: Option<BackendCredentials>,
    ) -> Result<Arc<dyn ProviderGateway>, GatewayError> {
        if let Some(gateway) = self.cached(identifier) {
            return Ok(gateway);
        }

        let factory = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identifier)
            .cloned();
        let Some(factory) = factory else {
            return Err(self.unknown(identifier));
        };

        let credentials = credentials.ok_or_else(|| {
            GatewayError::configuration(
                identifier,
                "credentials are required the first time a backend is requested",
            )
        })?;

        let gateway = factory(credentials)?;

        // A concurrent first request may have won; keep whichever landed first.
        let mut instances = self
            .instances
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let gateway = instances
            .entry(identifier.to_string())
            .or_insert(gateway)
            .clone();
        tracing::info!(backend = identifier, "Gateway instance created");
        Ok(gateway)
    }

    /// Get the gateway for `identifier`, pulling credentials from `source` if needed.
    pub fn resolve(
        &self,
        identifier: &str,
        source: &dyn CredentialSource,
    ) -> Result<Arc<dyn ProviderGateway>, GatewayError> {
        if let Some(gateway) = self.cached(identifier) {
            return Ok(gateway);
        }
        if !self.is_known(identifier) {
            return Err(self.unknown(identifier));
        }
        let credentials = source.backend_config(identifier)?;
        self.get(identifier, Some(credentials))
    }
}
