use std::sync::Arc;

use brandlens_core::{
    BrandCatalog, BrandMatcher, Config, CredentialSource, DetectionOrchestrator, GatewayRegistry,
    MentionRepository, SanitizedConfig,
};

/// Shared application state
pub struct AppState {
    config: Config,
    registry: Arc<GatewayRegistry>,
    repository: Arc<dyn MentionRepository>,
    credentials: Arc<dyn CredentialSource>,
    orchestrator: DetectionOrchestrator,
}

impl AppState {
    /// Build the state, using `config` as the credential source.
    pub fn new(
        config: Config,
        registry: Arc<GatewayRegistry>,
        repository: Arc<dyn MentionRepository>,
        catalog: Arc<BrandCatalog>,
    ) -> Self {
        let credentials: Arc<dyn CredentialSource> = Arc::new(config.clone());
        let orchestrator = DetectionOrchestrator::new(
            Arc::clone(&registry),
            Arc::clone(&repository),
            Arc::clone(&credentials),
            BrandMatcher::new(catalog),
            config.detection.clone(),
        );
        Self {
            config,
            registry,
            repository,
            credentials,
            orchestrator,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn registry(&self) -> &GatewayRegistry {
        &self.registry
    }

    pub fn repository(&self) -> &dyn MentionRepository {
        self.repository.as_ref()
    }

    pub fn credentials(&self) -> &dyn CredentialSource {
        self.credentials.as_ref()
    }

    pub fn orchestrator(&self) -> &DetectionOrchestrator {
        &self.orchestrator
    }

    pub fn matcher(&self) -> &BrandMatcher {
        self.orchestrator.matcher()
    }
}
