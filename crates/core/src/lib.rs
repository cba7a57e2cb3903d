//! Brand-mention detection across generative AI backends.
//!
//! A prompt is sent to several chat-completion backends; each answer is
//! scanned for the requested brands and the results are stored for
//! analytics.

pub mod config;
pub mod detection;
pub mod gateway;
pub mod matcher;
pub mod metrics;
pub mod repository;
pub mod templates;
pub mod testing;

pub use config::{
    load_config, load_config_from_str, validate_config, CatalogConfig, Config, ConfigError,
    DatabaseConfig, DetectionConfig, GatewayConfig, LogFormat, LoggingConfig, SanitizedConfig,
    ServerConfig,
};
pub use detection::{
    CheckStatus, DetectionCheck, DetectionError, DetectionOrchestrator, DetectionRequest,
    DetectionSummary, ExecutionMode, ModelError, ModelErrorKind, ModelResult,
};
pub use gateway::{
    BackendCredentials, ChatMessage, ChatRequest, ChatResponse, ChatStream, CredentialSource,
    GatewayError, GatewayRegistry, HealthReport, ProviderGateway, RetryPolicy,
};
pub use matcher::{BrandCatalog, BrandMatcher, BrandMention, MatchMethods};
pub use repository::{
    CheckFilter, MentionRepository, RepositoryError, SqliteMentionRepository, TemplateFilter,
};
pub use templates::{NewTemplate, PromptTemplate, TemplateError};
