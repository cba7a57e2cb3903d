//! Chat-completion gateways over heterogeneous AI backends.

pub mod anthropic;
pub mod credentials;
pub mod error;
pub mod health;
pub mod openai_compat;
pub mod registry;
pub mod retry;
pub mod sse;
pub mod traits;
pub mod types;

pub use anthropic::AnthropicGateway;
pub use credentials::{BackendCredentials, CredentialSource, StaticCredentials, DEFAULT_TIMEOUT};
pub use error::{GatewayError, UpstreamCategory};
pub use health::{BackendHealth, BackendStatus, HealthReport, OverallStatus};
pub use openai_compat::{BackendProfile, OpenAiCompatibleGateway, DEEPSEEK, DOUBAO, OPENAI};
pub use registry::{parse_model_identifier, GatewayFactory, GatewayRegistry};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use traits::{ChatStream, ProviderGateway};
pub use types::{
    ChatMessage, ChatRequest, ChatResponse, ParamLimits, PreparedChat, Role, TokenUsage,
    DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE,
};
