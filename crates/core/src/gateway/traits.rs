use async_trait::async_trait;
use futures::stream::BoxStream;

use super::error::GatewayError;
use super::types::{ChatRequest, ChatResponse, ParamLimits, PreparedChat};

/// Lazy sequence of text increments from a streaming completion.
///
/// Ends after the upstream's end-of-stream marker. Not restartable.
pub type ChatStream = BoxStream<'static, Result<String, GatewayError>>;

/// Uniform capability set over one chat-completion backend.
///
/// Implementations hold no per-call mutable state, so a single instance is
/// shared across concurrent detection checks.
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    /// Backend identifier (e.g., "deepseek").
    fn provider(&self) -> &str;

    /// Models this backend accepts.
    fn supported_models(&self) -> &[String];

    /// Model used when a request does not name one.
    fn default_model(&self) -> &str;

    /// Valid parameter ranges for this backend.
    fn limits(&self) -> ParamLimits;

    /// Send a chat completion request.
    async fn chat_completion(&self, request: ChatRequest) -> Result<ChatResponse, GatewayError>;

    /// Send a chat completion request and stream the answer.
    async fn chat_completion_stream(&self, request: ChatRequest)
        -> Result<ChatStream, GatewayError>;

    /// Minimal-token completion; any error reports unhealthy.
    async fn health_check(&self) -> bool {
        let request = ChatRequest::from_prompt("Hello").with_max_tokens(10);
        match self.chat_completion(request).await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(backend = self.provider(), error = %e, "Health check failed");
                false
            }
        }
    }

    /// Validate a request against this backend and clamp its parameters.
    fn prepare(&self, request: ChatRequest) -> Result<PreparedChat, GatewayError> {
        request.prepare(
            self.provider(),
            self.default_model(),
            self.supported_models(),
            self.limits(),
        )
    }
}
