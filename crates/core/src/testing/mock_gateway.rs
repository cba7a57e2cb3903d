//! Mock gateway for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;

use crate::gateway::{
    ChatRequest, ChatResponse, ChatStream, GatewayError, ParamLimits, ProviderGateway, TokenUsage,
};

#[derive(Default)]
struct MockState {
    response: String,
    always_error: Option<GatewayError>,
    queued_errors: VecDeque<GatewayError>,
}

/// Mock implementation of [`ProviderGateway`].
///
/// Provides controllable behavior for testing:
/// - Return a configurable response text
/// - Record every request for assertions
/// - Log call start and finish into a log shared between gateways
/// - Simulate delays, one-shot errors, and permanent failure
///
/// Requests are recorded as received, before any clamping. Model overrides
/// are accepted without checking them against `supported_models`.
///
/// # Example
///
/// ```rust,ignore
/// use brandlens_core::testing::MockGateway;
///
/// let gateway = MockGateway::new("mock").with_response("Try Notion");
/// gateway.push_error(GatewayError::from_status("mock", 503, "busy"));
///
/// assert!(gateway.chat_completion(request.clone()).await.is_err());
/// assert_eq!(gateway.chat_completion(request).await?.content, "Try Notion");
/// assert_eq!(gateway.call_count(), 2);
/// ```
pub struct MockGateway {
    id: String,
    models: Vec<String>,
    delay: Option<Duration>,
    state: Arc<Mutex<MockState>>,
    requests: Arc<Mutex<Vec<ChatRequest>>>,
    call_log: Option<Arc<Mutex<Vec<String>>>>,
}

impl std::fmt::Debug for MockGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockGateway")
            .field("id", &self.id)
            .field("delay", &self.delay)
            .field("state", &"<state>")
            .finish()
    }
}

impl MockGateway {
    /// A healthy gateway answering "mock response".
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            models: vec![format!("{}-model", id)],
            id,
            delay: None,
            state: Arc::new(Mutex::new(MockState {
                response: "mock response".to_string(),
                ..MockState::default()
            })),
            requests: Arc::new(Mutex::new(Vec::new())),
            call_log: None,
        }
    }

    pub fn with_response(self, content: impl Into<String>) -> Self {
        self.set_response(content);
        self
    }

    /// Sleep this long before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Append `<id>:start` and `<id>:end` to `log` around every call.
    pub fn with_call_log(mut self, log: Arc<Mutex<Vec<String>>>) -> Self {
        self.call_log = Some(log);
        self
    }

    /// Builder form of [`MockGateway::fail_always`].
    pub fn failing(self, error: GatewayError) -> Self {
        self.fail_always(error);
        self
    }

    pub fn set_response(&self, content: impl Into<String>) {
        self.lock().response = content.into();
    }

    /// Fail every later call with `error`.
    pub fn fail_always(&self, error: GatewayError) {
        self.lock().always_error = Some(error);
    }

    /// Fail the next call with `error`. Queued errors are used in order.
    pub fn push_error(&self, error: GatewayError) {
        self.lock().queued_errors.push_back(error);
    }

    /// Shared handle to the recorded requests.
    pub fn requests_handle(&self) -> Arc<Mutex<Vec<ChatRequest>>> {
        Arc::clone(&self.requests)
    }

    pub fn recorded_requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn log_call(&self, phase: &str) {
        if let Some(log) = &self.call_log {
            log.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(format!("{}:{}", self.id, phase));
        }
    }

    /// Record the request and decide the outcome.
    async fn answer(&self, request: ChatRequest) -> Result<String, GatewayError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
        self.log_call("start");

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.log_call("end");

        let mut state = self.lock();
        if let Some(error) = state.queued_errors.pop_front() {
            return Err(error);
        }
        if let Some(error) = &state.always_error {
            return Err(error.clone());
        }
        Ok(state.response.clone())
    }
}

#[async_trait]
impl ProviderGateway for MockGateway {
    fn provider(&self) -> &str {
        &self.id
    }

    fn supported_models(&self) -> &[String] {
        &self.models
    }

    fn default_model(&self) -> &str {
        &self.models[0]
    }

    fn limits(&self) -> ParamLimits {
        ParamLimits::new(2.0, 4096)
    }

    async fn chat_completion(&self, request: ChatRequest) -> Result<ChatResponse, GatewayError> {
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.default_model().to_string());
        let prompt_tokens = request
            .messages
            .iter()
            .map(|m| m.content.split_whitespace().count() as u32)
            .sum();

        let content = self.answer(request).await?;
        let completion_tokens = content.split_whitespace().count() as u32;

        Ok(ChatResponse {
            content,
            model,
            provider: self.id.clone(),
            usage: TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
            latency_ms: self.delay.map(|d| d.as_millis() as u64).unwrap_or(0),
            metadata: serde_json::Map::new(),
        })
    }

    async fn chat_completion_stream(&self, request: ChatRequest) -> Result<ChatStream, GatewayError> {
        let content = self.answer(request).await?;
        // Word-sized increments that concatenate back to the full text.
        let mut chunks = Vec::new();
        let mut current = String::new();
        for c in content.chars() {
            current.push(c);
            if c == ' ' {
                chunks.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            chunks.push(current);
        }
        Ok(Box::pin(stream::iter(chunks.into_iter().map(Ok))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_queued_errors_then_success() {
        let gateway = MockGateway::new("m").with_response("hello there");
        gateway.push_error(GatewayError::from_status("m", 503, "busy"));

        let request = ChatRequest::from_prompt("hi");
        assert!(gateway.chat_completion(request.clone()).await.is_err());
        let response = gateway.chat_completion(request).await.unwrap();
        assert_eq!(response.content, "hello there");
        assert_eq!(response.provider, "m");
        assert_eq!(gateway.call_count(), 2);
    }

    #[tokio::test]
    async fn test_stream_concatenates_to_response() {
        let gateway = MockGateway::new("m").with_response("one two three");
        let stream = gateway
            .chat_completion_stream(ChatRequest::from_prompt("hi"))
            .await
            .unwrap();
        let parts: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(parts.len(), 3);
        assert_eq!(parts.concat(), "one two three");
    }

    #[tokio::test]
    async fn test_health_check_follows_failure_mode() {
        let gateway = MockGateway::new("m");
        assert!(gateway.health_check().await);
        gateway.fail_always(GatewayError::from_status("m", 500, "x"));
        assert!(!gateway.health_check().await);
    }
}
