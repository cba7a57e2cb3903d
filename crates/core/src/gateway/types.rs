//! Request and response types shared by every gateway.

use serde::{Deserialize, Serialize};

use super::error::GatewayError;

/// Default sampling temperature when a caller does not set one.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Default completion budget when a caller does not set one.
pub const DEFAULT_MAX_TOKENS: u32 = 1000;

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A chat completion request, before backend-specific validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    /// Model override. `None` uses the backend's default model.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            model: None,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    /// A request holding a single user message.
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self::new(vec![ChatMessage::user(prompt)])
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Validate against a backend and clamp numeric parameters into its range.
    ///
    /// Fails with a validation error for an empty message list, and with a
    /// configuration error when the resolved model is not supported.
    pub fn prepare(
        self,
        backend: &str,
        default_model: &str,
        supported_models: &[String],
        limits: ParamLimits,
    ) -> Result<PreparedChat, GatewayError> {
        if self.messages.is_empty() {
            return Err(GatewayError::validation(backend, "message list is empty"));
        }

        let model = self.model.unwrap_or_else(|| default_model.to_string());
        if !supported_models.iter().any(|m| m == &model) {
            return Err(GatewayError::configuration(
                backend,
                format!(
                    "unsupported model '{}'; supported models: {}",
                    model,
                    supported_models.join(", ")
                ),
            ));
        }

        Ok(PreparedChat {
            messages: self.messages,
            model,
            temperature: limits.clamp_temperature(self.temperature),
            max_tokens: limits.clamp_max_tokens(self.max_tokens),
        })
    }
}

/// A request that passed validation, ready for the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedChat {
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Valid parameter ranges for a backend.
///
/// Temperature is always bounded below by 0 and max tokens by 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ParamLimits {
    pub max_temperature: f32,
    pub max_tokens: u32,
}

impl ParamLimits {
    pub const fn new(max_temperature: f32, max_tokens: u32) -> Self {
        Self {
            max_temperature,
            max_tokens,
        }
    }

    pub fn clamp_temperature(&self, temperature: f32) -> f32 {
        if temperature.is_nan() {
            return 0.0;
        }
        temperature.clamp(0.0, self.max_temperature)
    }

    pub fn clamp_max_tokens(&self, max_tokens: u32) -> u32 {
        max_tokens.clamp(1, self.max_tokens)
    }
}

/// Token usage reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A completed chat response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    pub provider: String,
    pub usage: TokenUsage,
    pub latency_ms: u64,
    /// Backend-specific extras (finish reason, response id, reasoning text).
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn models() -> Vec<String> {
        vec!["alpha".to_string(), "beta".to_string()]
    }

    #[test]
    fn test_prepare_uses_default_model() {
        let prepared = ChatRequest::from_prompt("hi")
            .prepare("test", "alpha", &models(), ParamLimits::new(1.0, 4096))
            .unwrap();
        assert_eq!(prepared.model, "alpha");
        assert_eq!(prepared.max_tokens, DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn test_prepare_clamps_parameters() {
        let prepared = ChatRequest::from_prompt("hi")
            .with_temperature(1.7)
            .with_max_tokens(100_000)
            .prepare("test", "alpha", &models(), ParamLimits::new(1.0, 4096))
            .unwrap();
        assert_eq!(prepared.temperature, 1.0);
        assert_eq!(prepared.max_tokens, 4096);

        let prepared = ChatRequest::from_prompt("hi")
            .with_temperature(-3.0)
            .with_max_tokens(0)
            .prepare("test", "alpha", &models(), ParamLimits::new(2.0, 8192))
            .unwrap();
        assert_eq!(prepared.temperature, 0.0);
        assert_eq!(prepared.max_tokens, 1);
    }

    #[test]
    fn test_prepare_rejects_empty_messages() {
        let err = ChatRequest::new(vec![])
            .prepare("test", "alpha", &models(), ParamLimits::new(1.0, 10))
            .unwrap_err();
        assert!(matches!(err, GatewayError::Validation { .. }));
    }

    #[test]
    fn test_prepare_rejects_unsupported_model() {
        let err = ChatRequest::from_prompt("hi")
            .with_model("gamma")
            .prepare("test", "alpha", &models(), ParamLimits::new(1.0, 10))
            .unwrap_err();
        assert!(matches!(err, GatewayError::Configuration { .. }));
        assert!(err.to_string().contains("alpha, beta"));
    }

    #[test]
    fn test_nan_temperature_clamps_to_zero() {
        let limits = ParamLimits::new(2.0, 10);
        assert_eq!(limits.clamp_temperature(f32::NAN), 0.0);
    }

    #[test]
    fn test_request_deserializes_with_defaults() {
        let json = r#"{"messages":[{"role":"user","content":"hello"}]}"#;
        let request: ChatRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.messages[0].role, Role::User);
        assert_eq!(request.temperature, DEFAULT_TEMPERATURE);
        assert!(request.model.is_none());
    }
}
