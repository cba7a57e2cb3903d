//! Anthropic Messages API gateway.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::credentials::BackendCredentials;
use super::error::{GatewayError, UpstreamCategory};
use super::retry::{retry_with_backoff, RetryPolicy};
use super::sse::{event_stream, SseEvent, SseStep};
use super::traits::{ChatStream, ProviderGateway};
use super::types::{ChatRequest, ChatResponse, ParamLimits, PreparedChat, Role, TokenUsage};
use crate::metrics::record_gateway_call;

const PROVIDER: &str = "anthropic";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-3-5-haiku-20241022";
const API_VERSION: &str = "2023-06-01";
const MODELS: &[&str] = &[
    "claude-3-5-sonnet-20241022",
    "claude-3-5-haiku-20241022",
    "claude-3-opus-20240229",
    "claude-3-sonnet-20240229",
    "claude-3-haiku-20240307",
];
const LIMITS: ParamLimits = ParamLimits::new(1.0, 8192);

/// Anthropic API gateway.
pub struct AnthropicGateway {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
    default_model: String,
    supported_models: Vec<String>,
    retry: RetryPolicy,
}

impl AnthropicGateway {
    pub fn new(credentials: BackendCredentials) -> Result<Self, GatewayError> {
        if credentials.api_key.trim().is_empty() {
            return Err(GatewayError::configuration(PROVIDER, "missing API key"));
        }

        let mut supported_models: Vec<String> = MODELS.iter().map(|m| m.to_string()).collect();
        for extra in credentials.extra_models {
            if !supported_models.contains(&extra) {
                supported_models.push(extra);
            }
        }

        let default_model = credentials
            .default_model
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        if !supported_models.contains(&default_model) {
            return Err(GatewayError::configuration(
                PROVIDER,
                format!("default model '{}' is not a supported model", default_model),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(credentials.timeout)
            .build()
            .map_err(|e| GatewayError::configuration(PROVIDER, e.to_string()))?;

        Ok(Self {
            client,
            api_key: credentials.api_key,
            api_base: credentials
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            default_model,
            supported_models,
            retry: credentials.retry,
        })
    }

    async fn send(&self, body: &AnthropicRequest<'_>) -> Result<reqwest::Response, GatewayError> {
        let response = self
            .client
            .post(format!("{}/v1/messages", self.api_base))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| GatewayError::from_reqwest(PROVIDER, &e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<AnthropicError>(&error_text)
                .map(|e| e.error.message)
                .unwrap_or(error_text);
            return Err(GatewayError::from_status(PROVIDER, status.as_u16(), message));
        }

        Ok(response)
    }

    async fn complete_once(
        &self,
        body: &AnthropicRequest<'_>,
    ) -> Result<AnthropicResponse, GatewayError> {
        let response = self.send(body).await?;
        response.json::<AnthropicResponse>().await.map_err(|e| {
            GatewayError::upstream(PROVIDER, UpstreamCategory::InvalidResponse, None, e.to_string())
        })
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

impl<'a> AnthropicRequest<'a> {
    /// System messages move to the top-level `system` field.
    fn new(prepared: &'a PreparedChat, stream: bool) -> Self {
        let system: Vec<&str> = prepared
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();

        Self {
            model: &prepared.model,
            max_tokens: prepared.max_tokens,
            system: if system.is_empty() {
                None
            } else {
                Some(system.join("\n\n"))
            },
            messages: prepared
                .messages
                .iter()
                .filter(|m| m.role != Role::System)
                .map(|m| AnthropicMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            temperature: prepared.temperature,
            stream,
        }
    }
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    id: Option<String>,
    content: Vec<AnthropicContent>,
    model: String,
    #[serde(default)]
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorDetail,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorDetail {
    message: String,
}

/// Streaming events we care about; everything else is skipped.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicStreamEvent {
    ContentBlockDelta { delta: AnthropicDelta },
    MessageStop,
    Error { error: AnthropicErrorDetail },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicDelta {
    #[serde(default)]
    text: Option<String>,
}

fn decode_stream_event(event: &SseEvent) -> Result<SseStep, GatewayError> {
    if event.data.trim().is_empty() {
        return Ok(SseStep::Skip);
    }

    let parsed: AnthropicStreamEvent = serde_json::from_str(&event.data).map_err(|e| {
        GatewayError::upstream(
            PROVIDER,
            UpstreamCategory::InvalidResponse,
            None,
            format!("malformed stream event: {}", e),
        )
    })?;

    match parsed {
        AnthropicStreamEvent::ContentBlockDelta { delta } => match delta.text {
            Some(text) if !text.is_empty() => Ok(SseStep::Emit(text)),
            _ => Ok(SseStep::Skip),
        },
        AnthropicStreamEvent::MessageStop => Ok(SseStep::Done),
        AnthropicStreamEvent::Error { error } => Err(GatewayError::upstream(
            PROVIDER,
            UpstreamCategory::ServerError,
            None,
            error.message,
        )),
        AnthropicStreamEvent::Other => Ok(SseStep::Skip),
    }
}

#[async_trait]
impl ProviderGateway for AnthropicGateway {
    fn provider(&self) -> &str {
        PROVIDER
    }

    fn supported_models(&self) -> &[String] {
        &self.supported_models
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn limits(&self) -> ParamLimits {
        LIMITS
    }

    async fn chat_completion(&self, request: ChatRequest) -> Result<ChatResponse, GatewayError> {
        let prepared = self.prepare(request)?;
        let body = AnthropicRequest::new(&prepared, false);
        if body.messages.is_empty() {
            return Err(GatewayError::validation(
                PROVIDER,
                "at least one user or assistant message is required",
            ));
        }
        let started = Instant::now();

        let this = self;
        let body_ref = &body;
        let result = retry_with_backoff(&self.retry, PROVIDER, move || async move {
            this.complete_once(body_ref).await
        })
        .await;
        let elapsed = started.elapsed();

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                record_gateway_call(PROVIDER, Err(&e), elapsed);
                return Err(e);
            }
        };

        let content = response
            .content
            .into_iter()
            .filter(|c| c.content_type == "text")
            .map(|c| c.text)
            .collect::<Vec<_>>()
            .join("");

        let usage = TokenUsage {
            prompt_tokens: response.usage.input_tokens,
            completion_tokens: response.usage.output_tokens,
            total_tokens: response.usage.input_tokens + response.usage.output_tokens,
        };

        let mut metadata = serde_json::Map::new();
        if let Some(reason) = response.stop_reason {
            metadata.insert("finish_reason".into(), reason.into());
        }
        if let Some(id) = response.id {
            metadata.insert("response_id".into(), id.into());
        }

        record_gateway_call(PROVIDER, Ok(&usage), elapsed);

        Ok(ChatResponse {
            content,
            model: response.model,
            provider: PROVIDER.to_string(),
            usage,
            latency_ms: elapsed.as_millis() as u64,
            metadata,
        })
    }

    async fn chat_completion_stream(
        &self,
        request: ChatRequest,
    ) -> Result<ChatStream, GatewayError> {
        let prepared = self.prepare(request)?;
        let body = AnthropicRequest::new(&prepared, true);
        if body.messages.is_empty() {
            return Err(GatewayError::validation(
                PROVIDER,
                "at least one user or assistant message is required",
            ));
        }

        let this = self;
        let body_ref = &body;
        let response = retry_with_backoff(&self.retry, PROVIDER, move || async move {
            this.send(body_ref).await
        })
        .await?;

        Ok(event_stream(response, PROVIDER, decode_stream_event))
    }
}
