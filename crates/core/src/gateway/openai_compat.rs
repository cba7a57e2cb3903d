//! Gateway for backends speaking the OpenAI chat-completions wire format.
//!
//! Doubao, DeepSeek, and OpenAI share this client and differ only in their
//! [`BackendProfile`]: base URL, model list, and parameter ranges.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::credentials::BackendCredentials;
use super::error::{GatewayError, UpstreamCategory};
use super::retry::{retry_with_backoff, RetryPolicy};
use super::sse::{event_stream, SseEvent, SseStep};
use super::traits::{ChatStream, ProviderGateway};
use super::types::{ChatRequest, ChatResponse, ParamLimits, PreparedChat, TokenUsage};
use crate::metrics::record_gateway_call;

/// Static description of an OpenAI-compatible backend.
#[derive(Debug, Clone, Copy)]
pub struct BackendProfile {
    pub id: &'static str,
    pub base_url: &'static str,
    pub default_model: &'static str,
    pub models: &'static [&'static str],
    pub limits: ParamLimits,
}

pub const DOUBAO: BackendProfile = BackendProfile {
    id: "doubao",
    base_url: "https://ark.cn-beijing.volces.com/api/v3",
    default_model: "doubao-pro-32k",
    models: &[
        "doubao-pro-32k",
        "doubao-pro-256k",
        "doubao-lite-32k",
        "doubao-lite-128k",
        "doubao-lite-4k",
        "doubao-vision-pro",
        "doubao-vision-lite",
        "doubao-1.5-pro-32k",
        "doubao-1.5-lite",
        "doubao-1-5-lite-32k-250115",
    ],
    limits: ParamLimits::new(1.0, 4096),
};

pub const DEEPSEEK: BackendProfile = BackendProfile {
    id: "deepseek",
    base_url: "https://api.deepseek.com",
    default_model: "deepseek-chat",
    models: &["deepseek-chat", "deepseek-reasoner"],
    limits: ParamLimits::new(2.0, 8192),
};

pub const OPENAI: BackendProfile = BackendProfile {
    id: "openai",
    base_url: "https://api.openai.com/v1",
    default_model: "gpt-4o-mini",
    models: &["gpt-4o", "gpt-4o-mini", "gpt-4-turbo", "gpt-3.5-turbo"],
    limits: ParamLimits::new(2.0, 16384),
};

/// OpenAI-compatible chat-completions client.
pub struct OpenAiCompatibleGateway {
    client: reqwest::Client,
    profile: BackendProfile,
    api_key: String,
    base_url: String,
    default_model: String,
    supported_models: Vec<String>,
    retry: RetryPolicy,
}

impl OpenAiCompatibleGateway {
    /// Build a gateway for `profile` from resolved credentials.
    pub fn new(profile: BackendProfile, credentials: BackendCredentials) -> Result<Self, GatewayError> {
        if credentials.api_key.trim().is_empty() {
            return Err(GatewayError::configuration(profile.id, "missing API key"));
        }

        let mut supported_models: Vec<String> =
            profile.models.iter().map(|m| m.to_string()).collect();
        for extra in credentials.extra_models {
            if !supported_models.contains(&extra) {
                supported_models.push(extra);
            }
        }

        let default_model = credentials
            .default_model
            .unwrap_or_else(|| profile.default_model.to_string());
        if !supported_models.contains(&default_model) {
            return Err(GatewayError::configuration(
                profile.id,
                format!("default model '{}' is not a supported model", default_model),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(credentials.timeout)
            .build()
            .map_err(|e| GatewayError::configuration(profile.id, e.to_string()))?;

        Ok(Self {
            client,
            profile,
            api_key: credentials.api_key,
            base_url: credentials
                .base_url
                .unwrap_or_else(|| profile.base_url.to_string())
                .trim_end_matches('/')
                .to_string(),
            default_model,
            supported_models,
            retry: credentials.retry,
        })
    }

    pub fn doubao(credentials: BackendCredentials) -> Result<Self, GatewayError> {
        Self::new(DOUBAO, credentials)
    }

    pub fn deepseek(credentials: BackendCredentials) -> Result<Self, GatewayError> {
        Self::new(DEEPSEEK, credentials)
    }

    pub fn openai(credentials: BackendCredentials) -> Result<Self, GatewayError> {
        Self::new(OPENAI, credentials)
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn send(&self, body: &WireRequest<'_>) -> Result<reqwest::Response, GatewayError> {
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| GatewayError::from_reqwest(self.profile.id, &e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<WireError>(&error_text)
                .map(|e| e.error.message)
                .unwrap_or(error_text);
            return Err(GatewayError::from_status(
                self.profile.id,
                status.as_u16(),
                message,
            ));
        }

        Ok(response)
    }

    async fn complete_once(&self, body: &WireRequest<'_>) -> Result<WireResponse, GatewayError> {
        let response = self.send(body).await?;
        response.json::<WireResponse>().await.map_err(|e| {
            GatewayError::upstream(
                self.profile.id,
                UpstreamCategory::InvalidResponse,
                None,
                e.to_string(),
            )
        })
    }
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

impl<'a> WireRequest<'a> {
    fn new(prepared: &'a PreparedChat, stream: bool) -> Self {
        Self {
            model: &prepared.model,
            messages: prepared
                .messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            temperature: prepared.temperature,
            max_tokens: prepared.max_tokens,
            stream,
        }
    }
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    created: Option<i64>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    /// DeepSeek reasoner only.
    #[serde(default)]
    reasoning_content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct WireStreamChunk {
    #[serde(default)]
    choices: Vec<WireStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct WireStreamChoice {
    #[serde(default)]
    delta: WireDelta,
}

#[derive(Debug, Default, Deserialize)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireError {
    error: WireErrorDetail,
}

#[derive(Debug, Deserialize)]
struct WireErrorDetail {
    message: String,
}

fn decode_stream_event(backend: &str, event: &SseEvent) -> Result<SseStep, GatewayError> {
    let data = event.data.trim();
    if data == "[DONE]" {
        return Ok(SseStep::Done);
    }
    if data.is_empty() {
        return Ok(SseStep::Skip);
    }

    let chunk: WireStreamChunk = serde_json::from_str(data).map_err(|e| {
        GatewayError::upstream(
            backend,
            UpstreamCategory::InvalidResponse,
            None,
            format!("malformed stream chunk: {}", e),
        )
    })?;

    match chunk.choices.into_iter().next().and_then(|c| c.delta.content) {
        Some(text) if !text.is_empty() => Ok(SseStep::Emit(text)),
        _ => Ok(SseStep::Skip),
    }
}

#[async_trait]
impl ProviderGateway for OpenAiCompatibleGateway {
    fn provider(&self) -> &str {
        self.profile.id
    }

    fn supported_models(&self) -> &[String] {
        &self.supported_models
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn limits(&self) -> ParamLimits {
        self.profile.limits
    }

    async fn chat_completion(&self, request: ChatRequest) -> Result<ChatResponse, GatewayError> {
        let prepared = self.prepare(request)?;
        let body = WireRequest::new(&prepared, false);
        let started = Instant::now();

        let this = self;
        let body_ref = &body;
        let result = retry_with_backoff(&self.retry, self.profile.id, move || async move {
            this.complete_once(body_ref).await
        })
        .await;
        let elapsed = started.elapsed();

        let wire = match result {
            Ok(wire) => wire,
            Err(e) => {
                record_gateway_call(self.profile.id, Err(&e), elapsed);
                return Err(e);
            }
        };

        let Some(choice) = wire.choices.into_iter().next() else {
            let e = GatewayError::upstream(
                self.profile.id,
                UpstreamCategory::InvalidResponse,
                None,
                "response contained no choices",
            );
            record_gateway_call(self.profile.id, Err(&e), elapsed);
            return Err(e);
        };

        let usage = wire.usage.unwrap_or_default();
        let usage = TokenUsage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        };

        let mut metadata = serde_json::Map::new();
        if let Some(reason) = choice.finish_reason {
            metadata.insert("finish_reason".into(), reason.into());
        }
        if let Some(id) = wire.id {
            metadata.insert("response_id".into(), id.into());
        }
        if let Some(created) = wire.created {
            metadata.insert("created".into(), created.into());
        }
        if let Some(reasoning) = choice.message.reasoning_content {
            metadata.insert("reasoning_content".into(), reasoning.into());
        }

        record_gateway_call(self.profile.id, Ok(&usage), elapsed);

        Ok(ChatResponse {
            content: choice.message.content.unwrap_or_default(),
            model: wire.model.unwrap_or_else(|| prepared.model.clone()),
            provider: self.profile.id.to_string(),
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
        let body = WireRequest::new(&prepared, true);

        let this = self;
        let body_ref = &body;
        let response = retry_with_backoff(&self.retry, self.profile.id, move || async move {
            this.send(body_ref).await
        })
        .await?;

        let backend = self.profile.id;
        Ok(event_stream(response, backend, move |event| {
            decode_stream_event(backend, event)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::types::ChatMessage;
    use futures::StreamExt;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credentials(server: &MockServer) -> BackendCredentials {
        BackendCredentials::new("test-key")
            .with_base_url(server.uri())
            .with_retry(RetryPolicy {
                max_retries: 2,
                backoff_base_ms: 1,
                max_backoff_ms: 2,
            })
    }

    fn completion_body(content: &str) -> serde_json::Value {
        json!({
            "id": "chatcmpl-1",
            "created": 1700000000,
            "model": "deepseek-chat",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 5, "completion_tokens": 7, "total_tokens": 12}
        })
    }

    #[tokio::test]
    async fn test_chat_completion_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("I use Notion")))
            .expect(1)
            .mount(&server)
            .await;

        let gateway = OpenAiCompatibleGateway::deepseek(credentials(&server)).unwrap();
        let response = gateway
            .chat_completion(ChatRequest::from_prompt("which note app?"))
            .await
            .unwrap();

        assert_eq!(response.content, "I use Notion");
        assert_eq!(response.provider, "deepseek");
        assert_eq!(response.usage.total_tokens, 12);
        assert_eq!(response.metadata["finish_reason"], "stop");
        assert_eq!(response.metadata["response_id"], "chatcmpl-1");
    }

    #[tokio::test]
    async fn test_parameters_are_clamped_before_dispatch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({
                "model": "doubao-pro-32k",
                "temperature": 1.0,
                "max_tokens": 4096
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("ok")))
            .expect(1)
            .mount(&server)
            .await;

        let gateway = OpenAiCompatibleGateway::doubao(credentials(&server)).unwrap();
        let request = ChatRequest::from_prompt("hi")
            .with_temperature(1.8)
            .with_max_tokens(50_000);
        gateway.chat_completion(request).await.unwrap();
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("recovered")))
            .expect(1)
            .mount(&server)
            .await;

        let gateway = OpenAiCompatibleGateway::deepseek(credentials(&server)).unwrap();
        let response = gateway
            .chat_completion(ChatRequest::from_prompt("hi"))
            .await
            .unwrap();
        assert_eq!(response.content, "recovered");
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({"error": {"message": "invalid api key"}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let gateway = OpenAiCompatibleGateway::deepseek(credentials(&server)).unwrap();
        let err = gateway
            .chat_completion(ChatRequest::from_prompt("hi"))
            .await
            .unwrap_err();

        match err {
            GatewayError::Upstream {
                status, message, category, ..
            } => {
                assert_eq!(status, Some(401));
                assert_eq!(category, UpstreamCategory::ClientError);
                assert_eq!(message, "invalid api key");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_validation_happens_before_network() {
        let server = MockServer::start().await;
        let gateway = OpenAiCompatibleGateway::deepseek(credentials(&server)).unwrap();

        let err = gateway
            .chat_completion(ChatRequest::new(vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Validation { .. }));

        let err = gateway
            .chat_completion(ChatRequest::from_prompt("hi").with_model("gpt-4o"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Configuration { .. }));

        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reasoning_content_lands_in_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "r1",
                "model": "deepseek-reasoner",
                "choices": [{
                    "message": {"role": "assistant", "content": "Obsidian", "reasoning_content": "thinking"},
                    "finish_reason": "stop"
                }]
            })))
            .mount(&server)
            .await;

        let gateway = OpenAiCompatibleGateway::deepseek(credentials(&server)).unwrap();
        let response = gateway
            .chat_completion(
                ChatRequest::new(vec![ChatMessage::user("hi")]).with_model("deepseek-reasoner"),
            )
            .await
            .unwrap();
        assert_eq!(response.metadata["reasoning_content"], "thinking");
        assert_eq!(response.usage, TokenUsage::default());
    }

    #[tokio::test]
    async fn test_stream_yields_deltas_until_done() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Not\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ion\"}}]}\n\n",
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let gateway = OpenAiCompatibleGateway::deepseek(credentials(&server)).unwrap();
        let stream = gateway
            .chat_completion_stream(ChatRequest::from_prompt("hi"))
            .await
            .unwrap();
        let parts: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(parts, vec!["Not".to_string(), "ion".to_string()]);
    }

    #[tokio::test]
    async fn test_stream_without_done_marker_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n"),
            )
            .mount(&server)
            .await;

        let gateway = OpenAiCompatibleGateway::deepseek(credentials(&server)).unwrap();
        let items: Vec<_> = gateway
            .chat_completion_stream(ChatRequest::from_prompt("hi"))
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "a");
        assert!(matches!(
            items[1],
            Err(GatewayError::Upstream {
                category: UpstreamCategory::InvalidResponse,
                ..
            })
        ));
    }

    #[test]
    fn test_construction_requires_api_key_and_known_default_model() {
        let err = OpenAiCompatibleGateway::openai(BackendCredentials::new("  "))
            .err()
            .unwrap();
        assert!(matches!(err, GatewayError::Configuration { .. }));

        let err = OpenAiCompatibleGateway::openai(
            BackendCredentials::new("k").with_default_model("my-finetune"),
        )
        .err()
        .unwrap();
        assert!(err.to_string().contains("my-finetune"));

        let gateway = OpenAiCompatibleGateway::openai(
            BackendCredentials::new("k")
                .with_default_model("my-finetune")
                .with_extra_models(vec!["my-finetune".to_string()]),
        )
        .unwrap();
        assert_eq!(gateway.default_model(), "my-finetune");
        assert!(gateway.supported_models().contains(&"gpt-4o".to_string()));
    }
}
