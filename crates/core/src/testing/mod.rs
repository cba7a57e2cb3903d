//! Testing utilities and mock implementations.
//!
//! Mocks for the gateway and repository seams, plus fixtures, so detection
//! and HTTP tests run without network access or a database file.
//!
//! # Example
//!
//! ```rust,ignore
//! use brandlens_core::testing::{fixtures, MockGateway};
//!
//! let registry = GatewayRegistry::new();
//! registry.insert_instance("a", Arc::new(MockGateway::new("a").with_response("Notion")));
//! let credentials = fixtures::credentials();
//! ```

mod failing_repository;
mod mock_gateway;

pub use failing_repository::{FailingRepository, RepoOp};
pub use mock_gateway::MockGateway;

/// Test fixtures and helper functions.
pub mod fixtures {
    use uuid::Uuid;

    use crate::config::DetectionConfig;
    use crate::detection::{
        timestamp_now, CheckStatus, DetectionCheck, ExecutionMode, ModelError, ModelErrorKind,
        ModelResult,
    };
    use crate::gateway::{BackendCredentials, RetryPolicy, StaticCredentials, TokenUsage};
    use crate::matcher::{BrandCatalog, BrandMatcher, BrandMention};
    use std::sync::Arc;

    /// Response text used by [`completed_check`].
    pub const NOTION_ANSWER: &str =
        "For personal knowledge management I recommend Notion. It handles databases well.";

    /// Detection limits with `doubao` and `deepseek` as default models.
    pub fn detection_config() -> DetectionConfig {
        DetectionConfig::default()
    }

    /// Credentials for the built-in backends, with retries disabled.
    pub fn credentials() -> StaticCredentials {
        let creds = |key: &str| BackendCredentials::new(key).with_retry(RetryPolicy::none());
        StaticCredentials::new()
            .with("doubao", creds("test-doubao-key"))
            .with("deepseek", creds("test-deepseek-key"))
            .with("openai", creds("test-openai-key"))
            .with("anthropic", creds("test-anthropic-key"))
    }

    /// Matcher over the built-in catalog.
    pub fn matcher() -> BrandMatcher {
        // The bundled catalog is validated by its own tests.
        BrandMatcher::new(Arc::new(
            BrandCatalog::builtin().unwrap_or_else(|_| BrandCatalog::empty()),
        ))
    }

    fn brands() -> Vec<String> {
        vec!["Notion".to_string(), "Obsidian".to_string()]
    }

    /// A pending check for `project_id` over Notion and Obsidian.
    pub fn pending_check(project_id: &str) -> DetectionCheck {
        DetectionCheck {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            user_id: "user-1".to_string(),
            prompt: "What are the best note-taking apps?".to_string(),
            brands: brands(),
            models: vec!["doubao".to_string(), "deepseek".to_string()],
            temperature: 0.3,
            max_tokens: 300,
            execution_mode: ExecutionMode::Parallel,
            metadata: serde_json::Map::new(),
            status: CheckStatus::Pending,
            created_at: timestamp_now(),
            completed_at: None,
            results: Vec::new(),
            summary: None,
        }
    }

    /// A check whose results are not yet persisted: doubao mentions Notion,
    /// deepseek failed upstream.
    pub fn completed_check(project_id: &str) -> DetectionCheck {
        let mut check = pending_check(project_id);
        let matcher = matcher();

        check.results = vec![
            ModelResult {
                model: "doubao".to_string(),
                ordinal: 0,
                response_text: NOTION_ANSWER.to_string(),
                mentions: matcher.match_all(NOTION_ANSWER, &check.brands),
                latency_ms: 120,
                usage: Some(TokenUsage {
                    prompt_tokens: 8,
                    completion_tokens: 14,
                    total_tokens: 22,
                }),
                error: None,
            },
            ModelResult {
                model: "deepseek".to_string(),
                ordinal: 1,
                response_text: String::new(),
                mentions: check.brands.iter().map(BrandMention::not_mentioned).collect(),
                latency_ms: 40,
                usage: None,
                error: Some(ModelError {
                    kind: ModelErrorKind::Upstream,
                    message: "deepseek: server error (HTTP 503)".to_string(),
                }),
            },
        ];
        check
    }
}
