//! Common test utilities for API testing with mock gateways.
//!
//! The fixture builds an in-process router over a temporary SQLite database
//! and a registry whose `doubao` and `deepseek` backends are mocks.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use brandlens_core::{
    testing::MockGateway, BrandCatalog, Config, DatabaseConfig, GatewayRegistry,
    MentionRepository, ProviderGateway, SqliteMentionRepository,
};

/// Re-export fixtures for test convenience
#[allow(unused_imports)]
pub use brandlens_core::testing::fixtures;

/// Text the `doubao` mock answers with by default.
pub const DOUBAO_ANSWER: &str = "I recommend Notion for team wikis and databases.";

/// Text the `deepseek` mock answers with by default.
pub const DEEPSEEK_ANSWER: &str = "Obsidian keeps your notes local. Notion is also popular.";

/// In-process server with controllable gateways.
#[allow(dead_code)]
pub struct TestFixture {
    pub router: Router,
    pub doubao: Arc<MockGateway>,
    pub deepseek: Arc<MockGateway>,
    pub repository: Arc<dyn MentionRepository>,
    /// Holds the database file for the fixture's lifetime
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
    /// Raw body, for non-JSON responses
    #[allow(dead_code)]
    pub text: String,
}

#[allow(dead_code)]
impl TestFixture {
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let doubao = Arc::new(MockGateway::new("doubao").with_response(DOUBAO_ANSWER));
        let deepseek = Arc::new(MockGateway::new("deepseek").with_response(DEEPSEEK_ANSWER));

        let registry = Arc::new(GatewayRegistry::with_builtin_backends());
        registry.insert_instance("doubao", Arc::clone(&doubao) as Arc<dyn ProviderGateway>);
        registry.insert_instance(
            "deepseek",
            Arc::clone(&deepseek) as Arc<dyn ProviderGateway>,
        );

        let config = Config {
            database: DatabaseConfig {
                path: db_path.clone(),
            },
            ..Config::default()
        };

        let repository: Arc<dyn MentionRepository> = Arc::new(
            SqliteMentionRepository::new(&db_path).expect("Failed to create repository"),
        );
        let catalog = Arc::new(BrandCatalog::builtin().expect("builtin catalog"));

        let state = Arc::new(brandlens_server::state::AppState::new(
            config,
            registry,
            Arc::clone(&repository),
            catalog,
        ));
        let router = brandlens_server::api::create_router(state);

        Self {
            router,
            doubao,
            deepseek,
            repository,
            temp_dir,
        }
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a POST request with raw string body (for testing malformed JSON).
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        self.send(request_builder.body(body).unwrap()).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let text = String::from_utf8_lossy(&body_bytes).into_owned();
        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body, text }
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}
