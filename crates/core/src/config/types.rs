use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use crate::detection::ExecutionMode;
use crate::gateway::RetryPolicy;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    /// Gateway settings keyed by backend identifier.
    #[serde(default)]
    pub gateways: BTreeMap<String, GatewayConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("brandlens.db")
}

/// Brand catalog location. `None` uses the built-in catalog.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CatalogConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Defaults and limits for detection requests.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DetectionConfig {
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_brands")]
    pub max_brands: usize,
    #[serde(default = "default_max_models")]
    pub max_models: usize,
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,
    /// Models used when a request does not list any.
    #[serde(default = "default_models")]
    pub default_models: Vec<String>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            execution_mode: ExecutionMode::default(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_brands: default_max_brands(),
            max_models: default_max_models(),
            max_prompt_chars: default_max_prompt_chars(),
            default_models: default_models(),
        }
    }
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_tokens() -> u32 {
    300
}

fn default_max_brands() -> usize {
    50
}

fn default_max_models() -> usize {
    8
}

fn default_max_prompt_chars() -> usize {
    8000
}

fn default_models() -> Vec<String> {
    vec!["doubao".to_string(), "deepseek".to_string()]
}

/// One backend's connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    /// API key. `${VAR}` reads the key from the environment at resolve time.
    pub api_key: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub default_model: Option<String>,
    /// Models accepted in addition to the backend's built-in list.
    #[serde(default)]
    pub extra_models: Vec<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_timeout() -> u64 {
    30
}

/// Log output configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub catalog: CatalogConfig,
    pub detection: DetectionConfig,
    pub gateways: BTreeMap<String, SanitizedGatewayConfig>,
    pub logging: LoggingConfig,
}

/// Gateway config with the API key hidden
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedGatewayConfig {
    pub api_key_configured: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    pub extra_models: Vec<String>,
    pub timeout_secs: u64,
    pub retry: RetryPolicy,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            catalog: config.catalog.clone(),
            detection: config.detection.clone(),
            gateways: config
                .gateways
                .iter()
                .map(|(id, g)| {
                    (
                        id.clone(),
                        SanitizedGatewayConfig {
                            api_key_configured: !g.api_key.trim().is_empty(),
                            base_url: g.base_url.clone(),
                            default_model: g.default_model.clone(),
                            extra_models: g.extra_models.clone(),
                            timeout_secs: g.timeout_secs,
                            retry: g.retry,
                        },
                    )
                })
                .collect(),
            logging: config.logging.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.path.to_str().unwrap(), "brandlens.db");
        assert!(config.catalog.path.is_none());
        assert_eq!(config.detection.execution_mode, ExecutionMode::Parallel);
        assert_eq!(config.detection.max_tokens, 300);
        assert!(config.gateways.is_empty());
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_deserialize_gateways() {
        let toml = r#"
[detection]
execution_mode = "sequential"
default_models = ["deepseek"]

[gateways.deepseek]
api_key = "sk-123"
default_model = "deepseek-reasoner"

[gateways.doubao]
api_key = "${DOUBAO_KEY}"
base_url = "http://localhost:9000"
timeout_secs = 5

[gateways.doubao.retry]
max_retries = 1
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.detection.execution_mode, ExecutionMode::Sequential);

        let deepseek = &config.gateways["deepseek"];
        assert_eq!(deepseek.default_model.as_deref(), Some("deepseek-reasoner"));
        assert_eq!(deepseek.timeout_secs, 30);
        assert_eq!(deepseek.retry, RetryPolicy::default());

        let doubao = &config.gateways["doubao"];
        assert_eq!(doubao.timeout_secs, 5);
        assert_eq!(doubao.retry.max_retries, 1);
        assert_eq!(doubao.retry.backoff_base_ms, 500);
    }

    #[test]
    fn test_gateway_requires_api_key() {
        let toml = r#"
[gateways.deepseek]
base_url = "http://localhost"
"#;
        assert!(toml::from_str::<Config>(toml).is_err());
    }

    #[test]
    fn test_sanitized_config_hides_api_keys() {
        let toml = r#"
[gateways.deepseek]
api_key = "sk-very-secret"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let sanitized = SanitizedConfig::from(&config);
        assert!(sanitized.gateways["deepseek"].api_key_configured);

        let json = serde_json::to_string(&sanitized).unwrap();
        assert!(!json.contains("sk-very-secret"));
        assert!(json.contains("api_key_configured"));
    }
}
