use super::{types::Config, ConfigError};

/// Validate configuration.
///
/// Collects every problem and reports them together.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut problems = Vec::new();

    if config.server.port == 0 {
        problems.push("server.port cannot be 0".to_string());
    }
    if config.database.path.as_os_str().is_empty() {
        problems.push("database.path cannot be empty".to_string());
    }

    let detection = &config.detection;
    if !(0.0..=2.0).contains(&detection.temperature) {
        problems.push(format!(
            "detection.temperature must be within [0, 2], got {}",
            detection.temperature
        ));
    }
    if detection.max_tokens == 0 {
        problems.push("detection.max_tokens cannot be 0".to_string());
    }
    if detection.max_brands == 0 {
        problems.push("detection.max_brands cannot be 0".to_string());
    }
    if detection.max_models == 0 {
        problems.push("detection.max_models cannot be 0".to_string());
    }
    for model in &detection.default_models {
        let (backend, _) = crate::gateway::parse_model_identifier(model);
        if !config.gateways.contains_key(backend) {
            problems.push(format!(
                "detection.default_models entry '{}' has no [gateways.{}] section",
                model, backend
            ));
        }
    }

    for (id, gateway) in &config.gateways {
        if gateway.api_key.trim().is_empty() {
            problems.push(format!("gateways.{}.api_key cannot be empty", id));
        }
        if let Some(url) = &gateway.base_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                problems.push(format!(
                    "gateways.{}.base_url must start with http:// or https://",
                    id
                ));
            }
        }
        if gateway.timeout_secs == 0 {
            problems.push(format!("gateways.{}.timeout_secs cannot be 0", id));
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(problems.join("; ")))
    }
}
