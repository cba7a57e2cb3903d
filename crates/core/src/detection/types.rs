use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::gateway::{GatewayError, TokenUsage};
use crate::matcher::BrandMention;

/// The current time at the microsecond precision the repository stores.
pub fn timestamp_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// How the orchestrator invokes backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// All models at once; results reassembled in request order.
    #[default]
    Parallel,
    /// One model at a time, in request order.
    Sequential,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Parallel => "parallel",
            ExecutionMode::Sequential => "sequential",
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "parallel" => Ok(ExecutionMode::Parallel),
            "sequential" => Ok(ExecutionMode::Sequential),
            other => Err(format!("unknown execution mode: {}", other)),
        }
    }
}

/// Lifecycle of a detection check.
///
/// `pending -> running -> completed | failed`. A pending check may also fail
/// directly. Terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Pending => "pending",
            CheckStatus::Running => "running",
            CheckStatus::Completed => "completed",
            CheckStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CheckStatus::Completed | CheckStatus::Failed)
    }

    pub fn can_transition_to(&self, next: CheckStatus) -> bool {
        matches!(
            (self, next),
            (CheckStatus::Pending, CheckStatus::Running)
                | (CheckStatus::Pending, CheckStatus::Failed)
                | (CheckStatus::Running, CheckStatus::Completed)
                | (CheckStatus::Running, CheckStatus::Failed)
        )
    }

    /// Stored statuses from which a write of `self` is accepted.
    ///
    /// Includes `self` so a retried write is a no-op rather than a conflict.
    pub fn accepted_from(&self) -> &'static [CheckStatus] {
        match self {
            CheckStatus::Pending => &[CheckStatus::Pending],
            CheckStatus::Running => &[CheckStatus::Pending, CheckStatus::Running],
            CheckStatus::Completed => &[CheckStatus::Running, CheckStatus::Completed],
            CheckStatus::Failed => &[
                CheckStatus::Pending,
                CheckStatus::Running,
                CheckStatus::Failed,
            ],
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CheckStatus::Pending),
            "running" => Ok(CheckStatus::Running),
            "completed" => Ok(CheckStatus::Completed),
            "failed" => Ok(CheckStatus::Failed),
            other => Err(format!("unknown check status: {}", other)),
        }
    }
}

/// An incoming detection request.
///
/// Optional sampling fields fall back to the configured detection defaults.
/// An empty model list uses the configured default models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRequest {
    pub project_id: String,
    pub user_id: String,
    pub prompt: String,
    pub brands: Vec<String>,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub execution_mode: Option<ExecutionMode>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl DetectionRequest {
    pub fn new(
        project_id: impl Into<String>,
        user_id: impl Into<String>,
        prompt: impl Into<String>,
        brands: Vec<String>,
        models: Vec<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            user_id: user_id.into(),
            prompt: prompt.into(),
            brands,
            models,
            temperature: None,
            max_tokens: None,
            execution_mode: None,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = Some(mode);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelErrorKind {
    Validation,
    Configuration,
    Upstream,
}

impl ModelErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelErrorKind::Validation => "validation",
            ModelErrorKind::Configuration => "configuration",
            ModelErrorKind::Upstream => "upstream",
        }
    }
}

impl FromStr for ModelErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "validation" => Ok(ModelErrorKind::Validation),
            "configuration" => Ok(ModelErrorKind::Configuration),
            "upstream" => Ok(ModelErrorKind::Upstream),
            other => Err(format!("unknown model error kind: {}", other)),
        }
    }
}

/// Error tag on a failed model result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelError {
    pub kind: ModelErrorKind,
    pub message: String,
}

impl From<&GatewayError> for ModelError {
    fn from(err: &GatewayError) -> Self {
        let kind = match err {
            GatewayError::Validation { .. } => ModelErrorKind::Validation,
            GatewayError::Configuration { .. } => ModelErrorKind::Configuration,
            GatewayError::Upstream { .. } => ModelErrorKind::Upstream,
        };
        Self {
            kind,
            message: err.to_string(),
        }
    }
}

/// One model's answer and the mentions found in it.
///
/// `mentions` always has one entry per requested brand, in brand order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResult {
    pub model: String,
    /// Position in the requested model list.
    pub ordinal: usize,
    /// Empty when the call failed.
    pub response_text: String,
    pub mentions: Vec<BrandMention>,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ModelError>,
}

impl ModelResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn mention_count(&self) -> usize {
        self.mentions.iter().filter(|m| m.mentioned).count()
    }
}

/// Aggregate statistics over one check's results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionSummary {
    pub total_mentions: usize,
    /// Brands mentioned by at least one model, in request order.
    pub brands_mentioned: Vec<String>,
    /// `total_mentions / (brands * successful models)`, 0 when nothing succeeded.
    pub mention_rate: f64,
    /// Mean confidence over mentioned entries only.
    pub avg_confidence: f64,
    pub successful_models: usize,
    pub failed_models: usize,
}

impl DetectionSummary {
    pub fn from_results(brands: &[String], results: &[ModelResult]) -> Self {
        let successful: Vec<&ModelResult> = results.iter().filter(|r| r.is_success()).collect();

        let mentioned: Vec<&BrandMention> = successful
            .iter()
            .flat_map(|r| r.mentions.iter())
            .filter(|m| m.mentioned)
            .collect();

        let brands_mentioned = brands
            .iter()
            .filter(|b| mentioned.iter().any(|m| &m.brand == *b))
            .cloned()
            .collect();

        let denominator = brands.len() * successful.len();
        let mention_rate = if denominator == 0 {
            0.0
        } else {
            mentioned.len() as f64 / denominator as f64
        };

        let avg_confidence = if mentioned.is_empty() {
            0.0
        } else {
            mentioned.iter().map(|m| m.confidence).sum::<f64>() / mentioned.len() as f64
        };

        Self {
            total_mentions: mentioned.len(),
            brands_mentioned,
            mention_rate,
            avg_confidence,
            successful_models: successful.len(),
            failed_models: results.len() - successful.len(),
        }
    }
}

/// Aggregate root for one detection request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionCheck {
    pub id: String,
    pub project_id: String,
    pub user_id: String,
    pub prompt: String,
    pub brands: Vec<String>,
    pub models: Vec<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub execution_mode: ExecutionMode,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub status: CheckStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub results: Vec<ModelResult>,
    pub summary: Option<DetectionSummary>,
}

impl DetectionCheck {
    /// Move to `next`, rejecting backward or repeated transitions.
    pub fn transition(&mut self, next: CheckStatus) -> Result<(), super::DetectionError> {
        if !self.status.can_transition_to(next) {
            return Err(super::DetectionError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(timestamp_now());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::MatchMethods;

    fn mention(brand: &str, mentioned: bool, confidence: f64) -> BrandMention {
        BrandMention {
            brand: brand.to_string(),
            mentioned,
            confidence,
            positions: if mentioned { vec![0] } else { vec![] },
            contexts: vec![],
            method: if mentioned {
                MatchMethods {
                    exact: true,
                    ..MatchMethods::NONE
                }
            } else {
                MatchMethods::NONE
            },
        }
    }

    fn result(model: &str, ordinal: usize, mentions: Vec<BrandMention>) -> ModelResult {
        ModelResult {
            model: model.to_string(),
            ordinal,
            response_text: "text".to_string(),
            mentions,
            latency_ms: 1,
            usage: None,
            error: None,
        }
    }

    #[test]
    fn test_status_transitions_are_monotonic() {
        use CheckStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Pending.can_transition_to(Failed));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Running.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Running));
        assert!(!Completed.can_transition_to(Completed));
    }

    #[test]
    fn test_timestamps_survive_microsecond_storage() {
        use chrono::{SecondsFormat, Timelike};

        let mut check = crate::testing::fixtures::pending_check("proj-1");
        check.created_at = timestamp_now();
        check.transition(CheckStatus::Running).unwrap();
        check.transition(CheckStatus::Completed).unwrap();

        for stamp in [check.created_at, check.completed_at.unwrap()] {
            assert_eq!(stamp.nanosecond() % 1_000, 0);
            let stored = stamp.to_rfc3339_opts(SecondsFormat::Micros, true);
            let parsed = DateTime::parse_from_rfc3339(&stored)
                .unwrap()
                .with_timezone(&Utc);
            assert_eq!(parsed, stamp);
        }
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            CheckStatus::Pending,
            CheckStatus::Running,
            CheckStatus::Completed,
            CheckStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<CheckStatus>().unwrap(), status);
        }
        assert!("done".parse::<CheckStatus>().is_err());
    }

    #[test]
    fn test_summary_counts_only_successful_models() {
        let brands = vec!["A".to_string(), "B".to_string()];
        let mut failed = result("m2", 1, vec![mention("A", false, 0.0), mention("B", false, 0.0)]);
        failed.error = Some(ModelError {
            kind: ModelErrorKind::Upstream,
            message: "boom".to_string(),
        });
        failed.response_text.clear();

        let results = vec![
            result("m1", 0, vec![mention("A", true, 0.9), mention("B", false, 0.0)]),
            failed,
        ];
        let summary = DetectionSummary::from_results(&brands, &results);

        assert_eq!(summary.total_mentions, 1);
        assert_eq!(summary.brands_mentioned, vec!["A".to_string()]);
        assert!((summary.mention_rate - 0.5).abs() < 1e-9);
        assert!((summary.avg_confidence - 0.9).abs() < 1e-9);
        assert_eq!(summary.successful_models, 1);
        assert_eq!(summary.failed_models, 1);
    }

    #[test]
    fn test_summary_with_no_successful_models() {
        let brands = vec!["A".to_string()];
        let summary = DetectionSummary::from_results(&brands, &[]);
        assert_eq!(summary.mention_rate, 0.0);
        assert_eq!(summary.avg_confidence, 0.0);
        assert!(summary.brands_mentioned.is_empty());
    }

    #[test]
    fn test_total_mentions_equals_sum_over_results() {
        let brands = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let results = vec![
            result(
                "m1",
                0,
                vec![mention("A", true, 0.9), mention("B", true, 0.7), mention("C", false, 0.0)],
            ),
            result(
                "m2",
                1,
                vec![mention("A", true, 1.0), mention("B", false, 0.0), mention("C", false, 0.0)],
            ),
        ];
        let summary = DetectionSummary::from_results(&brands, &results);
        let sum: usize = results.iter().map(|r| r.mention_count()).sum();
        assert_eq!(summary.total_mentions, sum);
        assert_eq!(summary.brands_mentioned, vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn test_request_deserializes_with_optional_fields() {
        let json = r#"{
            "project_id": "p1",
            "user_id": "u1",
            "prompt": "best note apps?",
            "brands": ["Notion"],
            "execution_mode": "sequential"
        }"#;
        let request: DetectionRequest = serde_json::from_str(json).unwrap();
        assert!(request.models.is_empty());
        assert_eq!(request.execution_mode, Some(ExecutionMode::Sequential));
        assert!(request.temperature.is_none());
    }

    #[test]
    fn test_model_error_from_gateway_error() {
        let err = GatewayError::configuration("ghost", "unknown");
        let tag = ModelError::from(&err);
        assert_eq!(tag.kind, ModelErrorKind::Configuration);
        assert!(tag.message.contains("ghost"));
    }
}
