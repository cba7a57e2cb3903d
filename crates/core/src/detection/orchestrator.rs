//! Fan-out of one prompt across backends, with matching and persistence.

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::error::DetectionError;
use super::types::{
    timestamp_now, CheckStatus, DetectionCheck, DetectionRequest, DetectionSummary, ExecutionMode,
    ModelError, ModelResult,
};
use crate::config::DetectionConfig;
use crate::gateway::{
    parse_model_identifier, ChatRequest, ChatResponse, CredentialSource, GatewayError,
    GatewayRegistry,
};
use crate::matcher::{BrandMatcher, BrandMention};
use crate::metrics::{DETECTION_CHECKS, MATCH_CONFIDENCE, MODEL_OUTCOMES};
use crate::repository::{MentionRepository, RepositoryError, StatusUpdate};

/// Outcome of one backend call before matching.
struct ModelOutcome {
    result: Result<ChatResponse, GatewayError>,
    latency_ms: u64,
}

/// Runs detection checks.
///
/// A check is persisted as pending and moved to running before any backend is
/// called. Backend failures are isolated per model; only persistence failures
/// fail the check as a whole.
pub struct DetectionOrchestrator {
    registry: Arc<GatewayRegistry>,
    repository: Arc<dyn MentionRepository>,
    credentials: Arc<dyn CredentialSource>,
    matcher: BrandMatcher,
    config: DetectionConfig,
}

impl DetectionOrchestrator {
    pub fn new(
        registry: Arc<GatewayRegistry>,
        repository: Arc<dyn MentionRepository>,
        credentials: Arc<dyn CredentialSource>,
        matcher: BrandMatcher,
        config: DetectionConfig,
    ) -> Self {
        Self {
            registry,
            repository,
            credentials,
            matcher,
            config,
        }
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    pub fn matcher(&self) -> &BrandMatcher {
        &self.matcher
    }

    /// Trim and deduplicate a brand list, keeping first occurrences.
    ///
    /// Rejects blank names, an empty list, and lists over `max_brands`.
    pub fn normalize_brands(&self, brands: &[String]) -> Result<Vec<String>, DetectionError> {
        if brands.iter().any(|b| b.trim().is_empty()) {
            return Err(DetectionError::Validation(
                "brand names must not be blank".into(),
            ));
        }
        let brands = dedup(brands.iter().map(|b| b.trim().to_string()));
        if brands.is_empty() {
            return Err(DetectionError::Validation(
                "at least one brand is required".into(),
            ));
        }
        if brands.len() > self.config.max_brands {
            return Err(DetectionError::Validation(format!(
                "{} brands requested, limit is {}",
                brands.len(),
                self.config.max_brands
            )));
        }
        Ok(brands)
    }

    /// Validate a request and build the pending check it describes.
    ///
    /// Fills unset sampling fields and models from the configured defaults and
    /// drops duplicate brands and models, keeping first occurrences.
    pub fn prepare_check(&self, request: DetectionRequest) -> Result<DetectionCheck, DetectionError> {
        let prompt = request.prompt.trim();
        if prompt.is_empty() {
            return Err(DetectionError::Validation("prompt must not be empty".into()));
        }
        let prompt_chars = prompt.chars().count();
        if prompt_chars > self.config.max_prompt_chars {
            return Err(DetectionError::Validation(format!(
                "prompt is {} characters, limit is {}",
                prompt_chars, self.config.max_prompt_chars
            )));
        }

        let brands = self.normalize_brands(&request.brands)?;

        let models = if request.models.is_empty() {
            self.config.default_models.clone()
        } else {
            request.models.clone()
        };
        if models.iter().any(|m| m.trim().is_empty()) {
            return Err(DetectionError::Validation(
                "model identifiers must not be blank".into(),
            ));
        }
        let models = dedup(models.iter().map(|m| m.trim().to_string()));
        if models.is_empty() {
            return Err(DetectionError::Validation(
                "at least one model is required".into(),
            ));
        }
        if models.len() > self.config.max_models {
            return Err(DetectionError::Validation(format!(
                "{} models requested, limit is {}",
                models.len(),
                self.config.max_models
            )));
        }

        let temperature = request.temperature.unwrap_or(self.config.temperature);
        if !temperature.is_finite() {
            return Err(DetectionError::Validation(
                "temperature must be a finite number".into(),
            ));
        }
        let max_tokens = request.max_tokens.unwrap_or(self.config.max_tokens);

        Ok(DetectionCheck {
            id: Uuid::new_v4().to_string(),
            project_id: request.project_id,
            user_id: request.user_id,
            prompt: prompt.to_string(),
            brands,
            models,
            temperature,
            max_tokens,
            execution_mode: request
                .execution_mode
                .unwrap_or(self.config.execution_mode),
            metadata: request.metadata,
            status: CheckStatus::Pending,
            created_at: timestamp_now(),
            completed_at: None,
            results: Vec::new(),
            summary: None,
        })
    }

    /// Execute a detection request end to end.
    ///
    /// Returns the completed check. Backend failures show up as error-tagged
    /// results inside it; an `Err` means validation or persistence failed.
    pub async fn execute(&self, request: DetectionRequest) -> Result<DetectionCheck, DetectionError> {
        let mut check = self.prepare_check(request)?;

        self.repository.create_check(&check).await?;
        check.transition(CheckStatus::Running)?;
        if let Err(e) = self
            .write_status(&check.id, StatusUpdate::running())
            .await
        {
            self.mark_failed(&mut check, &e).await;
            return Err(e.into());
        }

        info!(
            check_id = %check.id,
            project_id = %check.project_id,
            models = check.models.len(),
            brands = check.brands.len(),
            mode = check.execution_mode.as_str(),
            "Detection check running"
        );

        let outcomes = self.invoke_models(&check).await;
        check.results = self.build_results(&check, outcomes);
        let summary = DetectionSummary::from_results(&check.brands, &check.results);
        check.summary = Some(summary.clone());

        if let Err(e) = self.persist_results(&check).await {
            self.mark_failed(&mut check, &e).await;
            return Err(e.into());
        }

        check.transition(CheckStatus::Completed)?;
        let update = StatusUpdate::completed(summary, check.completed_at.unwrap_or_else(timestamp_now));
        if let Err(e) = self.write_status(&check.id, update).await {
            // The in-memory check already reads completed; roll it back so the
            // failed write below is accepted.
            check.status = CheckStatus::Running;
            self.mark_failed(&mut check, &e).await;
            return Err(e.into());
        }

        DETECTION_CHECKS
            .with_label_values(&[CheckStatus::Completed.as_str()])
            .inc();

        if let Some(summary) = &check.summary {
            info!(
                check_id = %check.id,
                total_mentions = summary.total_mentions,
                mention_rate = summary.mention_rate,
                failed_models = summary.failed_models,
                "Detection check completed"
            );
        }

        Ok(check)
    }

    async fn invoke_models(&self, check: &DetectionCheck) -> Vec<ModelOutcome> {
        let request = ChatRequest::from_prompt(check.prompt.clone())
            .with_temperature(check.temperature)
            .with_max_tokens(check.max_tokens);

        match check.execution_mode {
            ExecutionMode::Parallel => {
                join_all(
                    check
                        .models
                        .iter()
                        .map(|model| self.invoke_model(&check.id, model, &request)),
                )
                .await
            }
            ExecutionMode::Sequential => {
                let mut outcomes = Vec::with_capacity(check.models.len());
                for model in &check.models {
                    outcomes.push(self.invoke_model(&check.id, model, &request).await);
                }
                outcomes
            }
        }
    }

    async fn invoke_model(&self, check_id: &str, model_id: &str, request: &ChatRequest) -> ModelOutcome {
        let started = Instant::now();
        let (backend, model_override) = parse_model_identifier(model_id);

        let result = match self.registry.resolve(backend, self.credentials.as_ref()) {
            Ok(gateway) => {
                let mut request = request.clone();
                if let Some(model) = model_override {
                    request = request.with_model(model);
                }
                gateway.chat_completion(request).await
            }
            Err(e) => Err(e),
        };

        let latency_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(response) => debug!(
                check_id,
                model = model_id,
                latency_ms,
                chars = response.content.chars().count(),
                "Model responded"
            ),
            Err(e) => warn!(
                check_id,
                model = model_id,
                latency_ms,
                error = %e,
                "Model call failed"
            ),
        }

        ModelOutcome { result, latency_ms }
    }

    fn build_results(&self, check: &DetectionCheck, outcomes: Vec<ModelOutcome>) -> Vec<ModelResult> {
        check
            .models
            .iter()
            .zip(outcomes)
            .enumerate()
            .map(|(ordinal, (model, outcome))| match outcome.result {
                Ok(response) => {
                    MODEL_OUTCOMES.with_label_values(&[model.as_str(), "ok"]).inc();
                    let mentions = self.matcher.match_all(&response.content, &check.brands);
                    for mention in &mentions {
                        if mention.mentioned {
                            MATCH_CONFIDENCE
                                .with_label_values(&[])
                                .observe(mention.confidence);
                        }
                        debug!(
                            check_id = %check.id,
                            model = %model,
                            brand = %mention.brand,
                            mentioned = mention.mentioned,
                            confidence = mention.confidence,
                            method = %mention.method,
                            "Brand match"
                        );
                    }
                    ModelResult {
                        model: model.clone(),
                        ordinal,
                        response_text: response.content,
                        mentions,
                        latency_ms: outcome.latency_ms,
                        usage: Some(response.usage),
                        error: None,
                    }
                }
                Err(e) => {
                    MODEL_OUTCOMES.with_label_values(&[model.as_str(), e.kind()]).inc();
                    ModelResult {
                        model: model.clone(),
                        ordinal,
                        response_text: String::new(),
                        mentions: check
                            .brands
                            .iter()
                            .map(BrandMention::not_mentioned)
                            .collect(),
                        latency_ms: outcome.latency_ms,
                        usage: None,
                        error: Some(ModelError::from(&e)),
                    }
                }
            })
            .collect()
    }

    async fn persist_results(&self, check: &DetectionCheck) -> Result<(), RepositoryError> {
        for result in &check.results {
            let result_id = self.repository.save_result(&check.id, result).await?;
            self.repository
                .save_mentions(&check.id, &result_id, &result.mentions)
                .await?;
        }
        Ok(())
    }

    async fn write_status(&self, check_id: &str, update: StatusUpdate) -> Result<(), RepositoryError> {
        let status = update.status;
        if self.repository.update_check_status(check_id, update).await? {
            Ok(())
        } else {
            Err(RepositoryError::Conflict(format!(
                "check {} rejected transition to {}",
                check_id, status
            )))
        }
    }

    /// Best-effort write of the failed status after an unrecoverable error.
    async fn mark_failed(&self, check: &mut DetectionCheck, cause: &RepositoryError) {
        error!(check_id = %check.id, error = %cause, "Detection check failed");
        DETECTION_CHECKS
            .with_label_values(&[CheckStatus::Failed.as_str()])
            .inc();

        if check.transition(CheckStatus::Failed).is_err() {
            return;
        }
        let completed_at = check.completed_at.unwrap_or_else(timestamp_now);
        if let Err(e) = self
            .repository
            .update_check_status(&check.id, StatusUpdate::failed(completed_at))
            .await
        {
            error!(check_id = %check.id, error = %e, "Could not record failed status");
        }
    }
}

fn dedup(items: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = Vec::new();
    for item in items {
        if !seen.contains(&item) {
            seen.push(item);
        }
    }
    seen
}
