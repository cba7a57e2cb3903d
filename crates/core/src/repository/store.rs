//! Persistence contract for detection checks, analytics, and templates.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::detection::{CheckStatus, DetectionCheck, DetectionSummary, ModelResult};
use crate::matcher::BrandMention;
use crate::templates::PromptTemplate;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A guarded write was rejected, e.g. a backward status transition.
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl From<rusqlite::Error> for RepositoryError {
    fn from(e: rusqlite::Error) -> Self {
        RepositoryError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(e: serde_json::Error) -> Self {
        RepositoryError::Serialization(e.to_string())
    }
}

/// A status write for a stored check.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: CheckStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub summary: Option<DetectionSummary>,
}

impl StatusUpdate {
    pub fn running() -> Self {
        Self {
            status: CheckStatus::Running,
            completed_at: None,
            summary: None,
        }
    }

    pub fn completed(summary: DetectionSummary, completed_at: DateTime<Utc>) -> Self {
        Self {
            status: CheckStatus::Completed,
            completed_at: Some(completed_at),
            summary: Some(summary),
        }
    }

    pub fn failed(completed_at: DateTime<Utc>) -> Self {
        Self {
            status: CheckStatus::Failed,
            completed_at: Some(completed_at),
            summary: None,
        }
    }
}

/// Filter for a project's check history.
#[derive(Debug, Clone)]
pub struct CheckFilter {
    pub brand: Option<String>,
    pub model: Option<String>,
    pub status: Option<CheckStatus>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for CheckFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckFilter {
    pub fn new() -> Self {
        Self {
            brand: None,
            model: None,
            status: None,
            limit: 20,
            offset: 0,
        }
    }

    pub fn with_brand(mut self, brand: impl Into<String>) -> Self {
        self.brand = Some(brand.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_status(mut self, status: CheckStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// One-based page of `limit` rows.
    pub fn with_page(mut self, page: u32, limit: u32) -> Self {
        let limit = limit.max(1);
        self.limit = limit as i64;
        self.offset = page.saturating_sub(1) as i64 * limit as i64;
        self
    }
}

/// Filter for template listings.
#[derive(Debug, Clone)]
pub struct TemplateFilter {
    pub category: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for TemplateFilter {
    fn default() -> Self {
        Self {
            category: None,
            limit: 50,
            offset: 0,
        }
    }
}

impl TemplateFilter {
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_page(mut self, page: u32, limit: u32) -> Self {
        let limit = limit.max(1);
        self.limit = limit as i64;
        self.offset = page.saturating_sub(1) as i64 * limit as i64;
        self
    }
}

/// One row of a project's check history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOverview {
    pub id: String,
    pub user_id: String,
    pub prompt: String,
    pub brands: Vec<String>,
    pub models: Vec<String>,
    pub status: CheckStatus,
    pub total_mentions: Option<u64>,
    pub mention_rate: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMentionStats {
    pub model: String,
    pub evaluations: u64,
    pub mentions: u64,
    pub mention_rate: f64,
    pub avg_confidence: f64,
}

/// Mention statistics for one brand over a trailing window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrandMentionStats {
    pub brand: String,
    pub window_days: u32,
    /// Checks that asked about the brand.
    pub total_checks: u64,
    /// One per successful model call per check.
    pub total_evaluations: u64,
    pub total_mentions: u64,
    pub mention_rate: f64,
    pub avg_confidence: f64,
    pub models: Vec<ModelMentionStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrandReport {
    pub brand: String,
    pub evaluations: u64,
    pub mentions: u64,
    pub mention_rate: f64,
    pub avg_confidence: f64,
    /// Up to five recent contexts where the brand was mentioned.
    pub sample_contexts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelReport {
    pub model: String,
    pub total_calls: u64,
    pub successful_calls: u64,
    pub success_rate: f64,
    pub mention_rate: f64,
    pub avg_response_length: f64,
    pub avg_latency_ms: f64,
}

/// Whole-project rollup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectReport {
    pub project_id: String,
    pub total_checks: u64,
    pub status_counts: BTreeMap<String, u64>,
    pub brands: Vec<BrandReport>,
    pub models: Vec<ModelReport>,
}

/// Storage for checks, their results, and templates.
///
/// Writes are idempotent: repeating `save_result` or `save_mentions` with the
/// same inputs leaves the store unchanged, and a repeated status write is
/// accepted. Status writes that would move a check backward return `false`.
#[async_trait]
pub trait MentionRepository: Send + Sync {
    /// Insert a check. Returns its id.
    async fn create_check(&self, check: &DetectionCheck) -> Result<String, RepositoryError>;

    /// Apply a status write. Returns `false` if the stored status does not allow it.
    async fn update_check_status(
        &self,
        check_id: &str,
        update: StatusUpdate,
    ) -> Result<bool, RepositoryError>;

    /// Upsert one model result. Returns the result id.
    async fn save_result(&self, check_id: &str, result: &ModelResult) -> Result<String, RepositoryError>;

    /// Upsert the mentions of one result. Returns their ids in order.
    async fn save_mentions(
        &self,
        check_id: &str,
        result_id: &str,
        mentions: &[BrandMention],
    ) -> Result<Vec<String>, RepositoryError>;

    /// Full check with results and mentions in order.
    async fn get_check(&self, check_id: &str) -> Result<Option<DetectionCheck>, RepositoryError>;

    /// Newest first.
    async fn get_checks_by_project(
        &self,
        project_id: &str,
        filter: &CheckFilter,
    ) -> Result<Vec<CheckOverview>, RepositoryError>;

    async fn count_checks_by_project(
        &self,
        project_id: &str,
        filter: &CheckFilter,
    ) -> Result<u64, RepositoryError>;

    async fn get_brand_mention_stats(
        &self,
        project_id: &str,
        brand: &str,
        window_days: u32,
    ) -> Result<BrandMentionStats, RepositoryError>;

    /// Stats for each brand, in the given order.
    async fn compare_brands(
        &self,
        project_id: &str,
        brands: &[String],
        window_days: u32,
    ) -> Result<Vec<BrandMentionStats>, RepositoryError> {
        let mut out = Vec::with_capacity(brands.len());
        for brand in brands {
            out.push(
                self.get_brand_mention_stats(project_id, brand, window_days)
                    .await?,
            );
        }
        Ok(out)
    }

    async fn project_report(&self, project_id: &str) -> Result<ProjectReport, RepositoryError>;

    async fn save_template(&self, template: &PromptTemplate) -> Result<(), RepositoryError>;

    async fn get_template(&self, id: &str) -> Result<Option<PromptTemplate>, RepositoryError>;

    /// Templates owned by `user_id` plus public ones, most used first.
    async fn list_templates(
        &self,
        user_id: &str,
        filter: &TemplateFilter,
    ) -> Result<Vec<PromptTemplate>, RepositoryError>;

    /// Returns `false` when the template does not exist.
    async fn increment_template_usage(&self, id: &str) -> Result<bool, RepositoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_filter_pages() {
        let filter = CheckFilter::new().with_page(3, 10);
        assert_eq!(filter.limit, 10);
        assert_eq!(filter.offset, 20);

        let first = CheckFilter::new().with_page(0, 0);
        assert_eq!(first.limit, 1);
        assert_eq!(first.offset, 0);
    }

    #[test]
    fn test_error_conversions() {
        let err: RepositoryError = serde_json::from_str::<Vec<String>>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, RepositoryError::Serialization(_)));
    }
}
