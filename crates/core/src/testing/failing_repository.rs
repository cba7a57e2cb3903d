//! Repository wrapper that injects failures.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use crate::detection::{DetectionCheck, ModelResult};
use crate::matcher::BrandMention;
use crate::repository::{
    BrandMentionStats, CheckFilter, CheckOverview, MentionRepository, ProjectReport,
    RepositoryError, StatusUpdate, TemplateFilter,
};
use crate::templates::PromptTemplate;

/// Write operations a [`FailingRepository`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepoOp {
    CreateCheck,
    UpdateStatus,
    SaveResult,
    SaveMentions,
}

/// Delegates to an inner repository, except for operations marked to fail.
///
/// Reads always go through, so a test can inspect what was written before
/// the injected failure.
pub struct FailingRepository {
    inner: Arc<dyn MentionRepository>,
    failing: Mutex<HashSet<RepoOp>>,
}

impl FailingRepository {
    pub fn new(inner: Arc<dyn MentionRepository>) -> Self {
        Self {
            inner,
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail_on(self, op: RepoOp) -> Self {
        self.set_failing(op, true);
        self
    }

    pub fn set_failing(&self, op: RepoOp, fail: bool) {
        let mut failing = self.failing.lock().unwrap_or_else(PoisonError::into_inner);
        if fail {
            failing.insert(op);
        } else {
            failing.remove(&op);
        }
    }

    fn check(&self, op: RepoOp) -> Result<(), RepositoryError> {
        if self
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&op)
        {
            return Err(RepositoryError::Database(format!("injected failure: {:?}", op)));
        }
        Ok(())
    }
}

#[async_trait]
impl MentionRepository for FailingRepository {
    async fn create_check(&self, check: &DetectionCheck) -> Result<String, RepositoryError> {
        self.check(RepoOp::CreateCheck)?;
        self.inner.create_check(check).await
    }

    async fn update_check_status(
        &self,
        check_id: &str,
        update: StatusUpdate,
    ) -> Result<bool, RepositoryError> {
        self.check(RepoOp::UpdateStatus)?;
        self.inner.update_check_status(check_id, update).await
    }

    async fn save_result(&self, check_id: &str, result: &ModelResult) -> Result<String, RepositoryError> {
        self.check(RepoOp::SaveResult)?;
        self.inner.save_result(check_id, result).await
    }

    async fn save_mentions(
        &self,
        check_id: &str,
        result_id: &str,
        mentions: &[BrandMention],
    ) -> Result<Vec<String>, RepositoryError> {
        self.check(RepoOp::SaveMentions)?;
        self.inner.save_mentions(check_id, result_id, mentions).await
    }

    async fn get_check(&self, check_id: &str) -> Result<Option<DetectionCheck>, RepositoryError> {
        self.inner.get_check(check_id).await
    }

    async fn get_checks_by_project(
        &self,
        project_id: &str,
        filter: &CheckFilter,
    ) -> Result<Vec<CheckOverview>, RepositoryError> {
        self.inner.get_checks_by_project(project_id, filter).await
    }

    async fn count_checks_by_project(
        &self,
        project_id: &str,
        filter: &CheckFilter,
    ) -> Result<u64, RepositoryError> {
        self.inner.count_checks_by_project(project_id, filter).await
    }

    async fn get_brand_mention_stats(
        &self,
        project_id: &str,
        brand: &str,
        window_days: u32,
    ) -> Result<BrandMentionStats, RepositoryError> {
        self.inner
            .get_brand_mention_stats(project_id, brand, window_days)
            .await
    }

    async fn project_report(&self, project_id: &str) -> Result<ProjectReport, RepositoryError> {
        self.inner.project_report(project_id).await
    }

    async fn save_template(&self, template: &PromptTemplate) -> Result<(), RepositoryError> {
        self.inner.save_template(template).await
    }

    async fn get_template(&self, id: &str) -> Result<Option<PromptTemplate>, RepositoryError> {
        self.inner.get_template(id).await
    }

    async fn list_templates(
        &self,
        user_id: &str,
        filter: &TemplateFilter,
    ) -> Result<Vec<PromptTemplate>, RepositoryError> {
        self.inner.list_templates(user_id, filter).await
    }

    async fn increment_template_usage(&self, id: &str) -> Result<bool, RepositoryError> {
        self.inner.increment_template_usage(id).await
    }
}
