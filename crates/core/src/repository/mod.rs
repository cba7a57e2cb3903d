//! Persistence for detection checks, results, mentions, and templates.

pub mod sqlite_store;
pub mod store;

pub use sqlite_store::SqliteMentionRepository;
pub use store::{
    BrandMentionStats, BrandReport, CheckFilter, CheckOverview, MentionRepository,
    ModelMentionStats, ModelReport, ProjectReport, RepositoryError, StatusUpdate, TemplateFilter,
};
