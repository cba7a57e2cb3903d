//! Detection checks: request validation, backend fan-out, and aggregation.

pub mod error;
pub mod orchestrator;
pub mod types;

pub use error::DetectionError;
pub use orchestrator::DetectionOrchestrator;
pub use types::{
    timestamp_now, CheckStatus, DetectionCheck, DetectionRequest, DetectionSummary,
    ExecutionMode, ModelError, ModelErrorKind, ModelResult,
};
