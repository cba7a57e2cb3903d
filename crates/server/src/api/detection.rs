//! Detection check API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use brandlens_core::{
    repository::CheckOverview, CheckFilter, CheckStatus, DetectionCheck, DetectionRequest,
};

use super::error::ApiError;
use crate::state::AppState;

/// Maximum allowed page size for history queries
const MAX_LIMIT: u32 = 100;

/// Default page size for history queries
const DEFAULT_LIMIT: u32 = 20;

/// Query parameters for listing checks
#[derive(Debug, Deserialize)]
pub struct ListChecksParams {
    pub project_id: String,
    /// One-based page number
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub status: Option<String>,
}

/// Response for listing checks
#[derive(Debug, Serialize)]
pub struct ListChecksResponse {
    pub checks: Vec<CheckOverview>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

/// Run a detection check and return its result
pub async fn create_check(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DetectionRequest>,
) -> Result<(StatusCode, Json<DetectionCheck>), ApiError> {
    let check = state.orchestrator().execute(request).await?;
    Ok((StatusCode::CREATED, Json(check)))
}

/// List a project's checks, newest first
pub async fn list_checks(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListChecksParams>,
) -> Result<Json<ListChecksResponse>, ApiError> {
    let page = params.page.unwrap_or(1).max(1);
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    let mut filter = CheckFilter::new().with_page(page, limit);
    if let Some(brand) = params.brand {
        filter = filter.with_brand(brand);
    }
    if let Some(model) = params.model {
        filter = filter.with_model(model);
    }
    if let Some(status) = params.status {
        let status: CheckStatus = status.parse().map_err(ApiError::BadRequest)?;
        filter = filter.with_status(status);
    }

    let repository = state.repository();
    let checks = repository
        .get_checks_by_project(&params.project_id, &filter)
        .await?;
    let total = repository
        .count_checks_by_project(&params.project_id, &filter)
        .await?;

    Ok(Json(ListChecksResponse {
        checks,
        total,
        page,
        limit,
    }))
}

/// Get one check with its results
pub async fn get_check(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DetectionCheck>, ApiError> {
    state
        .repository()
        .get_check(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Check not found: {}", id)))
}
