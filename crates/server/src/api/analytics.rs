//! Analytics API handlers.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use brandlens_core::repository::{BrandMentionStats, ProjectReport};

use super::error::ApiError;
use crate::state::AppState;

const DEFAULT_WINDOW_DAYS: u32 = 30;
const MAX_WINDOW_DAYS: u32 = 365;

/// Query parameters for single-brand stats
#[derive(Debug, Deserialize)]
pub struct MentionStatsParams {
    pub project_id: String,
    pub brand: String,
    pub days: Option<u32>,
}

/// Query parameters for brand comparison
#[derive(Debug, Deserialize)]
pub struct CompareParams {
    pub project_id: String,
    /// Comma-separated brand names
    pub brands: String,
    pub days: Option<u32>,
}

fn window(days: Option<u32>) -> u32 {
    days.unwrap_or(DEFAULT_WINDOW_DAYS).clamp(1, MAX_WINDOW_DAYS)
}

pub async fn mention_stats(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MentionStatsParams>,
) -> Result<Json<BrandMentionStats>, ApiError> {
    let brand = params.brand.trim();
    if brand.is_empty() {
        return Err(ApiError::BadRequest("brand must not be empty".into()));
    }
    let stats = state
        .repository()
        .get_brand_mention_stats(&params.project_id, brand, window(params.days))
        .await?;
    Ok(Json(stats))
}

pub async fn compare_brands(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CompareParams>,
) -> Result<Json<Vec<BrandMentionStats>>, ApiError> {
    let requested: Vec<String> = params.brands.split(',').map(String::from).collect();
    let brands = state.orchestrator().normalize_brands(&requested)?;
    let stats = state
        .repository()
        .compare_brands(&params.project_id, &brands, window(params.days))
        .await?;
    Ok(Json(stats))
}

pub async fn project_report(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
) -> Result<Json<ProjectReport>, ApiError> {
    let report = state.repository().project_report(&project_id).await?;
    Ok(Json(report))
}
