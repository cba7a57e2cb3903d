//! Matcher API handler.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use brandlens_core::BrandMention;

use super::error::ApiError;
use crate::state::AppState;

/// Request body for analyzing a text without calling a backend
#[derive(Debug, Deserialize)]
pub struct AnalyzeBody {
    pub text: String,
    pub brands: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub mentions: Vec<BrandMention>,
    pub total_mentions: usize,
    pub brands_mentioned: Vec<String>,
}

pub async fn analyze(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AnalyzeBody>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let brands = state.orchestrator().normalize_brands(&body.brands)?;

    let mentions = state.matcher().match_all(&body.text, &brands);
    let brands_mentioned: Vec<String> = mentions
        .iter()
        .filter(|m| m.mentioned)
        .map(|m| m.brand.clone())
        .collect();

    Ok(Json(AnalyzeResponse {
        total_mentions: brands_mentioned.len(),
        brands_mentioned,
        mentions,
    }))
}
