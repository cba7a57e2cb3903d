//! Prompt template API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use brandlens_core::{NewTemplate, PromptTemplate, TemplateFilter};

use super::error::ApiError;
use crate::state::AppState;

const MAX_LIMIT: u32 = 100;
const DEFAULT_LIMIT: u32 = 50;

/// Query parameters for listing templates
#[derive(Debug, Deserialize)]
pub struct ListTemplatesParams {
    pub user_id: String,
    pub category: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// Request body for rendering a template
#[derive(Debug, Deserialize)]
pub struct RenderBody {
    #[serde(default)]
    pub values: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct RenderResponse {
    pub template_id: String,
    pub prompt: String,
}

pub async fn create_template(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewTemplate>,
) -> Result<(StatusCode, Json<PromptTemplate>), ApiError> {
    let template = PromptTemplate::create(body)?;
    state.repository().save_template(&template).await?;
    tracing::info!(template_id = %template.id, name = %template.name, "Template created");
    Ok((StatusCode::CREATED, Json(template)))
}

pub async fn list_templates(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListTemplatesParams>,
) -> Result<Json<Vec<PromptTemplate>>, ApiError> {
    let page = params.page.unwrap_or(1).max(1);
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let mut filter = TemplateFilter::default().with_page(page, limit);
    if let Some(category) = params.category {
        filter = filter.with_category(category);
    }
    let templates = state
        .repository()
        .list_templates(&params.user_id, &filter)
        .await?;
    Ok(Json(templates))
}

/// Render a template and count the use
pub async fn render_template(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<RenderBody>,
) -> Result<Json<RenderResponse>, ApiError> {
    let repository = state.repository();
    let template = repository
        .get_template(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Template not found: {}", id)))?;

    let prompt = template.render(&body.values)?;
    repository.increment_template_usage(&id).await?;

    Ok(Json(RenderResponse {
        template_id: template.id,
        prompt,
    }))
}
