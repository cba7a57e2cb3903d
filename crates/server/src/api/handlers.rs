use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use brandlens_core::{HealthReport, SanitizedConfig};

use crate::metrics::encode_metrics;
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<SanitizedConfig> {
    Json(state.sanitized_config())
}

/// Query parameters for the backend health report
#[derive(Debug, Deserialize)]
pub struct BackendHealthParams {
    /// Comma-separated backend ids; defaults to every configured gateway
    pub backends: Option<String>,
}

pub async fn backends_health(
    State(state): State<Arc<AppState>>,
    Query(params): Query<BackendHealthParams>,
) -> Json<HealthReport> {
    let backends: Vec<String> = match params.backends {
        Some(list) => list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        None => state.credentials().configured_backends(),
    };

    let report = state
        .registry()
        .health_report(&backends, state.credentials())
        .await;
    Json(report)
}

pub async fn metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        encode_metrics(),
    )
}
