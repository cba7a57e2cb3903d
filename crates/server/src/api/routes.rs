use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::{
    analytics, detection, gateways, handlers, matcher, middleware::metrics_middleware, templates,
};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // API routes
    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        .route("/backends/health", get(handlers::backends_health))
        // Matcher (no backend call)
        .route("/matcher/analyze", post(matcher::analyze))
        // Detection checks
        .route(
            "/detection/checks",
            post(detection::create_check).get(detection::list_checks),
        )
        .route("/detection/checks/{id}", get(detection::get_check))
        // Analytics
        .route("/analytics/mentions", get(analytics::mention_stats))
        .route("/analytics/compare", get(analytics::compare_brands))
        .route("/projects/{project_id}/report", get(analytics::project_report))
        // Prompt templates
        .route(
            "/templates",
            post(templates::create_template).get(templates::list_templates),
        )
        .route("/templates/{id}/render", post(templates::render_template))
        // Direct gateway access
        .route("/gateways/{backend}/complete", post(gateways::complete))
        .route("/gateways/{backend}/stream", post(gateways::stream))
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::metrics))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
