//! Prometheus metrics for observability.
//!
//! HTTP request metrics live here; gateway, detection, and matcher metrics
//! come from the core crate and are registered alongside them.

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use regex_lite::Regex;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "brandlens_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("brandlens_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "brandlens_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();

    // Core metrics (gateways, detection, matcher)
    for metric in brandlens_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .unwrap()
});
static HASH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9a-fA-F]{32,64}").unwrap());
static NUMERIC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/\d+(/|$)").unwrap());
static PROJECT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^/api/v1/projects/[^/]+/").unwrap());
static GATEWAY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^/api/v1/gateways/[^/]+/").unwrap());

/// Normalize a path for metric labels (replace IDs with placeholders).
pub fn normalize_path(path: &str) -> String {
    let result = UUID_RE.replace_all(path, "{id}");
    let result = HASH_RE.replace_all(&result, "{id}");
    let result = NUMERIC_RE.replace_all(&result, "/{id}$1");
    let result = PROJECT_RE.replace(&result, "/api/v1/projects/{project_id}/");
    let result = GATEWAY_RE.replace(&result, "/api/v1/gateways/{backend}/");
    result.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_uuid() {
        let path = "/api/v1/detection/checks/550e8400-e29b-41d4-a716-446655440000";
        assert_eq!(normalize_path(path), "/api/v1/detection/checks/{id}");
    }

    #[test]
    fn test_normalize_path_project_and_backend() {
        assert_eq!(
            normalize_path("/api/v1/projects/acme-notes/report"),
            "/api/v1/projects/{project_id}/report"
        );
        assert_eq!(
            normalize_path("/api/v1/gateways/deepseek/stream"),
            "/api/v1/gateways/{backend}/stream"
        );
    }

    #[test]
    fn test_normalize_path_numeric() {
        assert_eq!(normalize_path("/api/v1/templates/42/render"), "/api/v1/templates/{id}/render");
    }

    #[test]
    fn test_normalize_path_static() {
        assert_eq!(normalize_path("/api/v1/health"), "/api/v1/health");
    }

    #[test]
    fn test_encode_metrics_includes_core_metrics() {
        HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/api/v1/health", "200"])
            .inc();
        brandlens_core::metrics::DETECTION_CHECKS
            .with_label_values(&["completed"])
            .inc();
        let text = encode_metrics();
        assert!(text.contains("brandlens_http_requests_total"));
        assert!(text.contains("brandlens_detection_checks_total"));
    }
}
