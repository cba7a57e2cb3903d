//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Gateway calls (outcomes, latency, retries, tokens)
//! - Detection checks (terminal status, per-model outcomes)
//! - Brand matching (confidence distribution)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts};
use std::time::Duration;

use crate::gateway::{GatewayError, TokenUsage};

// =============================================================================
// Gateway Metrics
// =============================================================================

/// Gateway calls by backend and outcome.
pub static GATEWAY_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("brandlens_gateway_requests_total", "Total gateway calls"),
        &["backend", "outcome"], // outcome: "ok", "validation", "configuration", "upstream"
    )
    .unwrap()
});

/// Gateway call duration in seconds, including retries.
pub static GATEWAY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "brandlens_gateway_duration_seconds",
            "Gateway call duration including retries",
        )
        .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
        &["backend"],
    )
    .unwrap()
});

/// Retries after transient upstream errors.
pub static GATEWAY_RETRIES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "brandlens_gateway_retries_total",
            "Gateway retries after transient errors",
        ),
        &["backend"],
    )
    .unwrap()
});

/// Tokens consumed.
pub static GATEWAY_TOKENS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("brandlens_gateway_tokens_total", "Total tokens used"),
        &["backend", "kind"], // kind: "prompt", "completion"
    )
    .unwrap()
});

// =============================================================================
// Detection Metrics
// =============================================================================

/// Detection checks by terminal status.
pub static DETECTION_CHECKS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "brandlens_detection_checks_total",
            "Detection checks by terminal status",
        ),
        &["status"],
    )
    .unwrap()
});

/// Per-model outcomes inside detection checks.
pub static MODEL_OUTCOMES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "brandlens_model_outcomes_total",
            "Per-model outcomes inside detection checks",
        ),
        &["model", "outcome"],
    )
    .unwrap()
});

/// Confidence of detected mentions.
pub static MATCH_CONFIDENCE: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "brandlens_match_confidence",
            "Confidence score of detected brand mentions",
        )
        .buckets(vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0]),
        &[],
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Record one finished gateway call.
pub fn record_gateway_call(
    backend: &str,
    outcome: Result<&TokenUsage, &GatewayError>,
    elapsed: Duration,
) {
    GATEWAY_DURATION
        .with_label_values(&[backend])
        .observe(elapsed.as_secs_f64());

    match outcome {
        Ok(usage) => {
            GATEWAY_REQUESTS.with_label_values(&[backend, "ok"]).inc();
            GATEWAY_TOKENS
                .with_label_values(&[backend, "prompt"])
                .inc_by(usage.prompt_tokens as u64);
            GATEWAY_TOKENS
                .with_label_values(&[backend, "completion"])
                .inc_by(usage.completion_tokens as u64);
        }
        Err(e) => {
            GATEWAY_REQUESTS
                .with_label_values(&[backend, e.kind()])
                .inc();
        }
    }
}

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Gateways
        Box::new(GATEWAY_REQUESTS.clone()),
        Box::new(GATEWAY_DURATION.clone()),
        Box::new(GATEWAY_RETRIES.clone()),
        Box::new(GATEWAY_TOKENS.clone()),
        // Detection
        Box::new(DETECTION_CHECKS.clone()),
        Box::new(MODEL_OUTCOMES.clone()),
        Box::new(MATCH_CONFIDENCE.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_gateway_call_counts_tokens() {
        let usage = TokenUsage {
            prompt_tokens: 3,
            completion_tokens: 4,
            total_tokens: 7,
        };
        let before = GATEWAY_TOKENS
            .with_label_values(&["metrics-test", "completion"])
            .get();
        record_gateway_call("metrics-test", Ok(&usage), Duration::from_millis(5));
        let after = GATEWAY_TOKENS
            .with_label_values(&["metrics-test", "completion"])
            .get();
        assert_eq!(after - before, 4);

        let err = GatewayError::from_status("metrics-test", 500, "x");
        record_gateway_call("metrics-test", Err(&err), Duration::from_millis(5));
        assert!(
            GATEWAY_REQUESTS
                .with_label_values(&["metrics-test", "upstream"])
                .get()
                >= 1
        );
    }

    #[test]
    fn test_all_metrics_count() {
        assert_eq!(all_metrics().len(), 7);
    }
}
