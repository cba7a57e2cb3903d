//! HTTP service for brand-mention detection.

pub mod api;
pub mod metrics;
pub mod state;
