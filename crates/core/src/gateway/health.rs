//! Aggregated backend health surface.

use futures::future::join_all;
use serde::Serialize;

use super::credentials::CredentialSource;
use super::registry::GatewayRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendStatus {
    Healthy,
    Unhealthy,
    /// The gateway could not be constructed (unknown id, missing credentials).
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendHealth {
    pub backend: String,
    pub status: BackendStatus,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: OverallStatus,
    pub backends: Vec<BackendHealth>,
}

impl HealthReport {
    fn from_backends(backends: Vec<BackendHealth>) -> Self {
        let healthy = backends
            .iter()
            .filter(|b| b.status == BackendStatus::Healthy)
            .count();
        let status = if healthy > 0 && healthy == backends.len() {
            OverallStatus::Healthy
        } else if healthy > 0 {
            OverallStatus::Degraded
        } else {
            OverallStatus::Unhealthy
        };
        Self { status, backends }
    }
}

impl GatewayRegistry {
    /// Health-check each backend concurrently and aggregate the results.
    pub async fn health_report(
        &self,
        backends: &[String],
        source: &dyn CredentialSource,
    ) -> HealthReport {
        let checks = backends.iter().map(|backend| async move {
            let gateway = match self.resolve(backend, source) {
                Ok(gateway) => gateway,
                Err(e) => {
                    return BackendHealth {
                        backend: backend.clone(),
                        status: BackendStatus::Unavailable,
                        available: false,
                        error: Some(e.to_string()),
                    }
                }
            };

            if gateway.health_check().await {
                BackendHealth {
                    backend: backend.clone(),
                    status: BackendStatus::Healthy,
                    available: true,
                    error: None,
                }
            } else {
                tracing::warn!(backend = %backend, "Backend health check failed");
                BackendHealth {
                    backend: backend.clone(),
                    status: BackendStatus::Unhealthy,
                    available: true,
                    error: Some("health check failed".to_string()),
                }
            }
        });

        HealthReport::from_backends(join_all(checks).await)
    }
}
