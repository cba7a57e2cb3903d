use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Failure category of an upstream call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamCategory {
    Timeout,
    /// Connection refused, reset, DNS, or a broken body.
    Transport,
    ServerError,
    RateLimited,
    ClientError,
    /// The backend answered 2xx with something we could not read.
    InvalidResponse,
}

impl UpstreamCategory {
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => UpstreamCategory::RateLimited,
            500..=599 => UpstreamCategory::ServerError,
            _ => UpstreamCategory::ClientError,
        }
    }

    /// Whether a retry after back-off might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            UpstreamCategory::Timeout | UpstreamCategory::Transport | UpstreamCategory::ServerError
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UpstreamCategory::Timeout => "timeout",
            UpstreamCategory::Transport => "transport",
            UpstreamCategory::ServerError => "server_error",
            UpstreamCategory::RateLimited => "rate_limited",
            UpstreamCategory::ClientError => "client_error",
            UpstreamCategory::InvalidResponse => "invalid_response",
        }
    }
}

impl fmt::Display for UpstreamCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by gateways and the registry.
///
/// Every variant carries the backend identifier it concerns.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("[{backend}] invalid request: {message}")]
    Validation { backend: String, message: String },

    #[error("[{backend}] configuration error: {message}")]
    Configuration { backend: String, message: String },

    #[error("[{backend}] upstream {category} error{}: {message}", status_suffix(.status))]
    Upstream {
        backend: String,
        category: UpstreamCategory,
        status: Option<u16>,
        message: String,
    },
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl GatewayError {
    pub fn validation(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            backend: backend.into(),
            message: message.into(),
        }
    }

    pub fn configuration(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            backend: backend.into(),
            message: message.into(),
        }
    }

    pub fn upstream(
        backend: impl Into<String>,
        category: UpstreamCategory,
        status: Option<u16>,
        message: impl Into<String>,
    ) -> Self {
        Self::Upstream {
            backend: backend.into(),
            category,
            status,
            message: message.into(),
        }
    }

    /// An error for a non-2xx HTTP status.
    pub fn from_status(backend: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self::upstream(
            backend,
            UpstreamCategory::from_status(status),
            Some(status),
            message,
        )
    }

    /// Classify a reqwest transport error.
    pub fn from_reqwest(backend: impl Into<String>, err: &reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16());
        let category = if err.is_timeout() {
            UpstreamCategory::Timeout
        } else if err.is_decode() {
            UpstreamCategory::InvalidResponse
        } else if let Some(status) = status {
            UpstreamCategory::from_status(status)
        } else {
            UpstreamCategory::Transport
        };
        Self::upstream(backend, category, status, err.to_string())
    }

    pub fn backend(&self) -> &str {
        match self {
            GatewayError::Validation { backend, .. }
            | GatewayError::Configuration { backend, .. }
            | GatewayError::Upstream { backend, .. } => backend,
        }
    }

    /// Short tag used in results, logs, and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Validation { .. } => "validation",
            GatewayError::Configuration { .. } => "configuration",
            GatewayError::Upstream { .. } => "upstream",
        }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::Upstream { category, .. } => category.is_transient(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_categories() {
        assert_eq!(UpstreamCategory::from_status(500), UpstreamCategory::ServerError);
        assert_eq!(UpstreamCategory::from_status(503), UpstreamCategory::ServerError);
        assert_eq!(UpstreamCategory::from_status(429), UpstreamCategory::RateLimited);
        assert_eq!(UpstreamCategory::from_status(401), UpstreamCategory::ClientError);
        assert_eq!(UpstreamCategory::from_status(302), UpstreamCategory::ClientError);
    }

    #[test]
    fn test_only_timeouts_transport_and_5xx_are_transient() {
        assert!(GatewayError::from_status("x", 502, "bad gateway").is_transient());
        assert!(GatewayError::upstream("x", UpstreamCategory::Timeout, None, "slow").is_transient());
        assert!(!GatewayError::from_status("x", 400, "bad request").is_transient());
        assert!(!GatewayError::from_status("x", 429, "slow down").is_transient());
        assert!(!GatewayError::configuration("x", "no key").is_transient());
        assert!(!GatewayError::validation("x", "empty").is_transient());
    }

    #[test]
    fn test_display_carries_backend_and_status() {
        let err = GatewayError::from_status("deepseek", 503, "overloaded");
        assert_eq!(
            err.to_string(),
            "[deepseek] upstream server_error error (HTTP 503): overloaded"
        );
        assert_eq!(err.backend(), "deepseek");
        assert_eq!(err.kind(), "upstream");

        let err = GatewayError::upstream("doubao", UpstreamCategory::Timeout, None, "30s");
        assert_eq!(err.to_string(), "[doubao] upstream timeout error: 30s");
    }
}
