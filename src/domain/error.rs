// Report pipeline error taxonomy
use std::time::Duration;

pub type Result<T> = std::result::Result<T, ReportError>;

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// Malformed time range spec
    #[error("invalid time spec {spec:?}: {reason}")]
    TimeParse { spec: String, reason: String },

    /// Non-2xx answer from the dashboard service after all retries
    #[error("dashboard HTTP error: {url} returned {status}: {body}")]
    DashboardHttp {
        url: String,
        status: u16,
        body: String,
    },

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("navigation to {url} returned status {status}")]
    NavigationStatus { url: String, status: i64 },

    #[error("script evaluation failed: {reason}")]
    Script { reason: String },

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// The page loaded but nothing renderable was found on it
    #[error("dashboard {uid} has no panels")]
    NoPanels { uid: String },

    /// The scraping script produced no result at all
    #[error("no extraction data returned for dashboard {uid}")]
    NoExtractionData { uid: String },

    #[error("panel {panel_id} failed to render: {reason}")]
    PanelRender { panel_id: String, reason: String },

    #[error("payload for panel {panel_id} was already set")]
    PayloadAlreadySet { panel_id: String },

    #[error("browser error: {0}")]
    Browser(String),

    #[error("PDF print failed: {0}")]
    PdfPrint(String),

    #[error("template error: {0}")]
    Template(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("worker pool {pool} is shut down")]
    PoolClosed { pool: String },

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),
}

impl ReportError {
    pub fn time_parse(spec: &str, reason: impl Into<String>) -> Self {
        Self::TimeParse {
            spec: spec.to_string(),
            reason: reason.into(),
        }
    }

    pub fn script(reason: impl Into<String>) -> Self {
        Self::Script {
            reason: reason.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    pub fn panel(panel_id: &str, err: &ReportError) -> Self {
        Self::PanelRender {
            panel_id: panel_id.to_string(),
            reason: err.to_string(),
        }
    }

    /// Transient upstream failures are the only ones worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::DashboardHttp { .. } => true,
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_context() {
        let err = ReportError::DashboardHttp {
            url: "http://grafana/render/d-solo/abc".to_string(),
            status: 503,
            body: "busy".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("http://grafana/render/d-solo/abc"));
        assert!(msg.contains("503"));
        assert!(msg.contains("busy"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_extraction_errors_are_distinct_and_fatal() {
        let none = ReportError::NoPanels { uid: "u1".to_string() };
        let missing = ReportError::NoExtractionData { uid: "u1".to_string() };
        assert_ne!(none.to_string(), missing.to_string());
        assert!(!none.is_retryable());
        assert!(!missing.is_retryable());
        assert!(!ReportError::time_parse("now-", "missing amount").is_retryable());
    }
}
