//! Error types for the volume autoscaler

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the volume autoscaler
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid global configuration; fatal at startup
    #[error("Configuration error: {0}")]
    Config(String),

    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metrics backend connection error
    #[error("Prometheus connection error: {0}")]
    PrometheusConnection(#[source] reqwest::Error),

    /// Metrics backend query error
    #[error("Prometheus query error: {0}")]
    PrometheusQuery(String),

    /// Metrics backend response parse error
    #[error("Failed to parse Prometheus response: {0}")]
    PrometheusResponseParse(String),

    /// Resource quantity parse error
    #[error("Failed to parse quantity {value:?}: {reason}")]
    QuantityParse { value: String, reason: String },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

#[allow(dead_code)]
impl Error {
    /// True when the error means the metrics backend could not be read and
    /// the whole iteration must be abandoned rather than acted on partially.
    pub fn is_metrics_unavailable(&self) -> bool {
        matches!(
            self,
            Error::PrometheusConnection(_)
                | Error::PrometheusQuery(_)
                | Error::PrometheusResponseParse(_)
        )
    }
}
