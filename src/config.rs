//! Global configuration
//!
//! All settings are backed by environment variables so the controller can be
//! configured entirely through its Deployment manifest. Per-PVC annotation
//! overrides are layered on top of these values by the policy resolver.

use clap::Parser;
use std::time::Duration;
use tracing::info;

use crate::error::{Error, Result};

/// Endpoint template for Google Managed Prometheus.
const GMP_QUERY_URL: &str = "https://monitoring.googleapis.com/v1/projects";

/// GCE metadata server path used to auto-detect the project id.
const METADATA_PROJECT_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/project/project-id";

/// Volume autoscaler - grows PersistentVolumeClaims before they fill up.
///
/// Run exactly one replica with a `Recreate` rollout strategy: the controller
/// persists its per-PVC state on the PVCs themselves and two concurrent
/// writers can double-resize a volume within the cooldown window.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Settings {
    /// Seconds between reconciliation iterations
    #[arg(long, env = "INTERVAL_TIME", default_value_t = 60)]
    pub interval_time: u64,

    /// Usage percentage above which a PVC starts counting toward a resize
    #[arg(long, env = "SCALE_ABOVE_PERCENT", default_value_t = 80)]
    pub scale_above_percent: u32,

    /// Consecutive triggering observations required before resizing
    #[arg(long, env = "SCALE_AFTER_INTERVALS", default_value_t = 5)]
    pub scale_after_intervals: u32,

    /// Growth rate applied to the current size, in percent
    #[arg(long, env = "SCALE_UP_PERCENT", default_value_t = 20)]
    pub scale_up_percent: u32,

    /// Minimum number of bytes added by a single resize
    #[arg(long, env = "SCALE_UP_MIN_INCREMENT", default_value_t = 1_000_000_000)]
    pub scale_up_min_increment: u64,

    /// Maximum number of bytes added by a single resize
    #[arg(long, env = "SCALE_UP_MAX_INCREMENT", default_value_t = 16_000_000_000_000)]
    pub scale_up_max_increment: u64,

    /// Absolute ceiling for any PVC, in bytes
    #[arg(long, env = "SCALE_UP_MAX_SIZE", default_value_t = 16_000_000_000_000)]
    pub scale_up_max_size: u64,

    /// Minimum seconds between two resizes of the same PVC
    #[arg(long, env = "SCALE_COOLDOWN_TIME", default_value_t = 22_200)]
    pub scale_cooldown_time: u64,

    /// Log intended patches without issuing them
    #[arg(long, env = "DRY_RUN", default_value_t = false)]
    pub dry_run: bool,

    /// Enable debug logging
    #[arg(long, env = "VERBOSE", default_value_t = false)]
    pub verbose: bool,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON", default_value_t = false)]
    pub log_json: bool,

    /// Label matcher spliced verbatim into every metrics query selector
    #[arg(long, env = "GMP_LABEL_MATCH", default_value = "")]
    pub gmp_label_match: String,

    /// Timeout in seconds for all outbound HTTP calls
    #[arg(long, env = "HTTP_TIMEOUT", default_value_t = 15)]
    pub http_timeout: u64,

    /// Bind address for the liveness/readiness/metrics server
    #[arg(long, env = "HTTP_ADDR", default_value = "0.0.0.0:8000")]
    pub http_addr: String,

    /// Explicit Prometheus-compatible query endpoint; overrides GCP detection
    #[arg(long, env = "PROMETHEUS_URL")]
    pub prometheus_url: Option<String>,

    /// GCP project id for Google Managed Prometheus ("auto" to detect)
    #[arg(long, env = "GCP_PROJECT_ID")]
    pub gcp_project_id: Option<String>,

    /// Slack incoming-webhook URL; notifications are disabled when unset
    #[arg(long, env = "SLACK_WEBHOOK_URL")]
    pub slack_webhook_url: Option<String>,

    /// Slack channel override for notifications
    #[arg(long, env = "SLACK_CHANNEL")]
    pub slack_channel: Option<String>,

    /// Text prepended to every notification
    #[arg(long, env = "SLACK_MESSAGE_PREFIX", default_value = "")]
    pub slack_message_prefix: String,

    /// Text appended to every notification
    #[arg(long, env = "SLACK_MESSAGE_SUFFIX", default_value = "")]
    pub slack_message_suffix: String,
}

impl Settings {
    /// Validate the global configuration. Any failure here is fatal.
    pub fn validate(&self) -> Result<()> {
        if self.interval_time == 0 {
            return Err(Error::Config("INTERVAL_TIME must be at least 1".into()));
        }
        if !(1..=99).contains(&self.scale_above_percent) {
            return Err(Error::Config(format!(
                "SCALE_ABOVE_PERCENT must be between 1 and 99, got {}",
                self.scale_above_percent
            )));
        }
        if self.scale_after_intervals == 0 {
            return Err(Error::Config(
                "SCALE_AFTER_INTERVALS must be at least 1".into(),
            ));
        }
        if self.scale_up_max_increment < self.scale_up_min_increment {
            return Err(Error::Config(format!(
                "SCALE_UP_MAX_INCREMENT ({}) must not be below SCALE_UP_MIN_INCREMENT ({})",
                self.scale_up_max_increment, self.scale_up_min_increment
            )));
        }
        if self.scale_up_max_size == 0 {
            return Err(Error::Config("SCALE_UP_MAX_SIZE must be non-zero".into()));
        }
        if self.http_timeout == 0 {
            return Err(Error::Config("HTTP_TIMEOUT must be at least 1".into()));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_time)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout)
    }

    /// Resolve the metrics query endpoint.
    ///
    /// An explicit `PROMETHEUS_URL` wins. Otherwise the Google Managed
    /// Prometheus endpoint is derived from `GCP_PROJECT_ID`, consulting the
    /// GCE metadata server when the id is unset or `auto`. A project id that
    /// cannot be detected is a fatal configuration error.
    pub async fn resolve_metrics_url(&self) -> Result<String> {
        if let Some(url) = &self.prometheus_url {
            if !url.is_empty() {
                return Ok(url.trim_end_matches('/').to_string());
            }
        }

        let project = match self.gcp_project_id.as_deref() {
            Some(id) if !id.is_empty() && id != "auto" => id.to_string(),
            _ => detect_project_id(self.http_timeout()).await?,
        };

        info!(project = %project, "Using Google Managed Prometheus endpoint");
        Ok(gmp_url(&project))
    }
}

/// Build the Managed Prometheus query base URL for a project.
fn gmp_url(project: &str) -> String {
    format!("{}/{}/location/global/prometheus", GMP_QUERY_URL, project)
}

/// Ask the GCE metadata server for the current project id.
async fn detect_project_id(timeout: Duration) -> Result<String> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

    let response = client
        .get(METADATA_PROJECT_URL)
        .header("Metadata-Flavor", "Google")
        .send()
        .await
        .map_err(|e| {
            Error::Config(format!(
                "GCP project id could not be auto-detected (set GCP_PROJECT_ID or PROMETHEUS_URL): {}",
                e
            ))
        })?;

    if !response.status().is_success() {
        return Err(Error::Config(format!(
            "GCP metadata server returned {} while detecting the project id",
            response.status()
        )));
    }

    let project = response
        .text()
        .await
        .map_err(|e| Error::Config(format!("Failed to read metadata response: {}", e)))?;

    let project = project.trim().to_string();
    if project.is_empty() {
        return Err(Error::Config(
            "GCP metadata server returned an empty project id".into(),
        ));
    }

    Ok(project)
}
