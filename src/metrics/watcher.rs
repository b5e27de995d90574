//! Metrics Watcher
//!
//! Queries the Prometheus-compatible backend for volume utilization and
//! joins the three canonical queries into one observation per PVC. The
//! fetch is all-or-nothing: a failure of any query aborts the whole
//! iteration, because acting on a partial view would advance hysteresis
//! counters for PVCs that simply were not reported.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::domain::ports::{PvcId, VolumeUsage};
use crate::error::{Error, Result};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the metrics watcher
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Base URL of the Prometheus-compatible query API
    pub query_url: String,

    /// Query timeout
    pub query_timeout: Duration,

    /// Label matcher spliced verbatim into every query selector
    pub label_match: String,
}

// =============================================================================
// Canonical queries
// =============================================================================

/// Percentage of bytes used per PVC.
pub fn bytes_pct_query(label_match: &str) -> String {
    format!(
        "max by (namespace, persistentvolumeclaim) (100 - (kubelet_volume_stats_available_bytes{{{m}}} / kubelet_volume_stats_capacity_bytes{{{m}}}) * 100)",
        m = label_match
    )
}

/// Percentage of inodes used per PVC.
pub fn inodes_pct_query(label_match: &str) -> String {
    format!(
        "max by (namespace, persistentvolumeclaim) (100 - (kubelet_volume_stats_inodes_free{{{m}}} / kubelet_volume_stats_inodes{{{m}}}) * 100)",
        m = label_match
    )
}

/// Filesystem capacity in bytes per PVC.
pub fn capacity_bytes_query(label_match: &str) -> String {
    format!(
        "max by (namespace, persistentvolumeclaim) (kubelet_volume_stats_capacity_bytes{{{m}}})",
        m = label_match
    )
}

// =============================================================================
// Prometheus Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct PrometheusResponse {
    status: String,
    data: PrometheusData,
}

#[derive(Debug, Deserialize)]
struct PrometheusData {
    #[serde(rename = "resultType")]
    #[allow(dead_code)]
    result_type: String,
    result: Vec<PrometheusResult>,
}

#[derive(Debug, Deserialize)]
struct PrometheusResult {
    metric: HashMap<String, String>,
    #[serde(default)]
    value: Option<(f64, String)>,
}

// =============================================================================
// Metrics Watcher
// =============================================================================

/// Fetches volume utilization from the metrics backend.
pub struct MetricsWatcher {
    config: MetricsConfig,
    client: Client,
}

impl MetricsWatcher {
    /// Create a new metrics watcher
    pub fn new(config: MetricsConfig) -> Result<Arc<Self>> {
        let client = Client::builder()
            .timeout(config.query_timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Arc::new(Self { config, client }))
    }

    /// Check if the backend is reachable
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<()> {
        let url = format!("{}/-/healthy", self.config.query_url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(Error::PrometheusConnection)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::PrometheusQuery(format!(
                "Health check failed: {}",
                response.status()
            )))
        }
    }

    /// Run the three canonical queries concurrently and merge their rows into
    /// one observation per PVC.
    #[instrument(skip(self))]
    pub async fn fetch_usage(&self) -> Result<HashMap<PvcId, VolumeUsage>> {
        let label_match = self.config.label_match.as_str();

        let bytes_query = bytes_pct_query(label_match);
        let inodes_query = inodes_pct_query(label_match);
        let capacity_query = capacity_bytes_query(label_match);

        let (bytes, inodes, capacity) = futures::try_join!(
            self.query_rows(&bytes_query),
            self.query_rows(&inodes_query),
            self.query_rows(&capacity_query),
        )?;

        Ok(merge_rows(bytes, inodes, capacity))
    }

    /// Execute one instant query and return its rows keyed by PVC identity.
    async fn query_rows(&self, query: &str) -> Result<Vec<(PvcId, f64)>> {
        let url = format!(
            "{}/api/v1/query?query={}",
            self.config.query_url,
            urlencoding::encode(query)
        );

        debug!("Querying metrics backend: {}", query);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(Error::PrometheusConnection)?;

        if !response.status().is_success() {
            return Err(Error::PrometheusQuery(format!(
                "Query failed with status: {}",
                response.status()
            )));
        }

        let prom_response: PrometheusResponse = response
            .json()
            .await
            .map_err(|e| Error::PrometheusResponseParse(e.to_string()))?;

        if prom_response.status != "success" {
            return Err(Error::PrometheusQuery(format!(
                "Prometheus returned status: {}",
                prom_response.status
            )));
        }

        Ok(extract_rows(prom_response))
    }
}

impl std::fmt::Debug for MetricsWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsWatcher")
            .field("query_url", &self.config.query_url)
            .field("label_match", &self.config.label_match)
            .finish()
    }
}

/// Pull identified, finite samples out of a query response.
///
/// Rows missing either identifying label are discarded; so are NaN and Inf
/// samples, which Prometheus emits for volumes mid-teardown.
fn extract_rows(response: PrometheusResponse) -> Vec<(PvcId, f64)> {
    let mut rows = Vec::with_capacity(response.data.result.len());

    for result in response.data.result {
        let namespace = result.metric.get("namespace");
        let name = result.metric.get("persistentvolumeclaim");
        let (namespace, name) = match (namespace, name) {
            (Some(ns), Some(n)) => (ns.clone(), n.clone()),
            _ => {
                debug!(labels = ?result.metric, "Discarding row without PVC identity labels");
                continue;
            }
        };

        let value = match &result.value {
            Some((_, value_str)) => match value_str.parse::<f64>() {
                Ok(v) if v.is_finite() => v,
                _ => {
                    debug!(pvc = %format!("{}/{}", namespace, name), "Discarding non-finite sample");
                    continue;
                }
            },
            None => continue,
        };

        rows.push((PvcId::new(namespace, name), value));
    }

    rows
}

/// Merge the three query result sets into per-PVC observations.
///
/// Duplicate series for one PVC keep the maximum for percent values (the
/// worst replica wins) and the last-seen value for capacity.
fn merge_rows(
    bytes: Vec<(PvcId, f64)>,
    inodes: Vec<(PvcId, f64)>,
    capacity: Vec<(PvcId, f64)>,
) -> HashMap<PvcId, VolumeUsage> {
    let mut usage: HashMap<PvcId, VolumeUsage> = HashMap::new();

    for (id, value) in bytes {
        let entry = usage.entry(id).or_default();
        entry.bytes_used_pct = Some(entry.bytes_used_pct.map_or(value, |prev| prev.max(value)));
    }

    for (id, value) in inodes {
        let entry = usage.entry(id).or_default();
        entry.inodes_used_pct = Some(entry.inodes_used_pct.map_or(value, |prev| prev.max(value)));
    }

    for (id, value) in capacity {
        let entry = usage.entry(id).or_default();
        entry.capacity_bytes = Some(value.max(0.0) as u64);
    }

    usage
}
