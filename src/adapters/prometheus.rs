//! Prometheus Metrics Adapter
//!
//! Implements the `MetricsProvider` port using the Prometheus-compatible
//! query backend.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::ports::{MetricsProvider, PvcId, VolumeUsage};
use crate::error::Result;
use crate::metrics::MetricsWatcher;

/// Prometheus-based metrics provider adapter.
///
/// Wraps the `MetricsWatcher` to implement the `MetricsProvider` port.
pub struct PrometheusMetricsAdapter {
    watcher: Arc<MetricsWatcher>,
}

impl PrometheusMetricsAdapter {
    /// Create a new Prometheus metrics adapter.
    pub fn new(watcher: Arc<MetricsWatcher>) -> Self {
        Self { watcher }
    }

    /// Get a reference to the underlying watcher.
    #[allow(dead_code)]
    pub fn watcher(&self) -> &MetricsWatcher {
        &self.watcher
    }
}

impl std::fmt::Debug for PrometheusMetricsAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusMetricsAdapter").finish()
    }
}

#[async_trait]
impl MetricsProvider for PrometheusMetricsAdapter {
    async fn fetch_usage(&self) -> Result<HashMap<PvcId, VolumeUsage>> {
        self.watcher.fetch_usage().await
    }

    async fn health_check(&self) -> Result<()> {
        self.watcher.health_check().await
    }
}
