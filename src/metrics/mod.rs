//! Metrics module
//!
//! Provides volume utilization collection from the Prometheus-compatible
//! backend.

mod watcher;

#[allow(unused_imports)]
pub use watcher::{bytes_pct_query, capacity_bytes_query, inodes_pct_query};
pub use watcher::{MetricsConfig, MetricsWatcher};
