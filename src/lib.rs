//! Volume Autoscaler - PVC expansion controller for Kubernetes
//!
//! Watches volume utilization through a Prometheus-compatible backend and
//! grows PersistentVolumeClaims in place before they run out of bytes or
//! inodes, so operators can start volumes small instead of pre-provisioning
//! for the worst case.
//!
//! # Architecture
//!
//! The controller follows an "Eyes, Brain, Hands" pattern:
//!
//! ```text
//! Metrics Watcher (Eyes) → Reconciler (Brain) → Cluster Adapter (Hands)
//! ```
//!
//! Every interval the reconciler joins one metrics fetch with one PVC list,
//! advances a per-PVC hysteresis counter stored as an annotation, and issues
//! bounded resizes under a cooldown. There is no database and no informer
//! cache: each iteration is self-contained, which keeps behavior across
//! restarts trivial to reason about. The deployment contract is one replica
//! with `Recreate` rollouts.
//!
//! # Modules
//!
//! - [`adapters`] - infrastructure adapters implementing the domain ports
//! - [`config`] - environment-backed global settings
//! - [`controller`] - the reconciliation loop
//! - [`domain`] - policy resolution, sizing arithmetic, durable state, ports
//! - [`error`] - error types
//! - [`metrics`] - Prometheus query integration
//! - [`telemetry`] - the controller's own counters and gauges

pub mod adapters;
pub mod config;
pub mod controller;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod telemetry;

// Re-export commonly used types
pub use config::Settings;
pub use controller::{ReconcilerContext, run_iteration};
pub use domain::{ScalingPolicy, VolumeState};
pub use error::{Error, Result};
pub use metrics::MetricsWatcher;
