//! Infrastructure Adapters
//!
//! Implementations of the domain ports against real infrastructure,
//! following the Port/Adapter (Hexagonal) architecture pattern:
//!
//! - `PrometheusMetricsAdapter` implements `MetricsProvider` over the
//!   Prometheus-compatible query backend
//! - `KubeVolumeRepository` implements `VolumeRepository` over the
//!   Kubernetes API
//! - `SlackNotifier` implements `ScaleNotifier` over an incoming webhook
//!
//! Tests exercise the reconciler through the same ports with in-memory
//! fakes, so nothing in the decision logic knows which side it is on.

mod kubernetes;
mod prometheus;
mod slack;

pub use kubernetes::KubeVolumeRepository;
#[allow(unused_imports)]
pub use kubernetes::EVENT_REPORTER;
pub use prometheus::PrometheusMetricsAdapter;
#[allow(unused_imports)]
pub use slack::RecordingNotifier;
pub use slack::{SlackConfig, SlackNotifier};
