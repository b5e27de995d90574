//! Domain Layer
//!
//! Core decision logic and the port traits it consumes, kept free of
//! Kubernetes and HTTP machinery so every rule is testable in isolation:
//!
//! - **Ports** (`ports.rs`) - trait abstractions over the metrics backend,
//!   the cluster, and the notification sink, plus the value objects that
//!   cross them
//! - **Policy** (`policy.rs`) - layered per-PVC scaling policy resolution
//! - **Sizing** (`sizing.rs`) - pure target-size arithmetic
//! - **State** (`state.rs`) - the durable annotation-backed counter/timestamp
//! - **Quantity** (`quantity.rs`) - Kubernetes resource quantity parsing

pub mod policy;
pub mod ports;
pub mod quantity;
pub mod sizing;
pub mod state;

// Re-export commonly used types
#[allow(unused_imports)]
pub use policy::ScalingPolicy;
#[allow(unused_imports)]
pub use ports::{
    EventSeverity, MetricsProvider, PatchOutcome, PvcId, PvcSnapshot, ResizeEvent, ScaleNotifier,
    VolumeRepository, VolumeUsage,
};
#[allow(unused_imports)]
pub use state::VolumeState;
