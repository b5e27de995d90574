//! Domain Ports (Port/Adapter Pattern)
//!
//! This module defines the abstractions the reconciler depends on.
//! Infrastructure adapters implement these traits against the real metrics
//! backend, the Kubernetes API, and the notification webhook; tests supply
//! in-memory fakes.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::state::VolumeState;
use crate::error::Result;

// =============================================================================
// Value Objects
// =============================================================================

/// Identity of a PersistentVolumeClaim: the (namespace, name) tuple.
///
/// Stable across resizes; the join key between metric rows and cluster state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PvcId {
    pub namespace: String,
    pub name: String,
}

impl PvcId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for PvcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// One iteration's utilization sample for a PVC.
///
/// Fields are independently optional: the backend may report bytes but not
/// inodes (or vice versa) for some filesystems.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VolumeUsage {
    /// Percentage of bytes used, 0-100
    pub bytes_used_pct: Option<f64>,

    /// Percentage of inodes used, 0-100
    pub inodes_used_pct: Option<f64>,

    /// Filesystem capacity as reported by the kubelet
    pub capacity_bytes: Option<u64>,
}

impl VolumeUsage {
    /// The fullest dimension of the volume, if any was reported.
    ///
    /// Either bytes or inodes running out makes the volume unusable, so the
    /// trigger check looks at whichever is worse.
    pub fn fullest_pct(&self) -> Option<f64> {
        match (self.bytes_used_pct, self.inodes_used_pct) {
            (Some(b), Some(i)) => Some(b.max(i)),
            (Some(b), None) => Some(b),
            (None, Some(i)) => Some(i),
            (None, None) => None,
        }
    }
}

/// Point-in-time view of a PVC as listed from the cluster.
#[derive(Debug, Clone)]
pub struct PvcSnapshot {
    pub id: PvcId,

    /// Name of the storage class backing this claim, if set
    pub storage_class: Option<String>,

    /// `spec.resources.requests.storage` in bytes
    pub requested_bytes: u64,

    /// `status.phase` (`Bound`, `Pending`, `Lost`)
    pub phase: Option<String>,

    /// All annotations on the object
    pub annotations: BTreeMap<String, String>,

    /// Whether the resolved storage class allows volume expansion
    pub expandable: bool,
}

impl PvcSnapshot {
    pub fn is_bound(&self) -> bool {
        self.phase.as_deref() == Some("Bound")
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }
}

/// Severity of a Kubernetes Event emitted on a PVC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSeverity {
    Normal,
    Warning,
}

impl EventSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSeverity::Normal => "Normal",
            EventSeverity::Warning => "Warning",
        }
    }
}

/// Result of a patch against the API server.
///
/// `Gone` and `Conflict` are non-fatal: the PVC disappeared or was modified
/// mid-iteration and is simply skipped until the next pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    Applied,
    Gone,
    Conflict,
}

/// Payload handed to the notifier when a resize attempt completes.
#[derive(Debug, Clone, PartialEq)]
pub struct ResizeEvent {
    pub id: PvcId,
    pub old_bytes: u64,
    pub new_bytes: u64,
    pub succeeded: bool,
    pub at: DateTime<Utc>,
}

// =============================================================================
// Metrics Port
// =============================================================================

/// Port for fetching volume utilization from the metrics backend.
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    /// Fetch one utilization observation per PVC the backend knows about.
    ///
    /// Implementations must be all-or-nothing: if any underlying query fails
    /// the whole fetch errors, so the reconciler never advances hysteresis
    /// counters from a partial view.
    async fn fetch_usage(&self) -> Result<std::collections::HashMap<PvcId, VolumeUsage>>;

    /// Check if the metrics backend is reachable.
    async fn health_check(&self) -> Result<()>;
}

// =============================================================================
// Cluster Port
// =============================================================================

/// Port for reading and mutating PVCs in the cluster.
#[async_trait]
pub trait VolumeRepository: Send + Sync {
    /// List every watched PVC with its storage-class expansion capability
    /// already resolved.
    async fn list_volumes(&self) -> Result<Vec<PvcSnapshot>>;

    /// Patch the requested size together with both state annotations in one
    /// atomic request.
    async fn patch_size(
        &self,
        id: &PvcId,
        new_bytes: u64,
        state: &VolumeState,
    ) -> Result<PatchOutcome>;

    /// Patch only the state annotations (counter bookkeeping between resizes).
    async fn patch_state(&self, id: &PvcId, state: &VolumeState) -> Result<PatchOutcome>;

    /// Emit a Kubernetes Event on the PVC. Best effort: implementations log
    /// and swallow failures.
    async fn emit_event(&self, id: &PvcId, reason: &str, message: &str, severity: EventSeverity);
}

// =============================================================================
// Notification Port
// =============================================================================

/// Port for pushing scale notifications to an external sink.
#[async_trait]
pub trait ScaleNotifier: Send + Sync {
    /// Deliver a notification. Best effort; never retried.
    async fn notify(&self, event: &ResizeEvent);
}
