//! Kubernetes Cluster Adapter
//!
//! Implements the `VolumeRepository` port against the Kubernetes API: one
//! cluster-wide PVC list per iteration (joined with the storage-class list
//! for expansion capability), strategic-merge patches for size and state,
//! and best-effort Events on the PVCs the controller acts on.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::{Event, EventSource, ObjectReference, PersistentVolumeClaim};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{Api, ListParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::domain::ports::{EventSeverity, PatchOutcome, PvcId, PvcSnapshot, VolumeRepository};
use crate::domain::quantity::{format_quantity, parse_quantity};
use crate::domain::state::VolumeState;
use crate::error::{Error, Result};

/// Component name stamped on every Event this controller emits.
pub const EVENT_REPORTER: &str = "volume-autoscaler";

/// Kubernetes-backed volume repository.
#[derive(Clone)]
pub struct KubeVolumeRepository {
    client: Client,
    call_timeout: Duration,
}

impl KubeVolumeRepository {
    /// Create a new repository over an established client.
    pub fn new(client: Client, call_timeout: Duration) -> Self {
        Self {
            client,
            call_timeout,
        }
    }

    fn pvcs(&self, namespace: &str) -> Api<PersistentVolumeClaim> {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Run one API call under the configured timeout.
    async fn bounded<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, kube::Error>>,
    {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(Error::Kube(e)),
            Err(_) => Err(Error::Internal(format!(
                "Kubernetes API call timed out after {}s",
                self.call_timeout.as_secs()
            ))),
        }
    }

    /// Issue a strategic-merge patch, mapping not-found and conflict to
    /// non-fatal outcomes.
    async fn patch_pvc(&self, id: &PvcId, body: serde_json::Value) -> Result<PatchOutcome> {
        let api = self.pvcs(&id.namespace);
        let result = tokio::time::timeout(
            self.call_timeout,
            api.patch(&id.name, &PatchParams::default(), &Patch::Strategic(&body)),
        )
        .await;

        match result {
            Ok(Ok(_)) => Ok(PatchOutcome::Applied),
            Ok(Err(kube::Error::Api(e))) if e.code == 404 => {
                debug!(pvc = %id, "PVC disappeared mid-iteration, skipping patch");
                Ok(PatchOutcome::Gone)
            }
            Ok(Err(kube::Error::Api(e))) if e.code == 409 => {
                warn!(pvc = %id, "Conflicting write on PVC, skipping until next iteration");
                Ok(PatchOutcome::Conflict)
            }
            Ok(Err(e)) => Err(Error::Kube(e)),
            Err(_) => Err(Error::Internal(format!(
                "Kubernetes API call timed out after {}s",
                self.call_timeout.as_secs()
            ))),
        }
    }
}

impl std::fmt::Debug for KubeVolumeRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeVolumeRepository")
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

#[async_trait]
impl VolumeRepository for KubeVolumeRepository {
    #[instrument(skip(self))]
    async fn list_volumes(&self) -> Result<Vec<PvcSnapshot>> {
        let classes: Api<StorageClass> = Api::all(self.client.clone());
        let class_list = self.bounded(classes.list(&ListParams::default())).await?;

        let expandable: HashMap<String, bool> = class_list
            .items
            .iter()
            .map(|sc| (sc.name_any(), sc.allow_volume_expansion.unwrap_or(false)))
            .collect();

        let pvcs: Api<PersistentVolumeClaim> = Api::all(self.client.clone());
        let pvc_list = self.bounded(pvcs.list(&ListParams::default())).await?;

        let mut snapshots = Vec::with_capacity(pvc_list.items.len());
        for pvc in &pvc_list.items {
            match snapshot_from(pvc, &expandable) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => {
                    warn!(
                        pvc = %format!("{}/{}", pvc.namespace().unwrap_or_default(), pvc.name_any()),
                        error = %e,
                        "Skipping PVC without a readable storage request"
                    );
                }
            }
        }

        debug!(
            pvcs = snapshots.len(),
            classes = expandable.len(),
            "Listed cluster volumes"
        );
        Ok(snapshots)
    }

    #[instrument(skip(self, state))]
    async fn patch_size(
        &self,
        id: &PvcId,
        new_bytes: u64,
        state: &VolumeState,
    ) -> Result<PatchOutcome> {
        self.patch_pvc(id, size_patch_body(new_bytes, state)).await
    }

    #[instrument(skip(self, state))]
    async fn patch_state(&self, id: &PvcId, state: &VolumeState) -> Result<PatchOutcome> {
        self.patch_pvc(id, state_patch_body(state)).await
    }

    #[instrument(skip(self, message))]
    async fn emit_event(&self, id: &PvcId, reason: &str, message: &str, severity: EventSeverity) {
        let api: Api<Event> = Api::namespaced(self.client.clone(), &id.namespace);
        let event = build_event(id, reason, message, severity);

        let result = tokio::time::timeout(
            self.call_timeout,
            api.create(&PostParams::default(), &event),
        )
        .await;

        match result {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(pvc = %id, reason = reason, error = %e, "Failed to emit event"),
            Err(_) => warn!(pvc = %id, reason = reason, "Timed out emitting event"),
        }
    }
}

/// Build a snapshot from a listed PVC, resolving its class capability.
fn snapshot_from(
    pvc: &PersistentVolumeClaim,
    expandable_classes: &HashMap<String, bool>,
) -> Result<PvcSnapshot> {
    let id = PvcId::new(pvc.namespace().unwrap_or_default(), pvc.name_any());

    let storage_class = pvc
        .spec
        .as_ref()
        .and_then(|spec| spec.storage_class_name.clone());

    let requested = pvc
        .spec
        .as_ref()
        .and_then(|spec| spec.resources.as_ref())
        .and_then(|resources| resources.requests.as_ref())
        .and_then(|requests| requests.get("storage"))
        .ok_or_else(|| Error::QuantityParse {
            value: String::new(),
            reason: "no storage request in spec".to_string(),
        })?;

    let requested_bytes = parse_quantity(&requested.0)?;

    let expandable = storage_class
        .as_deref()
        .and_then(|name| expandable_classes.get(name).copied())
        .unwrap_or(false);

    Ok(PvcSnapshot {
        id,
        storage_class,
        requested_bytes,
        phase: pvc.status.as_ref().and_then(|status| status.phase.clone()),
        annotations: pvc.metadata.annotations.clone().unwrap_or_default(),
        expandable,
    })
}

/// Patch body changing the requested size and both state annotations in one
/// request.
fn size_patch_body(new_bytes: u64, state: &VolumeState) -> serde_json::Value {
    serde_json::json!({
        "metadata": { "annotations": state.to_annotations() },
        "spec": {
            "resources": {
                "requests": { "storage": format_quantity(new_bytes) }
            }
        }
    })
}

/// Patch body updating only the state annotations.
fn state_patch_body(state: &VolumeState) -> serde_json::Value {
    serde_json::json!({
        "metadata": { "annotations": state.to_annotations() }
    })
}

/// Build a core/v1 Event referencing the PVC.
fn build_event(id: &PvcId, reason: &str, message: &str, severity: EventSeverity) -> Event {
    let now = Time(Utc::now());

    Event {
        metadata: ObjectMeta {
            generate_name: Some(format!("{}.", id.name)),
            namespace: Some(id.namespace.clone()),
            ..Default::default()
        },
        involved_object: ObjectReference {
            api_version: Some("v1".to_string()),
            kind: Some("PersistentVolumeClaim".to_string()),
            name: Some(id.name.clone()),
            namespace: Some(id.namespace.clone()),
            ..Default::default()
        },
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        type_: Some(severity.as_str().to_string()),
        first_timestamp: Some(now.clone()),
        last_timestamp: Some(now),
        count: Some(1),
        source: Some(EventSource {
            component: Some(EVENT_REPORTER.to_string()),
            ..Default::default()
        }),
        reporting_component: Some(EVENT_REPORTER.to_string()),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::state::{LAST_RESIZED_AT_ANNOTATION, SCALE_COUNTER_ANNOTATION};
    use chrono::TimeZone;
    use k8s_openapi::api::core::v1::{
        PersistentVolumeClaimSpec, PersistentVolumeClaimStatus, VolumeResourceRequirements,
    };
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use std::collections::BTreeMap;

    fn test_pvc(
        namespace: &str,
        name: &str,
        storage_class: Option<&str>,
        request: &str,
        phase: &str,
    ) -> PersistentVolumeClaim {
        let mut requests = BTreeMap::new();
        requests.insert("storage".to_string(), Quantity(request.to_string()));

        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                annotations: Some(BTreeMap::new()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                storage_class_name: storage_class.map(str::to_string),
                resources: Some(VolumeResourceRequirements {
                    requests: Some(requests),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            status: Some(PersistentVolumeClaimStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
        }
    }

    fn classes(entries: &[(&str, bool)]) -> HashMap<String, bool> {
        entries
            .iter()
            .map(|(name, expandable)| (name.to_string(), *expandable))
            .collect()
    }

    // =========================================================================
    // Snapshot Construction Tests
    // =========================================================================

    #[test]
    fn test_snapshot_from_pvc() {
        let pvc = test_pvc("media", "library", Some("standard"), "10Gi", "Bound");
        let snapshot = snapshot_from(&pvc, &classes(&[("standard", true)])).unwrap();

        assert_eq!(snapshot.id, PvcId::new("media", "library"));
        assert_eq!(snapshot.storage_class.as_deref(), Some("standard"));
        assert_eq!(snapshot.requested_bytes, 10_737_418_240);
        assert!(snapshot.is_bound());
        assert!(snapshot.expandable);
    }

    #[test]
    fn test_snapshot_class_without_expansion() {
        let pvc = test_pvc("media", "library", Some("local-static"), "10Gi", "Bound");
        let snapshot = snapshot_from(&pvc, &classes(&[("local-static", false)])).unwrap();
        assert!(!snapshot.expandable);
    }

    #[test]
    fn test_snapshot_unknown_class_is_not_expandable() {
        let pvc = test_pvc("media", "library", Some("vanished"), "10Gi", "Bound");
        let snapshot = snapshot_from(&pvc, &classes(&[("standard", true)])).unwrap();
        assert!(!snapshot.expandable);
    }

    #[test]
    fn test_snapshot_no_class_is_not_expandable() {
        let pvc = test_pvc("media", "library", None, "10Gi", "Bound");
        let snapshot = snapshot_from(&pvc, &classes(&[("standard", true)])).unwrap();
        assert!(!snapshot.expandable);
    }

    #[test]
    fn test_snapshot_rejects_unreadable_request() {
        let pvc = test_pvc("media", "library", Some("standard"), "10Xi", "Bound");
        assert!(snapshot_from(&pvc, &classes(&[("standard", true)])).is_err());
    }

    #[test]
    fn test_snapshot_rejects_missing_request() {
        let mut pvc = test_pvc("media", "library", Some("standard"), "10Gi", "Bound");
        pvc.spec.as_mut().unwrap().resources = None;
        assert!(snapshot_from(&pvc, &classes(&[("standard", true)])).is_err());
    }

    // =========================================================================
    // Patch Body Tests
    // =========================================================================

    #[test]
    fn test_size_patch_carries_size_and_state_atomically() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let body = size_patch_body(12_000_000_000, &VolumeState::resized_at(ts));

        assert_eq!(
            body["spec"]["resources"]["requests"]["storage"],
            "12000000000"
        );
        assert_eq!(
            body["metadata"]["annotations"][LAST_RESIZED_AT_ANNOTATION],
            "2024-03-01T12:00:00Z"
        );
        assert_eq!(body["metadata"]["annotations"][SCALE_COUNTER_ANNOTATION], "0");
    }

    #[test]
    fn test_state_patch_touches_only_annotations() {
        let body = state_patch_body(&VolumeState::new(None, 3));

        assert!(body.get("spec").is_none());
        assert_eq!(body["metadata"]["annotations"][SCALE_COUNTER_ANNOTATION], "3");
    }

    // =========================================================================
    // Event Construction Tests
    // =========================================================================

    #[test]
    fn test_event_references_pvc() {
        let id = PvcId::new("media", "library");
        let event = build_event(&id, "VolumeResizeSucceeded", "grown", EventSeverity::Normal);

        assert_eq!(event.metadata.namespace.as_deref(), Some("media"));
        assert_eq!(event.metadata.generate_name.as_deref(), Some("library."));
        assert_eq!(
            event.involved_object.kind.as_deref(),
            Some("PersistentVolumeClaim")
        );
        assert_eq!(event.involved_object.name.as_deref(), Some("library"));
        assert_eq!(event.reason.as_deref(), Some("VolumeResizeSucceeded"));
        assert_eq!(event.type_.as_deref(), Some("Normal"));
        assert_eq!(
            event.source.as_ref().and_then(|s| s.component.as_deref()),
            Some(EVENT_REPORTER)
        );
    }

    #[test]
    fn test_warning_event_type() {
        let id = PvcId::new("media", "library");
        let event = build_event(&id, "VolumeAtMaxSize", "at ceiling", EventSeverity::Warning);
        assert_eq!(event.type_.as_deref(), Some("Warning"));
    }
}
