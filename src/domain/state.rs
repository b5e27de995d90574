//! Durable per-PVC state
//!
//! The controller keeps no database. The two facts that must survive a
//! restart - when a PVC was last resized and how many consecutive intervals
//! it has spent above its threshold - live as annotations on the PVC itself,
//! written atomically with the patches that change them. They are re-read
//! from the fresh PVC list every iteration and never cached in-process.

use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::BTreeMap;
use tracing::warn;

use crate::domain::ports::PvcSnapshot;

/// Annotation carrying the RFC3339 timestamp of the last successful resize.
pub const LAST_RESIZED_AT_ANNOTATION: &str = "volume.autoscaler.kubernetes.io/last-resized-at";

/// Annotation carrying the consecutive-intervals-above-threshold counter.
pub const SCALE_COUNTER_ANNOTATION: &str = "volume.autoscaler.kubernetes.io/scale-above-counter";

/// The durable state pair for one PVC.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeState {
    /// When the last successful resize happened; `None` before the first one
    pub last_resized_at: Option<DateTime<Utc>>,

    /// Consecutive triggering observations seen so far
    pub intervals_above_threshold: u32,
}

impl VolumeState {
    pub fn new(last_resized_at: Option<DateTime<Utc>>, intervals_above_threshold: u32) -> Self {
        Self {
            last_resized_at,
            intervals_above_threshold,
        }
    }

    /// Decode state from a PVC's annotations.
    ///
    /// Unreadable values degrade to the zero state for that field: a corrupt
    /// annotation on one PVC must not stop reconciliation.
    pub fn from_snapshot(snapshot: &PvcSnapshot) -> Self {
        let last_resized_at = snapshot.annotation(LAST_RESIZED_AT_ANNOTATION).and_then(|raw| {
            match DateTime::parse_from_rfc3339(raw) {
                Ok(ts) => Some(ts.with_timezone(&Utc)),
                Err(e) => {
                    warn!(pvc = %snapshot.id, value = raw, error = %e, "Ignoring unparseable last-resized-at annotation");
                    None
                }
            }
        });

        let intervals_above_threshold = snapshot
            .annotation(SCALE_COUNTER_ANNOTATION)
            .and_then(|raw| match raw.parse::<u32>() {
                Ok(n) => Some(n),
                Err(e) => {
                    warn!(pvc = %snapshot.id, value = raw, error = %e, "Ignoring unparseable scale counter annotation");
                    None
                }
            })
            .unwrap_or(0);

        Self {
            last_resized_at,
            intervals_above_threshold,
        }
    }

    /// Encode the state as annotation key/value pairs for a patch body.
    pub fn to_annotations(&self) -> BTreeMap<String, String> {
        let mut annotations = BTreeMap::new();
        if let Some(ts) = self.last_resized_at {
            annotations.insert(
                LAST_RESIZED_AT_ANNOTATION.to_string(),
                ts.to_rfc3339_opts(SecondsFormat::Secs, true),
            );
        }
        annotations.insert(
            SCALE_COUNTER_ANNOTATION.to_string(),
            self.intervals_above_threshold.to_string(),
        );
        annotations
    }

    /// Whether a resize at `now` would violate the cooldown window.
    pub fn in_cooldown(&self, now: DateTime<Utc>, cooldown_seconds: u64) -> bool {
        match self.last_resized_at {
            Some(last) => {
                now.signed_duration_since(last) < chrono::Duration::seconds(cooldown_seconds as i64)
            }
            None => false,
        }
    }

    /// Copy of this state with a new counter value.
    pub fn with_counter(&self, counter: u32) -> Self {
        Self {
            last_resized_at: self.last_resized_at,
            intervals_above_threshold: counter,
        }
    }

    /// State written by a successful resize (or an at-ceiling stamp): the
    /// clock restarts and the counter resets.
    pub fn resized_at(now: DateTime<Utc>) -> Self {
        Self {
            last_resized_at: Some(now),
            intervals_above_threshold: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::PvcId;
    use chrono::TimeZone;

    fn snapshot_with(annotations: &[(&str, &str)]) -> PvcSnapshot {
        PvcSnapshot {
            id: PvcId::new("default", "data"),
            storage_class: Some("standard".into()),
            requested_bytes: 10_000_000_000,
            phase: Some("Bound".into()),
            annotations: annotations
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            expandable: true,
        }
    }

    #[test]
    fn test_round_trip() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let state = VolumeState::new(Some(ts), 4);

        let annotations = state.to_annotations();
        assert_eq!(
            annotations.get(LAST_RESIZED_AT_ANNOTATION).unwrap(),
            "2024-03-01T12:00:00Z"
        );
        assert_eq!(annotations.get(SCALE_COUNTER_ANNOTATION).unwrap(), "4");

        let snapshot = snapshot_with(&[
            (LAST_RESIZED_AT_ANNOTATION, "2024-03-01T12:00:00Z"),
            (SCALE_COUNTER_ANNOTATION, "4"),
        ]);
        assert_eq!(VolumeState::from_snapshot(&snapshot), state);
    }

    #[test]
    fn test_missing_annotations_default_to_zero_state() {
        let state = VolumeState::from_snapshot(&snapshot_with(&[]));
        assert_eq!(state, VolumeState::default());
    }

    #[test]
    fn test_garbage_annotations_degrade_gracefully() {
        let snapshot = snapshot_with(&[
            (LAST_RESIZED_AT_ANNOTATION, "yesterday-ish"),
            (SCALE_COUNTER_ANNOTATION, "-3"),
        ]);
        let state = VolumeState::from_snapshot(&snapshot);
        assert!(state.last_resized_at.is_none());
        assert_eq!(state.intervals_above_threshold, 0);
    }

    #[test]
    fn test_cooldown_window() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let one_hour_ago = now - chrono::Duration::hours(1);

        let state = VolumeState::new(Some(one_hour_ago), 0);
        assert!(state.in_cooldown(now, 22_200));
        assert!(!state.in_cooldown(now, 3_600));
        assert!(!state.in_cooldown(now, 0));

        // Never resized means never cooling down
        assert!(!VolumeState::default().in_cooldown(now, 22_200));
    }

    #[test]
    fn test_cooldown_boundary_is_inclusive() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let exactly = now - chrono::Duration::seconds(300);
        let state = VolumeState::new(Some(exactly), 0);

        // Exactly at the boundary the window has elapsed
        assert!(!state.in_cooldown(now, 300));
        assert!(state.in_cooldown(now, 301));
    }

    #[test]
    fn test_resized_at_resets_counter() {
        let now = Utc::now();
        let state = VolumeState::resized_at(now);
        assert_eq!(state.last_resized_at, Some(now));
        assert_eq!(state.intervals_above_threshold, 0);
    }
}
