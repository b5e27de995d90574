//! Per-PVC scaling policy
//!
//! A PVC's effective policy is layered: hard-coded defaults, then global
//! configuration from the environment (both already merged by the settings
//! parser), then per-PVC annotation overrides. Any annotation that fails to
//! parse is logged and the lower layer's value is kept, so an operator typo
//! on one PVC never stops reconciliation for the cluster.

use tracing::warn;

use crate::config::Settings;
use crate::domain::ports::PvcSnapshot;
use crate::domain::quantity::parse_quantity;

/// Namespace for every annotation the controller reads or writes.
pub const ANNOTATION_PREFIX: &str = "volume.autoscaler.kubernetes.io/";

pub const SCALE_ABOVE_PERCENT_ANNOTATION: &str =
    "volume.autoscaler.kubernetes.io/scale-above-percent";
pub const SCALE_AFTER_INTERVALS_ANNOTATION: &str =
    "volume.autoscaler.kubernetes.io/scale-after-intervals";
pub const SCALE_UP_PERCENT_ANNOTATION: &str = "volume.autoscaler.kubernetes.io/scale-up-percent";
pub const SCALE_UP_MIN_INCREMENT_ANNOTATION: &str =
    "volume.autoscaler.kubernetes.io/scale-up-min-increment";
pub const SCALE_UP_MAX_INCREMENT_ANNOTATION: &str =
    "volume.autoscaler.kubernetes.io/scale-up-max-increment";
pub const SCALE_UP_MAX_SIZE_ANNOTATION: &str = "volume.autoscaler.kubernetes.io/scale-up-max-size";
pub const SCALE_COOLDOWN_TIME_ANNOTATION: &str =
    "volume.autoscaler.kubernetes.io/scale-cooldown-time";
pub const IGNORE_ANNOTATION: &str = "volume.autoscaler.kubernetes.io/ignore";

/// Effective scaling policy for one PVC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalingPolicy {
    /// Usage percentage at which observations start counting, 1-99
    pub scale_above_percent: u32,

    /// Consecutive triggering observations required before a resize
    pub scale_after_intervals: u32,

    /// Growth rate per resize, in percent of the current size
    pub scale_up_percent: u32,

    /// Smallest allowed growth step in bytes
    pub scale_up_min_increment: u64,

    /// Largest allowed growth step in bytes
    pub scale_up_max_increment: u64,

    /// Absolute size ceiling in bytes
    pub scale_up_max_size: u64,

    /// Minimum seconds between two resizes of this PVC
    pub scale_cooldown_seconds: u64,

    /// Never resize this PVC
    pub ignore: bool,
}

impl ScalingPolicy {
    /// Policy from global configuration alone (defaults + environment).
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            scale_above_percent: settings.scale_above_percent,
            scale_after_intervals: settings.scale_after_intervals,
            scale_up_percent: settings.scale_up_percent,
            scale_up_min_increment: settings.scale_up_min_increment,
            scale_up_max_increment: settings.scale_up_max_increment,
            scale_up_max_size: settings.scale_up_max_size,
            scale_cooldown_seconds: settings.scale_cooldown_time,
            ignore: false,
        }
    }

    /// Resolve the effective policy for a PVC by applying its annotation
    /// overrides on top of the global configuration.
    ///
    /// Deterministic: the same settings and snapshot always produce the same
    /// policy.
    pub fn resolve(settings: &Settings, snapshot: &PvcSnapshot) -> Self {
        let base = Self::from_settings(settings);
        let mut policy = base.clone();

        if let Some(v) = parse_override(snapshot, SCALE_ABOVE_PERCENT_ANNOTATION, parse_u32) {
            policy.scale_above_percent = v;
        }
        if let Some(v) = parse_override(snapshot, SCALE_AFTER_INTERVALS_ANNOTATION, parse_u32) {
            policy.scale_after_intervals = v;
        }
        if let Some(v) = parse_override(snapshot, SCALE_UP_PERCENT_ANNOTATION, parse_u32) {
            policy.scale_up_percent = v;
        }
        if let Some(v) = parse_override(snapshot, SCALE_UP_MIN_INCREMENT_ANNOTATION, parse_bytes) {
            policy.scale_up_min_increment = v;
        }
        if let Some(v) = parse_override(snapshot, SCALE_UP_MAX_INCREMENT_ANNOTATION, parse_bytes) {
            policy.scale_up_max_increment = v;
        }
        if let Some(v) = parse_override(snapshot, SCALE_UP_MAX_SIZE_ANNOTATION, parse_bytes) {
            policy.scale_up_max_size = v;
        }
        if let Some(v) = parse_override(snapshot, SCALE_COOLDOWN_TIME_ANNOTATION, parse_u64) {
            policy.scale_cooldown_seconds = v;
        }
        if let Some(v) = parse_override(snapshot, IGNORE_ANNOTATION, parse_bool) {
            policy.ignore = v;
        }

        policy.validated_against(&base, &snapshot.id.to_string())
    }

    /// Range-check annotation overrides, reverting invalid fields to the
    /// lower layer.
    fn validated_against(mut self, base: &Self, pvc: &str) -> Self {
        if !(1..=99).contains(&self.scale_above_percent) {
            warn!(
                pvc = pvc,
                value = self.scale_above_percent,
                "scale-above-percent outside 1-99, keeping global value"
            );
            self.scale_above_percent = base.scale_above_percent;
        }
        if self.scale_after_intervals == 0 {
            warn!(
                pvc = pvc,
                "scale-after-intervals must be at least 1, keeping global value"
            );
            self.scale_after_intervals = base.scale_after_intervals;
        }
        if self.scale_up_max_increment < self.scale_up_min_increment {
            warn!(
                pvc = pvc,
                min = self.scale_up_min_increment,
                max = self.scale_up_max_increment,
                "scale-up-max-increment below scale-up-min-increment, keeping global increments"
            );
            self.scale_up_min_increment = base.scale_up_min_increment;
            self.scale_up_max_increment = base.scale_up_max_increment;
        }
        self
    }
}

/// Read one annotation and parse it, warning and returning `None` (keep the
/// lower layer) on failure.
fn parse_override<T>(
    snapshot: &PvcSnapshot,
    key: &str,
    parse: fn(&str) -> Result<T, String>,
) -> Option<T> {
    let raw = snapshot.annotation(key)?;
    match parse(raw) {
        Ok(v) => Some(v),
        Err(reason) => {
            warn!(
                pvc = %snapshot.id,
                annotation = key,
                value = raw,
                reason = reason,
                "Ignoring unparseable policy annotation"
            );
            None
        }
    }
}

fn parse_u32(raw: &str) -> Result<u32, String> {
    raw.trim().parse::<u32>().map_err(|e| e.to_string())
}

fn parse_u64(raw: &str) -> Result<u64, String> {
    raw.trim().parse::<u64>().map_err(|e| e.to_string())
}

fn parse_bytes(raw: &str) -> Result<u64, String> {
    parse_quantity(raw).map_err(|e| e.to_string())
}

fn parse_bool(raw: &str) -> Result<bool, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(format!("not a boolean: {:?}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::PvcId;
    use clap::Parser;
    use std::collections::BTreeMap;

    fn settings() -> Settings {
        Settings::try_parse_from(["volume-autoscaler"]).unwrap()
    }

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
    fn test_no_annotations_yields_global_policy() {
        let s = settings();
        let policy = ScalingPolicy::resolve(&s, &snapshot_with(&[]));
        assert_eq!(policy, ScalingPolicy::from_settings(&s));
        assert!(!policy.ignore);
    }

    #[test]
    fn test_annotation_overrides_apply() {
        let policy = ScalingPolicy::resolve(
            &settings(),
            &snapshot_with(&[
                (SCALE_ABOVE_PERCENT_ANNOTATION, "90"),
                (SCALE_AFTER_INTERVALS_ANNOTATION, "3"),
                (SCALE_UP_PERCENT_ANNOTATION, "50"),
                (SCALE_COOLDOWN_TIME_ANNOTATION, "600"),
                (IGNORE_ANNOTATION, "true"),
            ]),
        );

        assert_eq!(policy.scale_above_percent, 90);
        assert_eq!(policy.scale_after_intervals, 3);
        assert_eq!(policy.scale_up_percent, 50);
        assert_eq!(policy.scale_cooldown_seconds, 600);
        assert!(policy.ignore);
    }

    #[test]
    fn test_byte_annotations_accept_quantities() {
        let policy = ScalingPolicy::resolve(
            &settings(),
            &snapshot_with(&[
                (SCALE_UP_MIN_INCREMENT_ANNOTATION, "2Gi"),
                (SCALE_UP_MAX_SIZE_ANNOTATION, "1Ti"),
            ]),
        );

        assert_eq!(policy.scale_up_min_increment, 2_147_483_648);
        assert_eq!(policy.scale_up_max_size, 1_099_511_627_776);
    }

    #[test]
    fn test_unparseable_annotation_keeps_lower_layer() {
        let s = settings();
        let policy = ScalingPolicy::resolve(
            &s,
            &snapshot_with(&[
                (SCALE_ABOVE_PERCENT_ANNOTATION, "lots"),
                (SCALE_UP_MAX_SIZE_ANNOTATION, "1Zi"),
                (IGNORE_ANNOTATION, "maybe"),
            ]),
        );

        assert_eq!(policy.scale_above_percent, s.scale_above_percent);
        assert_eq!(policy.scale_up_max_size, s.scale_up_max_size);
        assert!(!policy.ignore);
    }

    #[test]
    fn test_out_of_range_threshold_reverts() {
        let s = settings();
        let policy =
            ScalingPolicy::resolve(&s, &snapshot_with(&[(SCALE_ABOVE_PERCENT_ANNOTATION, "100")]));
        assert_eq!(policy.scale_above_percent, s.scale_above_percent);

        let policy =
            ScalingPolicy::resolve(&s, &snapshot_with(&[(SCALE_ABOVE_PERCENT_ANNOTATION, "0")]));
        assert_eq!(policy.scale_above_percent, s.scale_above_percent);
    }

    #[test]
    fn test_inverted_increments_revert_together() {
        let s = settings();
        let policy = ScalingPolicy::resolve(
            &s,
            &snapshot_with(&[
                (SCALE_UP_MIN_INCREMENT_ANNOTATION, "10Gi"),
                (SCALE_UP_MAX_INCREMENT_ANNOTATION, "1Gi"),
            ]),
        );

        assert_eq!(policy.scale_up_min_increment, s.scale_up_min_increment);
        assert_eq!(policy.scale_up_max_increment, s.scale_up_max_increment);
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let s = settings();
        let snapshot = snapshot_with(&[
            (SCALE_ABOVE_PERCENT_ANNOTATION, "85"),
            (SCALE_UP_MIN_INCREMENT_ANNOTATION, "5Gi"),
        ]);

        let first = ScalingPolicy::resolve(&s, &snapshot);
        for _ in 0..10 {
            assert_eq!(ScalingPolicy::resolve(&s, &snapshot), first);
        }
    }

    #[test]
    fn test_annotation_keys_share_prefix() {
        for key in [
            SCALE_ABOVE_PERCENT_ANNOTATION,
            SCALE_AFTER_INTERVALS_ANNOTATION,
            SCALE_UP_PERCENT_ANNOTATION,
            SCALE_UP_MIN_INCREMENT_ANNOTATION,
            SCALE_UP_MAX_INCREMENT_ANNOTATION,
            SCALE_UP_MAX_SIZE_ANNOTATION,
            SCALE_COOLDOWN_TIME_ANNOTATION,
            IGNORE_ANNOTATION,
        ] {
            assert!(key.starts_with(ANNOTATION_PREFIX));
        }
    }

    #[test]
    fn test_empty_annotation_map_is_cheap() {
        let snapshot = PvcSnapshot {
            annotations: BTreeMap::new(),
            ..snapshot_with(&[])
        };
        let s = settings();
        assert_eq!(
            ScalingPolicy::resolve(&s, &snapshot),
            ScalingPolicy::from_settings(&s)
        );
    }
}
