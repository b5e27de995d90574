//! Controller self-metrics
//!
//! Counters and gauges describing the reconciler's own behavior, registered
//! in the default Prometheus registry and served from the `/metrics`
//! endpoint. Gauges describe the latest completed iteration; counters are
//! cumulative since process start.

use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, register_int_gauge_vec,
    Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, TextEncoder,
};

use crate::config::Settings;
use crate::error::{Error, Result};

/// PVCs evaluated against their policy (measured and Bound).
pub static RESIZE_EVALUATED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "resize_evaluated_total",
        "Number of PVC evaluations performed"
    )
    .expect("register resize_evaluated_total")
});

/// Resize patches issued (or suppressed by dry-run).
pub static RESIZE_ATTEMPTED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "resize_attempted_total",
        "Number of resize attempts started"
    )
    .expect("register resize_attempted_total")
});

pub static RESIZE_SUCCESSFUL_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "resize_successful_total",
        "Number of resizes acknowledged by the API server"
    )
    .expect("register resize_successful_total")
});

pub static RESIZE_FAILURE_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("resize_failure_total", "Number of failed resize attempts")
        .expect("register resize_failure_total")
});

/// Triggered PVCs that can never be resized, by reason.
pub static RESIZE_SKIPPED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "resize_skipped_total",
        "Number of triggering observations on PVCs the controller will not resize",
        &["reason"]
    )
    .expect("register resize_skipped_total")
});

pub static ITERATION_FAILED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "iteration_failed_total",
        "Number of reconciliation iterations abandoned before completion"
    )
    .expect("register iteration_failed_total")
});

pub static ITERATION_OVERRUN_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "iteration_overrun_total",
        "Number of iterations that ran longer than the configured interval"
    )
    .expect("register iteration_overrun_total")
});

pub static NUM_VALID_PVCS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "num_valid_pvcs",
        "PVCs that were measured and evaluated in the latest iteration"
    )
    .expect("register num_valid_pvcs")
});

pub static NUM_PVCS_ABOVE_THRESHOLD: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "num_pvcs_above_threshold",
        "Evaluated PVCs above their usage threshold in the latest iteration"
    )
    .expect("register num_pvcs_above_threshold")
});

pub static NUM_PVCS_BELOW_THRESHOLD: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "num_pvcs_below_threshold",
        "Evaluated PVCs below their usage threshold in the latest iteration"
    )
    .expect("register num_pvcs_below_threshold")
});

pub static NUM_UNMEASURED_PVCS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "num_unmeasured_pvcs",
        "Bound PVCs with no metric observation in the latest iteration"
    )
    .expect("register num_unmeasured_pvcs")
});

static RELEASE_INFO: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!("release_info", "Controller build information", &["version"])
        .expect("register release_info")
});

static SETTINGS_INFO: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "settings_info",
        "Effective global configuration",
        &[
            "interval_time",
            "scale_above_percent",
            "scale_after_intervals",
            "scale_up_percent",
            "scale_cooldown_time",
            "dry_run"
        ]
    )
    .expect("register settings_info")
});

/// Publish the constant info gauges. Called once at startup.
pub fn publish_info(settings: &Settings) {
    RELEASE_INFO
        .with_label_values(&[env!("CARGO_PKG_VERSION")])
        .set(1);

    SETTINGS_INFO
        .with_label_values(&[
            &settings.interval_time.to_string(),
            &settings.scale_above_percent.to_string(),
            &settings.scale_after_intervals.to_string(),
            &settings.scale_up_percent.to_string(),
            &settings.scale_cooldown_time.to_string(),
            &settings.dry_run.to_string(),
        ])
        .set(1);
}

/// Reasons recorded on `resize_skipped_total`.
pub mod skip_reason {
    pub const IGNORED: &str = "ignored";
    pub const NOT_EXPANDABLE: &str = "storage_class_not_expandable";
    pub const MAX_BELOW_REQUEST: &str = "max_size_below_request";
}

/// Encode every registered metric in Prometheus text format.
pub fn render() -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| Error::Internal(format!("Failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer).map_err(|e| Error::Internal(format!("Metrics not UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_counters_accumulate() {
        let before = RESIZE_EVALUATED_TOTAL.get();
        RESIZE_EVALUATED_TOTAL.inc();
        RESIZE_EVALUATED_TOTAL.inc();
        assert_eq!(RESIZE_EVALUATED_TOTAL.get(), before + 2);
    }

    #[test]
    fn test_skip_reasons_are_labelled() {
        let before = RESIZE_SKIPPED_TOTAL
            .with_label_values(&[skip_reason::IGNORED])
            .get();
        RESIZE_SKIPPED_TOTAL
            .with_label_values(&[skip_reason::IGNORED])
            .inc();
        assert_eq!(
            RESIZE_SKIPPED_TOTAL
                .with_label_values(&[skip_reason::IGNORED])
                .get(),
            before + 1
        );
    }

    #[test]
    fn test_render_exposes_registered_metrics() {
        NUM_VALID_PVCS.set(7);
        let text = render().unwrap();
        assert!(text.contains("num_valid_pvcs"));
        assert!(text.contains("resize_evaluated_total"));
    }

    #[test]
    fn test_publish_info_sets_constant_gauges() {
        let settings = Settings::try_parse_from(["volume-autoscaler"]).unwrap();
        publish_info(&settings);

        let text = render().unwrap();
        assert!(text.contains("release_info"));
        assert!(text.contains("settings_info"));
        assert!(text.contains(env!("CARGO_PKG_VERSION")));
    }
}
