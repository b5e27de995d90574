//! Controller module
//!
//! Implements the periodic reconciliation loop that joins metric
//! observations with cluster state and expands PVCs under policy.

mod reconciler;

pub use reconciler::{run, ReconcilerContext};
#[allow(unused_imports)]
pub use reconciler::{
    evaluate, run_iteration, Decision, IterationSummary, SkipReason, REASON_AT_MAX_SIZE,
    REASON_CLASS_NOT_EXPANDABLE, REASON_RESIZE_FAILED, REASON_RESIZE_SUCCEEDED,
    REASON_RESIZE_TRIGGERED,
};
