//! Reconciler
//!
//! The periodic control loop. Each iteration joins one metrics fetch with
//! one cluster list, advances the per-PVC hysteresis counters, and issues
//! resizes under cooldown and bound restrictions. Iterations are
//! self-contained: all durable state is re-read from the PVCs every pass, so
//! a restart loses nothing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::Settings;
use crate::domain::policy::ScalingPolicy;
use crate::domain::ports::{
    EventSeverity, MetricsProvider, PvcSnapshot, ResizeEvent, ScaleNotifier, VolumeRepository,
    VolumeUsage,
};
use crate::domain::sizing::target_bytes;
use crate::domain::state::VolumeState;
use crate::error::Result;
use crate::telemetry::{self, skip_reason};

// Event reasons surfaced on the PVCs the controller acts on.
pub const REASON_RESIZE_TRIGGERED: &str = "VolumeResizeTriggered";
pub const REASON_RESIZE_SUCCEEDED: &str = "VolumeResizeSucceeded";
pub const REASON_RESIZE_FAILED: &str = "VolumeResizeFailed";
pub const REASON_AT_MAX_SIZE: &str = "VolumeAtMaxSize";
pub const REASON_CLASS_NOT_EXPANDABLE: &str = "StorageClassNotExpandable";

/// Shared context for the reconciliation loop
pub struct ReconcilerContext {
    /// Global configuration
    pub settings: Settings,

    /// Volume utilization source
    pub metrics: Arc<dyn MetricsProvider>,

    /// Cluster read/write access
    pub volumes: Arc<dyn VolumeRepository>,

    /// Scale notification sink
    pub notifier: Arc<dyn ScaleNotifier>,

    /// Flipped after the first fully successful iteration; read by `/ready`
    pub ready: Arc<AtomicBool>,
}

impl ReconcilerContext {
    /// Create a new reconciler context
    pub fn new(
        settings: Settings,
        metrics: Arc<dyn MetricsProvider>,
        volumes: Arc<dyn VolumeRepository>,
        notifier: Arc<dyn ScaleNotifier>,
        ready: Arc<AtomicBool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            settings,
            metrics,
            volumes,
            notifier,
            ready,
        })
    }
}

// =============================================================================
// Decisions
// =============================================================================

/// Why a triggered PVC will never be resized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Effective policy says `ignore`
    Ignored,
    /// Storage class does not allow volume expansion
    NotExpandable,
    /// Policy ceiling is below the current request
    MaxBelowRequest,
}

impl SkipReason {
    fn metric_label(&self) -> &'static str {
        match self {
            SkipReason::Ignored => skip_reason::IGNORED,
            SkipReason::NotExpandable => skip_reason::NOT_EXPANDABLE,
            SkipReason::MaxBelowRequest => skip_reason::MAX_BELOW_REQUEST,
        }
    }
}

/// Outcome of evaluating one PVC against its policy and durable state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Below threshold, counter already zero: nothing to do
    Hold,

    /// Below threshold with a non-zero counter: reset it
    ResetCounter { previous: u32 },

    /// Triggered, but this PVC can never be resized. `warn` asks for the
    /// not-expandable warning event, re-armed once per cooldown window via
    /// the stamped timestamp
    CandidateFree {
        reason: SkipReason,
        reset_from: u32,
        warn: bool,
    },

    /// Triggered and still accumulating consecutive observations
    Watch { counter: u32 },

    /// Threshold reached but the cooldown window is still open; the counter
    /// is clamped so one post-cooldown observation fires the resize
    Defer { counter: u32, previous: u32 },

    /// Computed target does not exceed the current size: at the ceiling
    AtCeiling,

    /// Fire a resize to the given size
    Resize { target_bytes: u64 },
}

impl Decision {
    /// Whether the observation that produced this decision was above the
    /// policy threshold.
    pub fn triggered(&self) -> bool {
        !matches!(self, Decision::Hold | Decision::ResetCounter { .. })
    }
}

/// Evaluate one measured PVC. Pure: no I/O, no clock reads.
pub fn evaluate(
    snapshot: &PvcSnapshot,
    usage: &VolumeUsage,
    policy: &ScalingPolicy,
    state: &VolumeState,
    now: DateTime<Utc>,
) -> Decision {
    // Either dimension running out makes the volume unusable, so the worse
    // one drives the trigger.
    let triggered = usage
        .fullest_pct()
        .map(|pct| pct >= policy.scale_above_percent as f64)
        .unwrap_or(false);

    if !triggered {
        return if state.intervals_above_threshold > 0 {
            Decision::ResetCounter {
                previous: state.intervals_above_threshold,
            }
        } else {
            Decision::Hold
        };
    }

    let reset_from = state.intervals_above_threshold;
    if policy.ignore {
        return Decision::CandidateFree {
            reason: SkipReason::Ignored,
            reset_from,
            warn: false,
        };
    }
    if !snapshot.expandable {
        // Remind the operator roughly once per cooldown window while the
        // PVC stays full behind a class that cannot expand it.
        return Decision::CandidateFree {
            reason: SkipReason::NotExpandable,
            reset_from,
            warn: !state.in_cooldown(now, policy.scale_cooldown_seconds),
        };
    }
    if policy.scale_up_max_size < snapshot.requested_bytes {
        return Decision::CandidateFree {
            reason: SkipReason::MaxBelowRequest,
            reset_from,
            warn: false,
        };
    }

    let counter = state.intervals_above_threshold.saturating_add(1);
    if counter < policy.scale_after_intervals {
        return Decision::Watch { counter };
    }

    if state.in_cooldown(now, policy.scale_cooldown_seconds) {
        return Decision::Defer {
            counter: policy.scale_after_intervals - 1,
            previous: state.intervals_above_threshold,
        };
    }

    let target = target_bytes(snapshot.requested_bytes, policy);
    if target <= snapshot.requested_bytes {
        return Decision::AtCeiling;
    }

    Decision::Resize {
        target_bytes: target,
    }
}

// =============================================================================
// Iteration
// =============================================================================

/// Counts from one completed iteration.
///
/// `evaluated`, `unmeasured`, and `unbound` partition the listed PVCs;
/// `above_threshold` and `below_threshold` partition `evaluated`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IterationSummary {
    /// Measured, Bound PVCs that were evaluated
    pub evaluated: u64,

    /// Evaluated PVCs above their threshold
    pub above_threshold: u64,

    /// Evaluated PVCs below their threshold
    pub below_threshold: u64,

    /// Bound PVCs with no metric observation
    pub unmeasured: u64,

    /// PVCs whose claim is not Bound (pending, lost)
    pub unbound: u64,

    /// Resizes acknowledged by the API server this iteration
    pub resized: u64,
}

/// Run one reconciliation pass.
///
/// Fails only when one of the two source reads (metrics fetch, PVC list)
/// fails; per-PVC write errors are contained and the pass continues.
#[instrument(skip(ctx, shutdown))]
pub async fn run_iteration(
    ctx: &ReconcilerContext,
    shutdown: &CancellationToken,
) -> Result<IterationSummary> {
    let now = Utc::now();

    let usage = ctx.metrics.fetch_usage().await?;
    let snapshots = ctx.volumes.list_volumes().await?;

    debug!(
        observations = usage.len(),
        pvcs = snapshots.len(),
        "Joined metrics with cluster state"
    );

    let mut summary = IterationSummary::default();

    for snapshot in &snapshots {
        // Finish the PVC being written, then stop between PVCs.
        if shutdown.is_cancelled() {
            info!("Shutdown requested, stopping iteration early");
            break;
        }

        // A claim without a bound volume has no filesystem the kubelet could
        // report on; it is not a candidate and not "unmeasured" either, even
        // when a stale observation for its name is still around.
        if !snapshot.is_bound() {
            debug!(pvc = %snapshot.id, phase = ?snapshot.phase, "Not bound, skipping");
            summary.unbound += 1;
            continue;
        }

        let Some(observation) = usage.get(&snapshot.id) else {
            debug!(pvc = %snapshot.id, "No metric observation, skipping");
            summary.unmeasured += 1;
            continue;
        };

        telemetry::RESIZE_EVALUATED_TOTAL.inc();
        summary.evaluated += 1;

        let policy = ScalingPolicy::resolve(&ctx.settings, snapshot);
        let state = VolumeState::from_snapshot(snapshot);
        let decision = evaluate(snapshot, observation, &policy, &state, now);

        if decision.triggered() {
            summary.above_threshold += 1;
        } else {
            summary.below_threshold += 1;
        }

        apply(ctx, snapshot, &policy, &state, &decision, now, &mut summary).await;
    }

    telemetry::NUM_VALID_PVCS.set(summary.evaluated as i64);
    telemetry::NUM_PVCS_ABOVE_THRESHOLD.set(summary.above_threshold as i64);
    telemetry::NUM_PVCS_BELOW_THRESHOLD.set(summary.below_threshold as i64);
    telemetry::NUM_UNMEASURED_PVCS.set(summary.unmeasured as i64);

    Ok(summary)
}

/// Carry out the side effects of a decision.
async fn apply(
    ctx: &ReconcilerContext,
    snapshot: &PvcSnapshot,
    policy: &ScalingPolicy,
    state: &VolumeState,
    decision: &Decision,
    now: DateTime<Utc>,
    summary: &mut IterationSummary,
) {
    match decision {
        Decision::Hold => {}

        Decision::ResetCounter { previous } => {
            debug!(pvc = %snapshot.id, from = previous, "Usage back below threshold, resetting counter");
            write_state(ctx, snapshot, state.with_counter(0)).await;
        }

        Decision::CandidateFree {
            reason,
            reset_from,
            warn,
        } => {
            telemetry::RESIZE_SKIPPED_TOTAL
                .with_label_values(&[reason.metric_label()])
                .inc();

            if *reason == SkipReason::MaxBelowRequest {
                warn!(
                    pvc = %snapshot.id,
                    requested_bytes = snapshot.requested_bytes,
                    "Configured max size is below the current request, not resizing"
                );
            }

            if *warn {
                if !ctx.settings.dry_run {
                    let class = snapshot.storage_class.as_deref().unwrap_or("<none>");
                    ctx.volumes
                        .emit_event(
                            &snapshot.id,
                            REASON_CLASS_NOT_EXPANDABLE,
                            &format!("Storage class {} does not allow volume expansion", class),
                            EventSeverity::Warning,
                        )
                        .await;
                }
                // Stamping the clock resets the counter and suppresses the
                // next warning for one cooldown window.
                write_state(ctx, snapshot, VolumeState::resized_at(now)).await;
            } else if *reset_from > 0 {
                // Cancel the in-flight count on a PVC that was a candidate
                // until now.
                write_state(ctx, snapshot, state.with_counter(0)).await;
            }
        }

        Decision::Watch { counter } => {
            debug!(pvc = %snapshot.id, counter = counter, "Above threshold, counting");
            write_state(ctx, snapshot, state.with_counter(*counter)).await;
        }

        Decision::Defer { counter, previous } => {
            debug!(pvc = %snapshot.id, "Threshold reached but cooling down, deferring resize");
            if counter != previous {
                write_state(ctx, snapshot, state.with_counter(*counter)).await;
            }
        }

        Decision::AtCeiling => {
            warn!(
                pvc = %snapshot.id,
                requested_bytes = snapshot.requested_bytes,
                "Volume is at its maximum size"
            );
            if !ctx.settings.dry_run {
                ctx.volumes
                    .emit_event(
                        &snapshot.id,
                        REASON_AT_MAX_SIZE,
                        &format!(
                            "Volume is full but already at its maximum size of {} bytes",
                            snapshot.requested_bytes
                        ),
                        EventSeverity::Warning,
                    )
                    .await;
            }
            // Stamping the resize time suppresses this warning for one
            // cooldown window.
            write_state(ctx, snapshot, VolumeState::resized_at(now)).await;
        }

        Decision::Resize { target_bytes } => {
            execute_resize(ctx, snapshot, policy, *target_bytes, now, summary).await;
        }
    }
}

/// Patch only the state annotations, honoring dry-run.
async fn write_state(ctx: &ReconcilerContext, snapshot: &PvcSnapshot, state: VolumeState) {
    if ctx.settings.dry_run {
        debug!(
            pvc = %snapshot.id,
            counter = state.intervals_above_threshold,
            "[DRY-RUN] Keeping durable state untouched"
        );
        return;
    }

    match ctx.volumes.patch_state(&snapshot.id, &state).await {
        Ok(_) => {}
        Err(e) => {
            warn!(pvc = %snapshot.id, error = %e, "Failed to update scaling state");
        }
    }
}

/// Fire one resize: patch size and state atomically, surface the outcome as
/// Events and a notification.
async fn execute_resize(
    ctx: &ReconcilerContext,
    snapshot: &PvcSnapshot,
    policy: &ScalingPolicy,
    target: u64,
    now: DateTime<Utc>,
    summary: &mut IterationSummary,
) {
    telemetry::RESIZE_ATTEMPTED_TOTAL.inc();

    if ctx.settings.dry_run {
        info!(
            pvc = %snapshot.id,
            current_bytes = snapshot.requested_bytes,
            target_bytes = target,
            "[DRY-RUN] Would resize PVC"
        );
        return;
    }

    ctx.volumes
        .emit_event(
            &snapshot.id,
            REASON_RESIZE_TRIGGERED,
            &format!(
                "Usage stayed above {}% for {} intervals, resizing from {} to {} bytes",
                policy.scale_above_percent,
                policy.scale_after_intervals,
                snapshot.requested_bytes,
                target
            ),
            EventSeverity::Normal,
        )
        .await;

    let result = ctx
        .volumes
        .patch_size(&snapshot.id, target, &VolumeState::resized_at(now))
        .await;

    let notification = ResizeEvent {
        id: snapshot.id.clone(),
        old_bytes: snapshot.requested_bytes,
        new_bytes: target,
        succeeded: false,
        at: now,
    };

    match result {
        Ok(crate::domain::ports::PatchOutcome::Applied) => {
            telemetry::RESIZE_SUCCESSFUL_TOTAL.inc();
            summary.resized += 1;
            info!(
                pvc = %snapshot.id,
                old_bytes = snapshot.requested_bytes,
                new_bytes = target,
                "Resized PVC"
            );
            ctx.volumes
                .emit_event(
                    &snapshot.id,
                    REASON_RESIZE_SUCCEEDED,
                    &format!(
                        "Resized from {} to {} bytes",
                        snapshot.requested_bytes, target
                    ),
                    EventSeverity::Normal,
                )
                .await;
            ctx.notifier
                .notify(&ResizeEvent {
                    succeeded: true,
                    ..notification
                })
                .await;
        }
        Ok(crate::domain::ports::PatchOutcome::Gone) => {
            debug!(pvc = %snapshot.id, "PVC deleted before resize could apply");
        }
        Ok(crate::domain::ports::PatchOutcome::Conflict) => {
            warn!(pvc = %snapshot.id, "Resize skipped after conflicting write");
        }
        Err(e) => {
            // The durable counter still holds, so the next triggering
            // observation retries once the failure clears.
            telemetry::RESIZE_FAILURE_TOTAL.inc();
            error!(pvc = %snapshot.id, error = %e, "Resize patch failed");
            ctx.volumes
                .emit_event(
                    &snapshot.id,
                    REASON_RESIZE_FAILED,
                    &format!(
                        "Failed to resize from {} to {} bytes: {}",
                        snapshot.requested_bytes, target, e
                    ),
                    EventSeverity::Warning,
                )
                .await;
            ctx.notifier.notify(&notification).await;
        }
    }
}

// =============================================================================
// Loop
// =============================================================================

/// Run the reconciliation loop until shutdown.
///
/// Iteration N+1 starts at `start(N) + interval`, not at `end(N) + interval`:
/// an iteration that overruns the interval is followed immediately and
/// counted, but iterations never overlap.
pub async fn run(ctx: Arc<ReconcilerContext>, shutdown: CancellationToken) {
    let interval = ctx.settings.interval();
    info!(
        interval_seconds = ctx.settings.interval_time,
        dry_run = ctx.settings.dry_run,
        "Starting reconciliation loop"
    );

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        let started = Instant::now();
        match run_iteration(&ctx, &shutdown).await {
            Ok(summary) => {
                ctx.ready.store(true, Ordering::Release);
                info!(
                    evaluated = summary.evaluated,
                    above_threshold = summary.above_threshold,
                    unmeasured = summary.unmeasured,
                    unbound = summary.unbound,
                    resized = summary.resized,
                    "Iteration complete"
                );
            }
            Err(e) => {
                telemetry::ITERATION_FAILED_TOTAL.inc();
                error!(error = %e, "Iteration abandoned, retrying next interval");
            }
        }

        let next_start = started + interval;
        let now = Instant::now();
        if now >= next_start {
            if !shutdown.is_cancelled() {
                telemetry::ITERATION_OVERRUN_TOTAL.inc();
                warn!(
                    elapsed_seconds = now.duration_since(started).as_secs(),
                    "Iteration overran the interval, starting the next immediately"
                );
            }
            continue;
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep_until(next_start) => {}
        }
    }

    info!("Reconciliation loop stopped");
}

// =============================================================================
// Tests
// =============================================================================
