//! Structured observability hooks for reclaim run lifecycle events.
//!
//! This module provides:
//! - A run-scoped tracing span via `run_span`
//! - Emission functions for key lifecycle events: run start and finish, step
//!   start, finish and skip, halts and samples
//!
//! Events are emitted at `info!` level unless noted (filter with `RUST_LOG`).
//! For JSON output pass `--json-logs` to the CLI.

use tracing::{info, warn};

use crate::snapshot::DiskSnapshot;

/// Span that tags everything logged during a run with its run_id.
///
/// Attach it to the run's future with [`tracing::Instrument::instrument`];
/// an entered guard must not be held across `.await`.
///
/// # Example
///
/// ```ignore
/// pipeline.run_steps(steps).instrument(run_span(&run_id)).await
/// ```
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("reclaim.run", run_id = %run_id)
}

/// Emit event: cleanup run started.
pub fn emit_run_started(run_id: &str, steps: usize, dry_run: bool) {
    info!(event = "run.started", run_id = %run_id, steps = steps, dry_run = dry_run);
}

/// Emit event: a step is about to execute its commands.
pub fn emit_step_started(step: &str, tier: &str) {
    info!(event = "step.started", step = %step, tier = %tier);
}

/// Emit event: a step executed, successfully or not.
pub fn emit_step_finished(step: &str, succeeded: bool, bytes_freed: i64, duration_ms: u64) {
    info!(
        event = "step.finished",
        step = %step,
        succeeded = succeeded,
        bytes_freed = bytes_freed,
        duration_ms = duration_ms,
    );
}

/// Emit event: a step was not executed.
pub fn emit_step_skipped(step: &str, reason: &str) {
    info!(event = "step.skipped", step = %step, reason = %reason);
}

/// Emit event: used space grew across a step (warning level).
pub fn emit_usage_grew(step: &str, grew_by: u64) {
    warn!(event = "step.usage_grew", step = %step, grew_by = grew_by);
}

/// Emit event: the pipeline stopped before its last step (warning level).
pub fn emit_run_halted(run_id: &str, step: &str, reason: &dyn std::fmt::Display) {
    warn!(event = "run.halted", run_id = %run_id, step = %step, reason = %reason);
}

/// Emit event: cleanup run finished.
pub fn emit_run_finished(run_id: &str, duration_ms: u64, total_freed: i64, success: bool) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        total_freed = total_freed,
        success = success,
    );
}

/// Emit event: a disk snapshot was taken.
pub fn emit_sample_taken(snapshot: &DiskSnapshot) {
    info!(
        event = "sample.taken",
        used_bytes = snapshot.used_bytes,
        free_bytes = snapshot.free_bytes,
        mounts = snapshot.per_mount.len(),
        unavailable = snapshot.unavailable.len(),
        duration_ms = snapshot.sample_duration_ms,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_create() {
        let span = run_span("test-run-id");
        let _entered = span.enter();
        emit_step_skipped("apt", "confirmation declined");
    }
}
