//! Structured observability hooks for install lifecycle events.
//!
//! Every helper emits at `info!` (or `warn!` for failures) with a stable
//! `event` field so JSON log consumers can filter on it.

use tracing::{info, warn};

/// Install-scoped span tagged with the run id. Attach it with
/// [`tracing::Instrument`] so it follows the install across await points.
pub fn install_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("snoknas.install", run_id = %run_id)
}

pub fn emit_install_started(run_id: &str, phases: usize, steps: usize) {
    info!(event = "install.started", run_id = %run_id, phases = phases, steps = steps);
}

pub fn emit_phase_started(phase: &str, steps: usize) {
    info!(event = "phase.started", phase = %phase, steps = steps);
}

/// Emit event: a step reached a terminal state.
pub fn emit_step_finished(
    description: &str,
    succeeded: bool,
    attempts: u8,
    repair: Option<&str>,
) {
    if succeeded {
        info!(
            event = "step.finished",
            step = %description,
            succeeded = succeeded,
            attempts = attempts,
            repair = repair.unwrap_or("-"),
        );
    } else {
        warn!(
            event = "step.finished",
            step = %description,
            succeeded = succeeded,
            attempts = attempts,
            repair = repair.unwrap_or("-"),
        );
    }
}

/// Emit event: a repair strategy ran against a failed step.
pub fn emit_repair_applied(strategy: &str, step: &str, succeeded: bool) {
    info!(event = "repair.applied", strategy = %strategy, step = %step, succeeded = succeeded);
}

/// Emit event: a repair strategy could not complete (warning level).
pub fn emit_repair_error(strategy: &str, error: &dyn std::fmt::Display) {
    warn!(event = "repair.error", strategy = %strategy, error = %error);
}

/// Emit event: a diagnostic check settled on its final status.
pub fn emit_check_evaluated(name: &str, healthy: bool, remedied: bool) {
    info!(event = "check.evaluated", check = %name, healthy = healthy, remedied = remedied);
}

pub fn emit_install_finished(run_id: &str, duration_ms: u64, failed_steps: usize, unhealthy: usize) {
    info!(
        event = "install.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        failed_steps = failed_steps,
        unhealthy_checks = unhealthy,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_span_create() {
        let span = install_span("test-run-id");
        let _guard = span.enter();
        emit_step_finished("Install X", false, 2, Some("pkg-lock-clear"));
    }
}
