use tracing::trace;

// Trace-based counters; no exporter is wired in for a one-shot CLI run.

pub fn step_elapsed(step: &'static str, elapsed_ms: u128) {
    trace!(
        target = "stager.metrics",
        step = step,
        elapsed_ms = elapsed_ms as u64,
        "step_elapsed"
    );
}

pub fn run_finished(outcome: &'static str, elapsed_ms: u128) {
    trace!(
        target = "stager.metrics",
        outcome = outcome,
        elapsed_ms = elapsed_ms as u64,
        "run_finished"
    );
}

pub fn poll_checks(poller: &'static str, checks: u32) {
    trace!(
        target = "stager.metrics",
        poller = poller,
        checks = checks,
        "poll_checks"
    );
}
