use async_trait::async_trait;
use serde::Serialize;
use std::{
    future::Future,
    time::{Duration, Instant},
};
use tracing::{debug, info, warn};

use crate::driver::{SessionDriver, SessionHandle};
use crate::remote;

/// Time source for every bounded wait in the pipeline.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Fixed-interval poll bounded by an overall wall-clock budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollPolicy {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// At most `checks` evaluations spaced `interval` apart.
    pub fn checks(checks: u32, interval: Duration) -> Self {
        Self {
            interval,
            timeout: interval * checks.max(1),
        }
    }
}

/// Runs `check` until it yields a value or the budget runs out.
///
/// The first check happens immediately; every later one is preceded by a full
/// `interval` sleep. Returns the value and the number of checks performed.
pub async fn poll_until<T, F, Fut>(
    clock: &dyn Clock,
    policy: PollPolicy,
    mut check: F,
) -> (Option<T>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let started = clock.now();
    let mut checks = 0u32;
    loop {
        checks += 1;
        if let Some(value) = check().await {
            return (Some(value), checks);
        }
        let elapsed = clock.now().saturating_duration_since(started);
        if elapsed + policy.interval >= policy.timeout {
            return (None, checks);
        }
        clock.sleep(policy.interval).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollOutcome {
    Pending,
    Done,
    Failed,
    TimedOut,
}

/// Blocks until the remote generation job reports a terminal state.
///
/// Script failures while polling are logged and treated as `Pending`: once
/// generation has been paid for, a flaky read is not a reason to give up.
pub async fn poll_generation(
    driver: &dyn SessionDriver,
    handle: &SessionHandle,
    script: &str,
    policy: PollPolicy,
    clock: &dyn Clock,
) -> PollOutcome {
    let started = clock.now();
    let (outcome, checks) = poll_until(clock, policy, move || async move {
        let status = match driver.evaluate(handle, script).await {
            Ok(raw) => remote::parse_generation_status(&raw),
            Err(err) => {
                warn!(target = "stager.poll", error = %err, "generation_status_read_failed");
                PollOutcome::Pending
            }
        };
        match status {
            PollOutcome::Pending | PollOutcome::TimedOut => {
                debug!(
                    target = "stager.poll",
                    elapsed_secs = clock.now().saturating_duration_since(started).as_secs(),
                    "generation_pending"
                );
                None
            }
            terminal => Some(terminal),
        }
    })
    .await;
    crate::metrics::poll_checks("generation", checks);
    let outcome = outcome.unwrap_or(PollOutcome::TimedOut);
    let elapsed_secs = clock.now().saturating_duration_since(started).as_secs();
    match outcome {
        PollOutcome::Done => {
            info!(target = "stager.poll", checks, elapsed_secs, "generation_done")
        }
        PollOutcome::Failed => {
            warn!(target = "stager.poll", checks, elapsed_secs, "generation_failed_marker")
        }
        _ => warn!(
            target = "stager.poll",
            checks,
            elapsed_secs,
            budget_secs = policy.timeout.as_secs(),
            "generation_timed_out"
        ),
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::tag;
    use crate::testing::{ManualClock, ScriptedDriver};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn checks_policy_caps_evaluations() {
        let clock = ManualClock::new();
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let (value, checks) = poll_until(
            &clock,
            PollPolicy::checks(10, Duration::from_secs(1)),
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                None::<()>
            },
        )
        .await;
        assert!(value.is_none());
        assert_eq!(checks, 10);
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(1); 9]);
    }

    #[tokio::test]
    async fn returns_first_value_without_sleeping() {
        let clock = ManualClock::new();
        let (value, checks) = poll_until(
            &clock,
            PollPolicy::checks(5, Duration::from_secs(1)),
            || async { Some(7) },
        )
        .await;
        assert_eq!(value, Some(7));
        assert_eq!(checks, 1);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn generation_done_after_pending() {
        let clock = ManualClock::new();
        let driver = ScriptedDriver::happy_path()
            .respond(tag::GENERATION_STATUS, ["pending", "pending", "done"]);
        let handle = SessionHandle::new("1");
        let script = remote::RemoteProfile::default().generation_status();
        let outcome = poll_generation(
            &driver,
            &handle,
            &script,
            PollPolicy::new(Duration::from_secs(5), Duration::from_secs(600)),
            &clock,
        )
        .await;
        assert_eq!(outcome, PollOutcome::Done);
        assert_eq!(clock.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn generation_failure_marker_is_distinct_from_timeout() {
        let clock = ManualClock::new();
        let script = remote::RemoteProfile::default().generation_status();
        let handle = SessionHandle::new("1");
        let policy = PollPolicy::new(Duration::from_secs(5), Duration::from_secs(60));

        let failing = ScriptedDriver::happy_path()
            .respond(tag::GENERATION_STATUS, ["pending", "failed"]);
        let outcome = poll_generation(&failing, &handle, &script, policy, &clock).await;
        assert_eq!(outcome, PollOutcome::Failed);

        let stuck = ScriptedDriver::happy_path().respond(tag::GENERATION_STATUS, ["pending"]);
        let clock = ManualClock::new();
        let outcome = poll_generation(&stuck, &handle, &script, policy, &clock).await;
        assert_eq!(outcome, PollOutcome::TimedOut);
        assert!(clock.elapsed() < Duration::from_secs(60));
        assert_eq!(stuck.count(tag::GENERATION_STATUS), 12);
    }

    #[tokio::test]
    async fn script_errors_keep_polling() {
        let clock = ManualClock::new();
        let driver = ScriptedDriver::happy_path()
            .fail(tag::GENERATION_STATUS, "tab crashed")
            .then_respond(tag::GENERATION_STATUS, ["done"]);
        let handle = SessionHandle::new("1");
        let script = remote::RemoteProfile::default().generation_status();
        let outcome = poll_generation(
            &driver,
            &handle,
            &script,
            PollPolicy::new(Duration::from_secs(5), Duration::from_secs(60)),
            &clock,
        )
        .await;
        assert_eq!(outcome, PollOutcome::Done);
    }
}
