//! Retry loop: drive one part's attempts until success, give-up, or abort.

use std::sync::atomic::{AtomicBool, Ordering};

use super::error::SegmentError;
use super::policy::RetryPolicy;
use super::state::{AttemptState, PartAttempt, Sleeper};

/// Runs `f` until it succeeds, the policy stops, or `abort` is set.
///
/// `f` receives the 1-based attempt number. Each call must re-derive its
/// starting point (the fetcher re-measures the part file) so a retry never
/// re-requests bytes that already reached disk.
pub fn run_with_retry<F>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    abort: &AtomicBool,
    mut f: F,
) -> Result<(), SegmentError>
where
    F: FnMut(u32) -> Result<(), SegmentError>,
{
    let mut state = PartAttempt::new();
    loop {
        if abort.load(Ordering::Relaxed) {
            return Err(SegmentError::Aborted);
        }
        let attempt = state.begin();
        match f(attempt) {
            Ok(()) => {
                state.succeed();
                return Ok(());
            }
            Err(e) => match state.fail(policy, &e) {
                AttemptState::RetryWait(d) => {
                    tracing::debug!(attempt, delay_ms = d.as_millis() as u64, "retrying part: {}", e);
                    if !sleeper.sleep(d, abort) {
                        return Err(SegmentError::Aborted);
                    }
                    state.wake();
                }
                _ => return Err(e),
            },
        }
    }
}
