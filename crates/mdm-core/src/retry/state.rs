//! Per-part attempt state: pending → in-flight → retry-wait → pending | complete.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use super::classify::classify;
use super::error::SegmentError;
use super::policy::{RetryDecision, RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Pending,
    InFlight,
    RetryWait(Duration),
    Complete,
    Failed,
}

/// Attempt bookkeeping for one part.
#[derive(Debug, Clone)]
pub struct PartAttempt {
    attempt: u32,
    state: AttemptState,
}

impl Default for PartAttempt {
    fn default() -> Self {
        Self::new()
    }
}

impl PartAttempt {
    pub fn new() -> Self {
        Self {
            attempt: 0,
            state: AttemptState::Pending,
        }
    }

    pub fn state(&self) -> AttemptState {
        self.state
    }

    /// Number of attempts started so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Pending → in-flight. Returns the 1-based attempt number.
    pub fn begin(&mut self) -> u32 {
        debug_assert_eq!(self.state, AttemptState::Pending);
        self.attempt += 1;
        self.state = AttemptState::InFlight;
        self.attempt
    }

    /// In-flight → complete.
    pub fn succeed(&mut self) {
        self.state = AttemptState::Complete;
    }

    /// In-flight → retry-wait, or failed when the policy gives up.
    pub fn fail(&mut self, policy: &RetryPolicy, err: &SegmentError) -> AttemptState {
        self.state = match policy.decide(self.attempt, classify(err)) {
            RetryDecision::RetryAfter(d) => AttemptState::RetryWait(d),
            RetryDecision::NoRetry => AttemptState::Failed,
        };
        self.state
    }

    /// Retry-wait → pending once the backoff has elapsed.
    pub fn wake(&mut self) {
        if matches!(self.state, AttemptState::RetryWait(_)) {
            self.state = AttemptState::Pending;
        }
    }
}

/// Waits out a backoff. Implementations must return early once `abort` is set.
pub trait Sleeper: Send + Sync {
    /// Returns false if the sleep was cut short by `abort`.
    fn sleep(&self, d: Duration, abort: &AtomicBool) -> bool;
}

/// Real sleeper: sleeps in short slices so an abort is noticed quickly.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

const SLICE: Duration = Duration::from_millis(100);

impl Sleeper for ThreadSleeper {
    fn sleep(&self, d: Duration, abort: &AtomicBool) -> bool {
        let deadline = Instant::now() + d;
        loop {
            if abort.load(Ordering::Relaxed) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(SLICE));
        }
    }
}
