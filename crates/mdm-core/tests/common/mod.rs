#![allow(dead_code)]

pub mod range_server;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use mdm_core::retry::{RetryPolicy, Sleeper};

/// Deterministic test payload.
pub fn body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i.wrapping_mul(31) ^ (i >> 9)) as u8).collect()
}

/// Policy with no waiting and no jitter.
pub fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(800),
        max_delay: Duration::from_secs(15),
        jitter: 0.0,
    }
}

/// Records requested backoffs instead of sleeping.
#[derive(Default)]
pub struct RecordingSleeper {
    pub slept: Mutex<Vec<Duration>>,
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, d: Duration, abort: &AtomicBool) -> bool {
        self.slept.lock().unwrap().push(d);
        !abort.load(Ordering::Relaxed)
    }
}
