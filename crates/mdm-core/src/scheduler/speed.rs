//! Per-task transfer speed, sampled on the scheduler tick.

use std::time::Instant;

/// Smoothing factor for the exponential moving average.
const ALPHA: f64 = 0.5;

#[derive(Debug, Clone)]
pub(crate) struct SpeedMeter {
    last_bytes: u64,
    last_at: Instant,
    ema: f64,
}

impl SpeedMeter {
    pub(crate) fn new(bytes: u64, now: Instant) -> Self {
        Self {
            last_bytes: bytes,
            last_at: now,
            ema: 0.0,
        }
    }

    /// Bytes per second since the previous sample, smoothed.
    pub(crate) fn sample(&mut self, bytes: u64, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_at).as_secs_f64();
        if elapsed <= 0.0 {
            return self.ema;
        }
        let delta = bytes.saturating_sub(self.last_bytes) as f64;
        let instant = delta / elapsed;
        self.ema = ALPHA * instant + (1.0 - ALPHA) * self.ema;
        self.last_bytes = bytes;
        self.last_at = now;
        self.ema
    }
}
