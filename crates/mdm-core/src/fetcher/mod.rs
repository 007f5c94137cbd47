//! Chunk fetcher pool: bounded workers pulling incomplete parts from a queue.
//!
//! Each worker performs ranged GETs via curl (blocking, one OS thread per
//! worker) and appends the body to the part's own file. The coordinator
//! records completions in the manifest.

mod pool;
mod segment;

pub use pool::{fetch_parts, FetchOptions, PartProgress};
pub use segment::{fetch_part, PartHandler};

use std::time::Duration;

/// Timeouts and stall detection for part transfers.
#[derive(Debug, Clone, Copy)]
pub struct CurlOptions {
    pub connect_timeout: Duration,
    /// Abort when throughput stays below `low_speed_limit` bytes/s ...
    pub low_speed_limit: u32,
    /// ... for this long.
    pub low_speed_time: Duration,
}

impl Default for CurlOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            low_speed_limit: 1024,
            low_speed_time: Duration::from_secs(60),
        }
    }
}
