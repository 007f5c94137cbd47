//! Retry and backoff for part transfers.
//!
//! Error classification (timeouts, throttling, connection failures), the
//! exponential backoff policy with jitter, and the per-part attempt state
//! machine the fetcher pool drives.

mod classify;
mod error;
mod policy;
mod run;
mod state;

pub use classify::{classify, classify_curl_error, classify_http_status};
pub use error::SegmentError;
pub use policy::{ErrorKind, RetryDecision, RetryPolicy};
pub use run::run_with_retry;
pub use state::{AttemptState, PartAttempt, Sleeper, ThreadSleeper};
