//! Part transfer error type for retry classification.

use std::fmt;

/// Error returned by one attempt at a part (curl failure, HTTP error, bad
/// range response, short body, storage failure, or abort).
#[derive(Debug)]
pub enum SegmentError {
    /// Curl reported an error (timeout, connection, etc.).
    Curl(curl::Error),
    /// HTTP response had a non-2xx status.
    Http(u32),
    /// A ranged request was answered with something other than 206 and a
    /// matching Content-Range. Writing it would corrupt the part.
    InvalidRangeResponse {
        status: Option<u32>,
        expected: (u64, u64),
    },
    /// Transfer ended with fewer bytes than the part still needed.
    PartialTransfer { expected: u64, received: u64 },
    /// Part file I/O failed (disk full, permission denied). Not retried.
    Storage(std::io::Error),
    /// The task's abort token was set.
    Aborted,
}

impl fmt::Display for SegmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentError::Curl(e) => write!(f, "{}", e),
            SegmentError::Http(code) => write!(f, "HTTP {}", code),
            SegmentError::InvalidRangeResponse { status, expected } => match status {
                Some(code) => write!(
                    f,
                    "invalid range response: HTTP {} for bytes {}-{}",
                    code, expected.0, expected.1
                ),
                None => write!(
                    f,
                    "invalid range response for bytes {}-{}",
                    expected.0, expected.1
                ),
            },
            SegmentError::PartialTransfer { expected, received } => {
                write!(f, "partial transfer: expected {} bytes, got {}", expected, received)
            }
            SegmentError::Storage(e) => write!(f, "storage: {}", e),
            SegmentError::Aborted => write!(f, "aborted"),
        }
    }
}

impl std::error::Error for SegmentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SegmentError::Curl(e) => Some(e),
            SegmentError::Storage(e) => Some(e),
            _ => None,
        }
    }
}
