//! Chunk planning: split `[0, length)` of one resource into ordered parts.
//!
//! Part ranges are inclusive (`start..=end`) to match the HTTP Range header.
//! Parts partition the resource with no gaps and no overlaps; the last part
//! carries the remainder when `length` is not a multiple of the chunk size.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const MIB: u64 = 1024 * 1024;
/// Smallest part size the planner accepts.
pub const MIN_CHUNK_SIZE: u64 = 2 * MIB;
/// Largest part size the planner accepts.
pub const MAX_CHUNK_SIZE: u64 = 64 * MIB;

/// Clamp a configured chunk size to [2 MiB, 64 MiB].
pub fn clamp_chunk_size(bytes: u64) -> u64 {
    bytes.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE)
}

/// One byte range of a remote resource, tracked independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    /// Merge order.
    pub index: usize,
    /// First byte (inclusive).
    pub start: u64,
    /// Last byte (inclusive).
    pub end: u64,
    /// Bytes already on disk for this part. Never exceeds `len()`.
    pub written: u64,
    /// Part file holding `written` bytes from `start`.
    pub path: PathBuf,
}

impl Part {
    /// Length of this part in bytes.
    pub fn len(&self) -> u64 {
        self.end + 1 - self.start
    }

    pub fn remaining(&self) -> u64 {
        self.len().saturating_sub(self.written)
    }

    pub fn is_complete(&self) -> bool {
        self.written >= self.len()
    }

    /// Absolute offset of the next byte to fetch.
    pub fn resume_offset(&self) -> u64 {
        self.start + self.written.min(self.len())
    }

    /// HTTP Range header value for the bytes still missing: `bytes=<resume>-<end>`.
    pub fn range_header_value(&self) -> String {
        format!("bytes={}-{}", self.resume_offset(), self.end)
    }

    /// Record bytes found on disk, capped to the part length.
    pub fn set_written(&mut self, written: u64) {
        self.written = written.min(self.len());
    }
}

/// Part file name inside a stream directory.
pub fn part_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("part.{}", index))
}

/// Builds the part plan for a resource of `length` bytes.
///
/// When `ranged` is false the whole resource is one part. Returns an empty
/// vec if `length` is 0. `chunk_size` is used as given; callers clamp it with
/// [`clamp_chunk_size`].
pub fn plan_parts(length: u64, chunk_size: u64, ranged: bool, dir: &Path) -> Vec<Part> {
    if length == 0 {
        return Vec::new();
    }
    let chunk = if ranged { chunk_size.max(1) } else { length };

    let mut out = Vec::with_capacity(length.div_ceil(chunk) as usize);
    let mut start = 0u64;
    let mut index = 0usize;
    while start < length {
        let end = (start.saturating_add(chunk) - 1).min(length - 1);
        out.push(Part {
            index,
            start,
            end,
            written: 0,
            path: part_path(dir, index),
        });
        start = end + 1;
        index += 1;
    }
    out
}

/// Sum of bytes already written across parts.
pub fn written_total(parts: &[Part]) -> u64 {
    parts.iter().map(|p| p.written.min(p.len())).sum()
}
