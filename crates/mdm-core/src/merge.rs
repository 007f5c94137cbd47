//! Merger: concatenate completed parts in index order into one file.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::EngineError;
use crate::planner::Part;
use crate::storage::OutputBuilder;

/// Merged stream file name inside a stream directory.
pub const MERGED_FILE: &str = "stream.bin";

pub fn merged_path(dir: &Path) -> PathBuf {
    dir.join(MERGED_FILE)
}

/// Copy every part, strictly in index order, into `out`.
///
/// Every part must be complete and its file exactly `len()` bytes long;
/// anything else is a `MergeFailed`. Returns the number of bytes written.
pub fn merge_parts(parts: &[Part], out: &Path) -> Result<u64> {
    let mut ordered: Vec<&Part> = parts.iter().collect();
    ordered.sort_by_key(|p| p.index);
    let total: u64 = ordered.iter().map(|p| p.len()).sum();

    let mut builder = OutputBuilder::create(out)
        .map_err(|e| EngineError::MergeFailed(format!("{:#}", e)))?;
    builder
        .preallocate(total)
        .map_err(|e| EngineError::MergeFailed(format!("{:#}", e)))?;
    let mut writer = BufWriter::new(
        builder
            .build()
            .map_err(|e| EngineError::MergeFailed(format!("{:#}", e)))?,
    );

    let mut written = 0u64;
    for part in ordered {
        let copied = copy_part(part, &mut writer)
            .with_context(|| format!("merging part {}", part.index))
            .map_err(|e| EngineError::MergeFailed(format!("{:#}", e)))?;
        written += copied;
    }
    let file = writer
        .into_inner()
        .map_err(|e| EngineError::MergeFailed(e.to_string()))?;
    file.set_len(written)
        .and_then(|_| file.sync_all())
        .map_err(|e| EngineError::MergeFailed(e.to_string()))?;
    Ok(written)
}

fn copy_part(part: &Part, writer: &mut impl Write) -> Result<u64> {
    let mut f = File::open(&part.path)
        .with_context(|| format!("failed to open {}", part.path.display()))?;
    let on_disk = f.metadata()?.len();
    if on_disk != part.len() {
        anyhow::bail!(
            "part {} has {} bytes, expected {}",
            part.index,
            on_disk,
            part.len()
        );
    }
    let n = io::copy(&mut f, writer)?;
    Ok(n)
}
