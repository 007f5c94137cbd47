//! Manifest store: durable per-stream transfer state enabling resume.
//!
//! One `manifest.json` per stream directory records the resource identity
//! (version token, Last-Modified, length), the chunk size, and every part
//! with its completed byte count. It is rewritten atomically after each
//! completed part and is only trusted while the resource is unchanged.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::EngineError;
use crate::planner::{self, Part};
use crate::probe::ProbeResult;
use crate::storage;

pub const MANIFEST_FILE: &str = "manifest.json";

pub fn manifest_path(dir: &Path) -> PathBuf {
    dir.join(MANIFEST_FILE)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub url: String,
    /// Origin version token (ETag). None means the origin gave none.
    pub version_token: Option<String>,
    pub last_modified: Option<String>,
    pub length: u64,
    pub chunk_size: u64,
    /// False when the origin ignores Range; the plan is then one part.
    pub ranged: bool,
    pub parts: Vec<Part>,
}

impl Manifest {
    /// Fresh manifest for a probe result and a plan built from it.
    pub fn new(url: &str, probe: &ProbeResult, chunk_size: u64, parts: Vec<Part>) -> Self {
        Self {
            url: url.to_string(),
            version_token: probe.etag.clone(),
            last_modified: probe.last_modified.clone(),
            length: probe.content_length.unwrap_or(0),
            chunk_size,
            ranged: probe.accept_ranges,
            parts,
        }
    }

    /// Read `dir/manifest.json`. A missing or unreadable manifest is `None`.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = manifest_path(dir);
        let data = match fs::read(&path) {
            Ok(d) => d,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()))
            }
        };
        match serde_json::from_slice::<Manifest>(&data) {
            Ok(mut m) => {
                // Part paths follow the directory, not whatever was recorded.
                for p in &mut m.parts {
                    p.path = planner::part_path(dir, p.index);
                }
                Ok(Some(m))
            }
            Err(e) => {
                tracing::warn!("ignoring corrupt manifest {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    /// Atomically replace `dir/manifest.json`.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(self).context("serialize manifest")?;
        storage::write_atomic(&manifest_path(dir), &data)
    }

    /// Check this manifest against a fresh probe and the plan derived from it.
    ///
    /// Valid only if version token and length match, Last-Modified matches
    /// when both sides carry one, and the part layout is the same.
    pub fn validate(&self, probe: &ProbeResult, chunk_size: u64, plan: &[Part]) -> Result<(), EngineError> {
        let mut reasons = Vec::new();
        if self.version_token != probe.etag {
            reasons.push("version token");
        }
        if Some(self.length) != probe.content_length {
            reasons.push("length");
        }
        if let (Some(a), Some(b)) = (&self.last_modified, &probe.last_modified) {
            if a != b {
                reasons.push("last-modified");
            }
        }
        if self.chunk_size != chunk_size || self.ranged != probe.accept_ranges {
            reasons.push("chunk layout");
        } else if !same_layout(&self.parts, plan) {
            reasons.push("part boundaries");
        }

        if reasons.is_empty() {
            Ok(())
        } else {
            Err(EngineError::ManifestInvalid(format!(
                "{} changed",
                reasons.join(", ")
            )))
        }
    }

    pub fn written_total(&self) -> u64 {
        planner::written_total(&self.parts)
    }

    pub fn is_complete(&self) -> bool {
        self.parts.iter().all(Part::is_complete)
    }
}

fn same_layout(a: &[Part], b: &[Part]) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b)
            .all(|(x, y)| x.index == y.index && x.start == y.start && x.end == y.end)
}

/// Usable bytes on disk for `part`.
///
/// A file longer than the part's range is garbage and counts as 0. A
/// non-ranged part cannot continue mid-body, so anything short of complete
/// also counts as 0.
pub fn measure_part(part: &Part, ranged: bool) -> io::Result<u64> {
    let on_disk = storage::measure(&part.path)?;
    if on_disk > part.len() {
        return Ok(0);
    }
    if !ranged && on_disk < part.len() {
        return Ok(0);
    }
    Ok(on_disk)
}

/// Delete the manifest and every `part.*` file in `dir`.
pub fn discard(dir: &Path) -> Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e).with_context(|| format!("failed to list {}", dir.display())),
    };
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("part.") || name.starts_with(MANIFEST_FILE) {
            fs::remove_file(entry.path())
                .with_context(|| format!("failed to remove {}", entry.path().display()))?;
        }
    }
    Ok(())
}

/// Outcome of reconciling a stored manifest with a fresh probe.
#[derive(Debug)]
pub struct Reconciled {
    pub manifest: Manifest,
    /// True if prior progress was reused.
    pub resumed: bool,
}

/// Load the stored manifest for `dir`, keep it if it still describes the
/// resource, otherwise discard it with its part files and start from the
/// fresh plan. Recorded progress is then corrected from the files on disk,
/// and the result is saved before any byte is fetched.
pub fn reconcile(dir: &Path, url: &str, probe: &ProbeResult, chunk_size: u64) -> Result<Reconciled> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let length = probe.content_length.unwrap_or(0);
    let plan = planner::plan_parts(length, chunk_size, probe.accept_ranges, dir);

    let (mut manifest, resumed) = match Manifest::load(dir)? {
        Some(prior) => match prior.validate(probe, chunk_size, &plan) {
            Ok(()) => (prior, true),
            Err(e) => {
                tracing::warn!(dir = %dir.display(), "{}; discarding stored progress", e);
                discard(dir)?;
                (Manifest::new(url, probe, chunk_size, plan), false)
            }
        },
        None => {
            // Part files without a manifest cannot be tied to a resource version.
            discard(dir)?;
            (Manifest::new(url, probe, chunk_size, plan), false)
        }
    };

    let ranged = manifest.ranged;
    for part in &mut manifest.parts {
        let usable = measure_part(part, ranged)
            .with_context(|| format!("failed to measure {}", part.path.display()))?;
        part.set_written(usable);
    }
    manifest.url = url.to_string();
    manifest.save(dir)?;
    Ok(Reconciled { manifest, resumed })
}
