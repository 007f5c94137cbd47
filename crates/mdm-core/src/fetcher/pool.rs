//! Bounded worker pool over the queue of incomplete parts.

use anyhow::Result;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use crate::control::AbortToken;
use crate::error::EngineError;
use crate::manifest::Manifest;
use crate::planner::Part;
use crate::retry::{run_with_retry, RetryPolicy, SegmentError, Sleeper};

use super::segment::fetch_part;
use super::CurlOptions;

/// Live bytes-on-disk per part, shared between workers and the progress sampler.
#[derive(Debug, Clone)]
pub struct PartProgress(Arc<Vec<AtomicU64>>);

impl PartProgress {
    pub fn new(parts: usize) -> Self {
        Self(Arc::new((0..parts).map(|_| AtomicU64::new(0)).collect()))
    }

    /// Seeded from recorded progress.
    pub fn from_parts(parts: &[Part]) -> Self {
        let p = Self::new(parts.len());
        for part in parts {
            p.set(part.index, part.written);
        }
        p
    }

    pub fn set(&self, index: usize, bytes: u64) {
        if let Some(a) = self.0.get(index) {
            a.store(bytes, Ordering::Relaxed);
        }
    }

    pub fn get(&self, index: usize) -> u64 {
        self.0.get(index).map(|a| a.load(Ordering::Relaxed)).unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.0.iter().map(|a| a.load(Ordering::Relaxed)).sum()
    }
}

/// Consecutive manifest rewrite failures after which the stream gives up.
const MAX_SAVE_FAILURES: u32 = 2;

/// Everything a worker needs besides the part itself.
#[derive(Clone)]
pub struct FetchOptions {
    pub url: String,
    pub headers: HashMap<String, String>,
    /// Configured per-stream concurrency; the pool never exceeds the part count either.
    pub concurrency: usize,
    pub policy: RetryPolicy,
    pub curl: CurlOptions,
    pub sleeper: Arc<dyn Sleeper>,
}

/// Fetch every incomplete part of `manifest` with at most
/// `min(concurrency, incomplete parts)` workers.
///
/// Each completed part is recorded and the manifest is rewritten atomically
/// in `dir`; two rewrite failures in a row fail the stream. The first failure
/// stops the queue; parts already in flight finish or fail on their own. On
/// return (success or not) the manifest reflects the bytes on disk.
pub fn fetch_parts(
    manifest: &mut Manifest,
    dir: &Path,
    opts: &FetchOptions,
    progress: &PartProgress,
    abort: &AbortToken,
) -> Result<()> {
    let incomplete: VecDeque<Part> = manifest
        .parts
        .iter()
        .filter(|p| !p.is_complete())
        .cloned()
        .collect();
    let count = incomplete.len();
    if count == 0 {
        return Ok(());
    }

    let work = Arc::new(Mutex::new(incomplete));
    let stop = Arc::new(AtomicBool::new(false));
    let (tx, rx) = mpsc::channel::<(usize, Result<(), SegmentError>)>();
    let num_workers = opts.concurrency.max(1).min(count);
    tracing::debug!(parts = count, workers = num_workers, "starting fetcher pool");

    let mut handles = Vec::with_capacity(num_workers);
    for _ in 0..num_workers {
        let work = Arc::clone(&work);
        let tx = tx.clone();
        let stop = Arc::clone(&stop);
        let opts = opts.clone();
        let progress = progress.clone();
        let abort = abort.clone();
        let ranged = manifest.ranged;
        handles.push(std::thread::spawn(move || loop {
            if stop.load(Ordering::Relaxed) || abort.is_aborted() {
                break;
            }
            let part = match work.lock().unwrap_or_else(|e| e.into_inner()).pop_front() {
                Some(p) => p,
                None => break,
            };
            let res = run_with_retry(&opts.policy, opts.sleeper.as_ref(), abort.flag(), |attempt| {
                if attempt > 1 {
                    tracing::debug!(part = part.index, attempt, "part attempt");
                }
                fetch_part(&opts.url, &opts.headers, &part, ranged, opts.curl, &progress, &abort)
            });
            if tx.send((part.index, res)).is_err() {
                break;
            }
        }));
    }
    drop(tx);

    let mut first_error: Option<anyhow::Error> = None;
    let mut save_failures = 0u32;
    let mut to_receive = count;
    while to_receive > 0 {
        let (index, res) = match rx.recv() {
            Ok(pair) => pair,
            Err(_) => break,
        };
        to_receive -= 1;
        match res {
            Ok(()) => {
                if let Some(part) = manifest.parts.get_mut(index) {
                    let len = part.len();
                    part.set_written(len);
                }
                match manifest.save(dir) {
                    Ok(()) => save_failures = 0,
                    Err(e) => {
                        save_failures += 1;
                        tracing::warn!(part = index, "manifest rewrite failed: {:#}", e);
                        if save_failures >= MAX_SAVE_FAILURES && first_error.is_none() {
                            first_error = Some(e.context(format!(
                                "manifest rewrite failed {} times in a row",
                                save_failures
                            )));
                        }
                    }
                }
                tracing::debug!(part = index, "part complete");
            }
            Err(SegmentError::Aborted) => {
                if first_error.is_none() {
                    first_error = Some(anyhow::Error::new(EngineError::Aborted));
                }
            }
            Err(e) => {
                tracing::warn!(part = index, "part failed: {}", e);
                if first_error.is_none() {
                    first_error = Some(anyhow::Error::new(EngineError::TransferFailed {
                        part: index,
                        source: e,
                    }));
                }
            }
        }
        if first_error.is_some() && !stop.swap(true, Ordering::Relaxed) {
            let drained = {
                let mut q = work.lock().unwrap_or_else(|e| e.into_inner());
                let n = q.len();
                q.clear();
                n
            };
            to_receive = to_receive.saturating_sub(drained);
        }
        if abort.is_aborted() && first_error.is_none() {
            first_error = Some(anyhow::Error::new(EngineError::Aborted));
        }
    }

    for h in handles {
        if h.join().is_err() && first_error.is_none() {
            first_error = Some(anyhow::anyhow!("fetcher worker panicked"));
        }
    }

    // Workers are gone; record partial progress so a later resume starts from it.
    for part in &mut manifest.parts {
        if !part.is_complete() {
            part.set_written(progress.get(part.index));
        }
    }
    if let Err(e) = manifest.save(dir) {
        tracing::warn!("manifest rewrite failed: {:#}", e);
    }

    match first_error {
        Some(e) => Err(e),
        None if abort.is_aborted() => Err(anyhow::Error::new(EngineError::Aborted)),
        None => Ok(()),
    }
}
