//! Chunk transfer engine: probe → plan → reconcile → fetch → merge for one stream.
//!
//! Blocking; the orchestrator runs it inside `spawn_blocking`.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use crate::control::AbortToken;
use crate::error::EngineError;
use crate::fetcher::{fetch_parts, CurlOptions, FetchOptions, PartProgress};
use crate::manifest;
use crate::merge;
use crate::probe::{self, ProbeResult};
use crate::retry::{RetryPolicy, Sleeper, ThreadSleeper};

/// Default interval between progress reports.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

/// Per-stream transfer parameters, fixed for the life of one run.
#[derive(Clone)]
pub struct TransferOptions {
    /// Part size in bytes (already clamped).
    pub chunk_size: u64,
    /// Range fetchers for this stream.
    pub concurrency: usize,
    pub policy: RetryPolicy,
    pub curl: CurlOptions,
    pub headers: HashMap<String, String>,
    pub sleeper: Arc<dyn Sleeper>,
    /// Minimum time between two progress callbacks.
    pub progress_interval: Duration,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            chunk_size: 8 * crate::planner::MIB,
            concurrency: 4,
            policy: RetryPolicy::default(),
            curl: CurlOptions::default(),
            headers: HashMap::new(),
            sleeper: Arc::new(ThreadSleeper),
            progress_interval: PROGRESS_INTERVAL,
        }
    }
}

/// Result of one finished stream.
#[derive(Debug, Clone)]
pub struct StreamOutput {
    /// Merged file inside the stream directory.
    pub path: PathBuf,
    pub length: u64,
    /// True if earlier progress was reused.
    pub resumed: bool,
}

/// Probe `url` and fail with `ProbeFailed` unless a usable length comes back.
pub fn probe_stream(url: &str, headers: &HashMap<String, String>) -> Result<ProbeResult> {
    let result = probe::probe(url, headers)
        .map_err(|e| EngineError::ProbeFailed(format!("{:#}", e)))?;
    match result.content_length {
        Some(n) if n > 0 => Ok(result),
        _ => Err(EngineError::ProbeFailed(format!("no content length for {}", url)).into()),
    }
}

/// Download `url` into `dir` and merge it into `dir/stream.bin`.
///
/// `on_progress(downloaded, total)` is called right after reconciliation,
/// then at most once per `progress_interval` while bytes arrive, and once
/// more when all parts are done. On abort, part files and the manifest stay
/// on disk untouched and `EngineError::Aborted` is returned.
pub fn transfer_stream(
    url: &str,
    dir: &Path,
    opts: &TransferOptions,
    abort: &AbortToken,
    on_progress: &mut dyn FnMut(u64, u64),
) -> Result<StreamOutput> {
    if abort.is_aborted() {
        return Err(EngineError::Aborted.into());
    }
    let probe = probe_stream(url, &opts.headers)?;
    let length = probe.content_length.unwrap_or(0);
    tracing::debug!(
        length,
        ranged = probe.accept_ranges,
        etag = probe.etag.as_deref().unwrap_or("-"),
        "probed stream"
    );

    let reconciled = manifest::reconcile(dir, url, &probe, opts.chunk_size)
        .context("reconcile manifest")?;
    let mut manifest = reconciled.manifest;
    let already = manifest.written_total();
    if reconciled.resumed {
        tracing::info!(already, length, "resuming stream");
    } else {
        tracing::info!(length, parts = manifest.parts.len(), "starting stream");
    }
    on_progress(already, length);

    if !manifest.is_complete() {
        let progress = PartProgress::from_parts(&manifest.parts);
        let fetch_opts = FetchOptions {
            url: url.to_string(),
            headers: opts.headers.clone(),
            concurrency: opts.concurrency,
            policy: opts.policy,
            curl: opts.curl,
            sleeper: Arc::clone(&opts.sleeper),
        };

        let result = std::thread::scope(|s| {
            let (done_tx, done_rx) = mpsc::channel::<()>();
            let manifest = &mut manifest;
            let progress_ref = &progress;
            let fetch_opts = &fetch_opts;
            let handle = s.spawn(move || {
                let r = fetch_parts(manifest, dir, fetch_opts, progress_ref, abort);
                let _ = done_tx.send(());
                r
            });

            let mut last = already;
            loop {
                match done_rx.recv_timeout(opts.progress_interval) {
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        let now = progress.total();
                        if now != last {
                            on_progress(now, length);
                            last = now;
                        }
                    }
                    _ => break,
                }
            }
            handle
                .join()
                .unwrap_or_else(|_| Err(anyhow::anyhow!("fetcher coordinator panicked")))
        });
        result?;
        on_progress(manifest.written_total(), length);
    }

    if abort.is_aborted() {
        return Err(EngineError::Aborted.into());
    }
    let out = merge::merged_path(dir);
    let merged = merge::merge_parts(&manifest.parts, &out)?;
    tracing::debug!(bytes = merged, "stream merged");
    Ok(StreamOutput {
        path: out,
        length: merged,
        resumed: reconciled.resumed,
    })
}
