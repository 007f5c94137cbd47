//! Job orchestrator: one per running task.
//!
//! Transfers each present stream (video, then audio) into the task's
//! temporary directory, reports combined progress, hands the merged streams
//! to the muxer, and only then removes the temporary directory. Everything
//! it tells the scheduler goes through [`JobContext`].

use anyhow::{Context, Result};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

use crate::config::Settings;
use crate::control::AbortToken;
use crate::error::EngineError;
use crate::mux::{FfmpegMuxer, Muxer};
use crate::naming;
use crate::retry::RetryPolicy;
use crate::storage;
use crate::task::{JobMessage, Task, TaskId};
use crate::transfer::{self, TransferOptions};

/// What travels from orchestrators to the scheduler, tagged with the dispatch
/// generation so signals from a detached run can be told apart.
#[derive(Debug, Clone, PartialEq)]
pub struct JobEnvelope {
    pub id: TaskId,
    pub generation: u64,
    pub signal: JobSignal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobSignal {
    Message(JobMessage),
    /// The orchestrator future returned.
    Exited,
}

/// Handed to each orchestrator run.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Snapshot of the task at dispatch time.
    pub task: Task,
    pub abort: AbortToken,
    generation: u64,
    tx: UnboundedSender<JobEnvelope>,
}

impl JobContext {
    pub fn new(task: Task, abort: AbortToken, generation: u64, tx: UnboundedSender<JobEnvelope>) -> Self {
        Self {
            task,
            abort,
            generation,
            tx,
        }
    }

    pub fn id(&self) -> TaskId {
        self.task.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Send a message to the scheduler. False once the scheduler is gone.
    pub fn send(&self, message: JobMessage) -> bool {
        self.signal(JobSignal::Message(message))
    }

    pub fn progress(&self, total_bytes: u64, downloaded_bytes: u64) -> bool {
        self.send(JobMessage::Progress {
            total_bytes,
            downloaded_bytes,
        })
    }

    pub(crate) fn signal(&self, signal: JobSignal) -> bool {
        self.tx
            .send(JobEnvelope {
                id: self.task.id,
                generation: self.generation,
                signal,
            })
            .is_ok()
    }
}

pub type JobFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Starts one orchestrator run. The scheduler spawns the returned future and
/// treats its completion as the end of the run.
pub trait JobRunner: Send + Sync + 'static {
    fn run(&self, ctx: JobContext) -> JobFuture;
}

/// Production runner: real transfers plus an external muxer.
#[derive(Clone)]
pub struct MediaJobRunner {
    settings: Settings,
    muxer: Option<Arc<dyn Muxer>>,
    base: TransferOptions,
}

impl MediaJobRunner {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            muxer: None,
            base: TransferOptions::default(),
        }
    }

    /// Use `muxer` instead of ffmpeg from the configuration.
    pub fn with_muxer(mut self, muxer: Arc<dyn Muxer>) -> Self {
        self.muxer = Some(muxer);
        self
    }

    /// Base transfer options (timeouts, sleeper, headers). Chunk size,
    /// concurrency and retry policy are filled in per run.
    pub fn with_transfer_options(mut self, base: TransferOptions) -> Self {
        self.base = base;
        self
    }
}

impl JobRunner for MediaJobRunner {
    fn run(&self, ctx: JobContext) -> JobFuture {
        let cfg = self.settings.snapshot();
        let mut opts = self.base.clone();
        opts.chunk_size = ctx.task.settings.chunk_size_bytes();
        opts.concurrency = ctx.task.settings.chunk_concurrency.clamp(
            crate::config::CHUNK_CONCURRENCY_RANGE.0,
            crate::config::CHUNK_CONCURRENCY_RANGE.1,
        );
        opts.policy = cfg
            .retry
            .as_ref()
            .map(RetryPolicy::from)
            .unwrap_or_default();
        let muxer = self
            .muxer
            .clone()
            .unwrap_or_else(|| Arc::new(FfmpegMuxer::new(cfg.ffmpeg_program())));
        Box::pin(run_job(ctx, opts, muxer))
    }
}

/// Drive one task to `done` or `error`. An abort ends the run silently,
/// leaving parts and manifests in place for a later resume.
pub async fn run_job(ctx: JobContext, opts: TransferOptions, muxer: Arc<dyn Muxer>) {
    let id = ctx.id();
    tracing::info!(task_id = id, "orchestrator started");
    match orchestrate(&ctx, opts, muxer).await {
        Ok(output_path) => {
            tracing::info!(task_id = id, "task finished: {}", output_path.display());
            ctx.send(JobMessage::Done { output_path });
        }
        Err(e) if EngineError::is_aborted(&e) => {
            tracing::info!(task_id = id, "orchestrator stopped");
        }
        Err(e) => {
            tracing::warn!(task_id = id, "task failed: {:#}", e);
            ctx.send(JobMessage::Error {
                message: format!("{:#}", e),
            });
        }
    }
}

async fn orchestrate(ctx: &JobContext, opts: TransferOptions, muxer: Arc<dyn Muxer>) -> Result<PathBuf> {
    let task = &ctx.task;
    let temp_dir = task.temp_dir();
    let mut inputs = Vec::new();
    let mut finished_bytes = 0u64;

    for (kind, url) in task.streams.iter() {
        ctx.abort.check()?;
        let dir = temp_dir.join(kind.dir_name());
        let url = url.to_string();
        let opts = opts.clone();
        let job = ctx.clone();
        let span = tracing::info_span!("stream", task_id = task.id, stream = %kind);
        let base = finished_bytes;

        let out = tokio::task::spawn_blocking(move || {
            let _guard = span.enter();
            transfer::transfer_stream(&url, &dir, &opts, &job.abort, &mut |done, total| {
                job.progress(base + total, base + done);
            })
        })
        .await
        .context("transfer worker panicked")?
        .with_context(|| format!("{} stream", kind))?;

        finished_bytes += out.length;
        inputs.push(out.path);
    }

    ctx.abort.check()?;

    let output = naming::output_path(task, &task.settings.filename_template, &task.target_dir);
    let target_dir = task.target_dir.clone();
    let out = output.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        std::fs::create_dir_all(&target_dir)
            .with_context(|| format!("failed to create {}", target_dir.display()))?;
        muxer.mux(&inputs, &out)
    })
    .await
    .context("mux worker panicked")??;

    tokio::task::spawn_blocking(move || storage::remove_dir_best_effort(&temp_dir))
        .await
        .ok();
    Ok(output)
}
