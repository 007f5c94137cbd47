//! `mdm run` – run the scheduler on the persisted queue until nothing is left
//! queued or running, printing progress as it goes.

use anyhow::Result;
use mdm_core::config::{MdmConfig, Settings};
use mdm_core::control::default_control_socket_path;
use mdm_core::orchestrator::MediaJobRunner;
use mdm_core::scheduler::Scheduler;
use mdm_core::store::TaskStore;
use mdm_core::task::{TaskEvent, TaskEventKind, TaskId, TaskStatus};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;

use crate::cli::control_socket;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);
const IDLE_CHECK: Duration = Duration::from_millis(500);

/// One progress line for task `id`.
pub fn format_progress(id: TaskId, total: u64, done: u64, speed: f64) -> String {
    let pct = if total > 0 {
        (done as f64 / total as f64 * 100.0).min(100.0)
    } else {
        0.0
    };
    format!(
        "[{}] {:.1} / {:.1} MiB ({:.1}%)  {:.2} MiB/s",
        id,
        done as f64 / 1_048_576.0,
        total as f64 / 1_048_576.0,
        pct,
        speed / 1_048_576.0
    )
}

#[derive(Default)]
struct Printer {
    last_progress: HashMap<TaskId, Instant>,
}

impl Printer {
    fn on_event(&mut self, ev: &TaskEvent) {
        match &ev.kind {
            TaskEventKind::Status(status) => println!("[{}] {}", ev.id, status.as_str()),
            TaskEventKind::Progress {
                total_bytes,
                downloaded_bytes,
                speed,
            } => {
                let now = Instant::now();
                let due = self
                    .last_progress
                    .get(&ev.id)
                    .map_or(true, |last| now.duration_since(*last) >= PROGRESS_INTERVAL);
                if due {
                    println!("{}", format_progress(ev.id, *total_bytes, *downloaded_bytes, *speed));
                    self.last_progress.insert(ev.id, now);
                }
            }
            TaskEventKind::Done { output_path } => {
                println!("[{}] saved {}", ev.id, output_path.display())
            }
            TaskEventKind::Error { message } => println!("[{}] failed: {}", ev.id, message),
            TaskEventKind::Removed => println!("[{}] removed", ev.id),
        }
    }
}

pub async fn run_scheduler(store: TaskStore, mut cfg: MdmConfig, jobs: Option<usize>) -> Result<()> {
    if let Some(n) = jobs {
        cfg.task_concurrency = n;
    }
    let settings = Settings::new(cfg);
    let runner = MediaJobRunner::new(settings.clone());
    let scheduler = Arc::new(Scheduler::start(settings, Some(store), Arc::new(runner)).await?);
    let mut events = scheduler.subscribe();

    let socket = match default_control_socket_path() {
        Ok(path) => match control_socket::spawn_control_listener(Arc::clone(&scheduler), &path) {
            Ok(handle) => {
                tracing::debug!(path = %path.display(), "control socket listening");
                Some((handle, path))
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), "control socket unavailable: {:#}", e);
                None
            }
        },
        Err(_) => None,
    };

    let mut printer = Printer::default();
    let mut idle_check = tokio::time::interval(IDLE_CHECK);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ran = false;
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                println!("Interrupted; unfinished tasks stay queued.");
                break;
            }
            ev = events.recv() => match ev {
                Ok(ev) => {
                    ran = true;
                    printer.on_event(&ev);
                }
                Err(RecvError::Lagged(n)) => tracing::debug!("skipped {} event(s)", n),
                Err(RecvError::Closed) => break,
            },
            _ = idle_check.tick() => {
                let tasks = scheduler.list().await?;
                let busy = tasks
                    .iter()
                    .any(|t| matches!(t.status, TaskStatus::Queued | TaskStatus::Running));
                if !busy {
                    break;
                }
            }
        }
    }

    scheduler.shutdown().await;
    if let Some((handle, path)) = socket {
        handle.abort();
        let _ = std::fs::remove_file(&path);
    }

    if !ran {
        println!("No queued tasks.");
    }
    Ok(())
}
