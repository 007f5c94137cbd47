//! Job scheduler: owns every task, the FIFO admission queue and the global
//! concurrency cap.
//!
//! A single actor task owns all mutable state; the [`Scheduler`] handle
//! talks to it over channels, so admission and control never wait on
//! network or disk. Orchestrators report back through tagged
//! [`JobEnvelope`](crate::orchestrator::JobEnvelope)s; persistence is
//! write-behind through a background store task.

mod actor;
mod pump;
mod speed;

use anyhow::Result;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::{MdmConfig, Settings};
use crate::orchestrator::JobRunner;
use crate::store::TaskStore;
use crate::task::{
    unix_millis, ControlAction, NewTask, Progress, Task, TaskEvent, TaskId, TaskSettings,
    TaskStatus,
};

use actor::{Actor, Command};

/// Capacity of the outbound event channel. Slow subscribers lag and drop.
const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("no destination directory given and no download_dir configured")]
    MissingDestination,
    #[error("task has neither a video nor an audio stream")]
    MissingStreams,
    #[error("invalid stream URL: {0}")]
    InvalidUrl(String),
    #[error("task {0} not found")]
    NotFound(TaskId),
    #[error("cannot {action:?} task {id} while {status:?}")]
    InvalidTransition {
        id: TaskId,
        status: TaskStatus,
        action: ControlAction,
    },
    #[error("scheduler is shut down")]
    Closed,
}

fn check_url(raw: &str) -> Result<(), SchedulerError> {
    match url::Url::parse(raw) {
        Ok(u) if matches!(u.scheme(), "http" | "https") => Ok(()),
        _ => Err(SchedulerError::InvalidUrl(raw.to_string())),
    }
}

/// Validate an admission request and build the queued task for `id`.
///
/// The destination falls back to `cfg.download_dir`; the settings snapshot
/// is taken from `cfg` unless the request carries its own.
pub fn admit(id: TaskId, new: NewTask, cfg: &MdmConfig) -> Result<Task, SchedulerError> {
    if new.streams.is_empty() {
        return Err(SchedulerError::MissingStreams);
    }
    for (_, url) in new.streams.iter() {
        check_url(url)?;
    }
    let target_dir: PathBuf = new
        .target_dir
        .or_else(|| cfg.download_dir.clone())
        .ok_or(SchedulerError::MissingDestination)?;
    let now = unix_millis();
    Ok(Task {
        id,
        title: new.title,
        platform: new.platform,
        target_dir,
        streams: new.streams,
        status: TaskStatus::Queued,
        progress: Progress::default(),
        settings: new.settings.unwrap_or_else(|| TaskSettings::from_config(cfg)),
        created_at: now,
        updated_at: now,
        output_path: None,
        last_error: None,
    })
}

/// Handle to a running scheduler. Cheap to share behind an `Arc`.
pub struct Scheduler {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<TaskEvent>,
    actor: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Load persisted tasks (if a store is given) and start the actor.
    ///
    /// Rows left `running` by a crash are re-queued; queued tasks keep their
    /// creation order.
    pub async fn start(
        settings: Settings,
        store: Option<TaskStore>,
        runner: Arc<dyn JobRunner>,
    ) -> Result<Self> {
        let mut loaded = Vec::new();
        if let Some(store) = &store {
            let recovered = store.recover_running().await?;
            if recovered > 0 {
                tracing::info!("re-queued {} interrupted task(s)", recovered);
            }
            loaded = store.load_all().await?;
        }

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let actor = Actor::new(settings, runner, store, events.clone(), loaded);
        let handle = tokio::spawn(actor.run(commands_rx));
        Ok(Self {
            commands,
            events,
            actor: Mutex::new(Some(handle)),
        })
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, SchedulerError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .map_err(|_| SchedulerError::Closed)?;
        rx.await.map_err(|_| SchedulerError::Closed)
    }

    /// Admit a new task; it is queued and may start immediately.
    pub async fn create(&self, new: NewTask) -> Result<Task, SchedulerError> {
        self.request(|reply| Command::Create { new, reply }).await?
    }

    /// Point-in-time snapshot, most recently updated first.
    pub async fn list(&self) -> Result<Vec<Task>, SchedulerError> {
        self.request(|reply| Command::List { reply }).await
    }

    pub async fn get(&self, id: TaskId) -> Result<Option<Task>, SchedulerError> {
        self.request(|reply| Command::Get { id, reply }).await
    }

    /// Pause, resume, cancel or delete. Delete returns `Ok(None)`.
    pub async fn control(&self, id: TaskId, action: ControlAction) -> Result<Option<Task>, SchedulerError> {
        self.request(|reply| Command::Control { id, action, reply })
            .await?
    }

    /// Re-read the live concurrency cap and start whatever now fits.
    pub fn pump(&self) {
        let _ = self.commands.send(Command::Pump);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// Stop all orchestrators (their tasks stay queued for the next start),
    /// flush persistence and end the actor.
    pub async fn shutdown(&self) {
        let _ = self.request(|reply| Command::Shutdown { reply }).await;
        let handle = self
            .actor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}
