//! Scheduler actor: the only owner of task state.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::Settings;
use crate::control::JobControl;
use crate::orchestrator::{JobEnvelope, JobRunner, JobSignal};
use crate::storage;
use crate::store::TaskStore;
use crate::task::{
    ControlAction, JobMessage, NewTask, Task, TaskEvent, TaskEventKind, TaskId, TaskStatus,
};

use super::speed::SpeedMeter;
use super::{admit, SchedulerError};

const TICK: Duration = Duration::from_secs(1);
/// How long shutdown waits for orchestrators to notice their abort.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub(super) enum Command {
    Create {
        new: NewTask,
        reply: oneshot::Sender<Result<Task, SchedulerError>>,
    },
    List {
        reply: oneshot::Sender<Vec<Task>>,
    },
    Get {
        id: TaskId,
        reply: oneshot::Sender<Option<Task>>,
    },
    Control {
        id: TaskId,
        action: ControlAction,
        reply: oneshot::Sender<Result<Option<Task>, SchedulerError>>,
    },
    Pump,
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Write-behind persistence request.
enum StoreOp {
    Upsert(Task),
    Remove(TaskId),
}

fn spawn_store(store: TaskStore) -> (mpsc::UnboundedSender<StoreOp>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<StoreOp>();
    let handle = tokio::spawn(async move {
        while let Some(op) = rx.recv().await {
            let result = match &op {
                StoreOp::Upsert(task) => store.upsert(task).await,
                StoreOp::Remove(id) => store.remove(*id).await,
            };
            if let Err(e) = result {
                tracing::warn!("task store write failed: {:#}", e);
            }
        }
    });
    (tx, handle)
}

pub(super) struct Actor {
    pub(super) settings: Settings,
    pub(super) runner: Arc<dyn JobRunner>,
    pub(super) tasks: BTreeMap<TaskId, Task>,
    /// Admission order. Resumed tasks go to the front.
    pub(super) queue: VecDeque<TaskId>,
    /// Live runs: task id -> dispatch generation.
    pub(super) active: HashMap<TaskId, u64>,
    /// Detached runs (paused, canceled, deleted, finished) that have not
    /// exited yet. They keep their slot and block a restart of the task.
    pub(super) draining: HashMap<TaskId, u64>,
    /// Temp dirs of deleted tasks to remove once their run exits.
    purge_on_exit: HashMap<TaskId, PathBuf>,
    pub(super) control: JobControl,
    next_id: TaskId,
    pub(super) next_generation: u64,
    pub(super) speed: HashMap<TaskId, SpeedMeter>,
    pub(super) dirty_progress: HashSet<TaskId>,
    events: broadcast::Sender<TaskEvent>,
    pub(super) job_tx: mpsc::UnboundedSender<JobEnvelope>,
    job_rx: Option<mpsc::UnboundedReceiver<JobEnvelope>>,
    store_tx: Option<mpsc::UnboundedSender<StoreOp>>,
    store_task: Option<JoinHandle<()>>,
    shutting_down: bool,
}

impl Actor {
    pub(super) fn new(
        settings: Settings,
        runner: Arc<dyn JobRunner>,
        store: Option<TaskStore>,
        events: broadcast::Sender<TaskEvent>,
        loaded: Vec<Task>,
    ) -> Self {
        let (job_tx, job_rx) = mpsc::unbounded_channel();
        let (store_tx, store_task) = match store {
            Some(s) => {
                let (tx, h) = spawn_store(s);
                (Some(tx), Some(h))
            }
            None => (None, None),
        };

        let next_id = loaded.iter().map(|t| t.id).max().unwrap_or(0) + 1;
        // `loaded` is in creation order.
        let queue = loaded
            .iter()
            .filter(|t| t.status == TaskStatus::Queued)
            .map(|t| t.id)
            .collect();
        let tasks = loaded.into_iter().map(|t| (t.id, t)).collect();

        Self {
            settings,
            runner,
            tasks,
            queue,
            active: HashMap::new(),
            draining: HashMap::new(),
            purge_on_exit: HashMap::new(),
            control: JobControl::new(),
            next_id,
            next_generation: 1,
            speed: HashMap::new(),
            dirty_progress: HashSet::new(),
            events,
            job_tx,
            job_rx: Some(job_rx),
            store_tx,
            store_task,
            shutting_down: false,
        }
    }

    pub(super) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let Some(mut jobs) = self.job_rx.take() else {
            return;
        };
        let mut tick = tokio::time::interval(TICK);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        self.pump();

        let mut shutdown_reply = None;
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Shutdown { reply }) => {
                        shutdown_reply = Some(reply);
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
                Some(env) = jobs.recv() => self.handle_job(env),
                _ = tick.tick() => self.tick(),
            }
        }

        self.shutting_down = true;
        self.control.abort_all();
        let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
        while !(self.active.is_empty() && self.draining.is_empty()) {
            match tokio::time::timeout_at(deadline, jobs.recv()).await {
                Ok(Some(env)) => self.handle_job(env),
                _ => {
                    tracing::warn!(
                        "shutdown: {} orchestrator(s) did not stop in time",
                        self.active.len() + self.draining.len()
                    );
                    break;
                }
            }
        }
        self.flush_progress();
        self.store_tx = None;
        if let Some(handle) = self.store_task.take() {
            let _ = handle.await;
        }
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
        tracing::info!("scheduler stopped");
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Create { new, reply } => {
                let _ = reply.send(self.create(new));
            }
            Command::List { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::Get { id, reply } => {
                let _ = reply.send(self.tasks.get(&id).cloned());
            }
            Command::Control { id, action, reply } => {
                let _ = reply.send(self.control_task(id, action));
            }
            Command::Pump => self.pump(),
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    /// All tasks, most recently updated first.
    fn snapshot(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        tasks
    }

    pub(super) fn emit(&self, id: TaskId, kind: TaskEventKind) {
        let _ = self.events.send(TaskEvent { id, kind });
    }

    pub(super) fn persist(&self, id: TaskId) {
        if let (Some(tx), Some(task)) = (&self.store_tx, self.tasks.get(&id)) {
            let _ = tx.send(StoreOp::Upsert(task.clone()));
        }
    }

    pub(super) fn flush_progress(&mut self) {
        let dirty: Vec<TaskId> = self.dirty_progress.drain().collect();
        for id in dirty {
            self.persist(id);
        }
    }

    /// Change status, publish it, persist the task.
    pub(super) fn set_status(&mut self, id: TaskId, status: TaskStatus) {
        let Some(task) = self.tasks.get_mut(&id) else {
            return;
        };
        task.status = status;
        task.touch();
        if status != TaskStatus::Running {
            task.progress.speed = 0.0;
            self.speed.remove(&id);
        }
        tracing::info!(task_id = id, "task {}", status.as_str());
        self.dirty_progress.remove(&id);
        self.emit(id, TaskEventKind::Status(status));
        self.persist(id);
    }

    fn create(&mut self, new: NewTask) -> Result<Task, SchedulerError> {
        let task = admit(self.next_id, new, &self.settings.snapshot())?;
        let id = task.id;
        self.next_id += 1;
        tracing::info!(task_id = id, title = %task.title, "task admitted");
        self.tasks.insert(id, task);
        self.queue.push_back(id);
        self.emit(id, TaskEventKind::Status(TaskStatus::Queued));
        self.persist(id);
        self.pump();
        self.tasks.get(&id).cloned().ok_or(SchedulerError::NotFound(id))
    }

    /// Detach the live run of `id` (if any): abort it and let it drain.
    fn detach(&mut self, id: TaskId) {
        if let Some(generation) = self.active.remove(&id) {
            self.control.request_abort(id);
            self.draining.insert(id, generation);
        }
    }

    fn control_task(&mut self, id: TaskId, action: ControlAction) -> Result<Option<Task>, SchedulerError> {
        let status = self
            .tasks
            .get(&id)
            .map(|t| t.status)
            .ok_or(SchedulerError::NotFound(id))?;
        let invalid = SchedulerError::InvalidTransition { id, status, action };

        match action {
            ControlAction::Pause => match status {
                TaskStatus::Queued => {
                    self.queue.retain(|q| *q != id);
                    self.set_status(id, TaskStatus::Paused);
                }
                TaskStatus::Running => {
                    self.detach(id);
                    self.set_status(id, TaskStatus::Paused);
                }
                _ => return Err(invalid),
            },
            ControlAction::Resume => {
                if !status.is_resumable() {
                    return Err(invalid);
                }
                if let Some(task) = self.tasks.get_mut(&id) {
                    task.last_error = None;
                }
                self.queue.retain(|q| *q != id);
                self.queue.push_front(id);
                self.set_status(id, TaskStatus::Queued);
                self.pump();
            }
            ControlAction::Cancel => match status {
                TaskStatus::Done => return Err(invalid),
                TaskStatus::Canceled => {}
                _ => {
                    self.queue.retain(|q| *q != id);
                    self.detach(id);
                    self.set_status(id, TaskStatus::Canceled);
                    self.pump();
                }
            },
            ControlAction::Delete => {
                self.queue.retain(|q| *q != id);
                self.detach(id);
                self.speed.remove(&id);
                self.dirty_progress.remove(&id);
                if let Some(task) = self.tasks.remove(&id) {
                    let temp_dir = task.temp_dir();
                    if self.draining.contains_key(&id) {
                        self.purge_on_exit.insert(id, temp_dir);
                    } else {
                        tokio::task::spawn_blocking(move || storage::remove_dir_best_effort(&temp_dir));
                    }
                }
                if let Some(tx) = &self.store_tx {
                    let _ = tx.send(StoreOp::Remove(id));
                }
                tracing::info!(task_id = id, "task deleted");
                self.emit(id, TaskEventKind::Removed);
                self.pump();
                return Ok(None);
            }
        }
        Ok(self.tasks.get(&id).cloned())
    }

    fn handle_job(&mut self, env: JobEnvelope) {
        let JobEnvelope {
            id,
            generation,
            signal,
        } = env;
        match signal {
            JobSignal::Exited => self.on_exit(id, generation),
            JobSignal::Message(msg) => {
                if self.active.get(&id) != Some(&generation) {
                    tracing::debug!(task_id = id, generation, "ignoring message from detached run");
                    return;
                }
                self.on_message(id, generation, msg);
            }
        }
    }

    fn on_message(&mut self, id: TaskId, generation: u64, msg: JobMessage) {
        match msg {
            JobMessage::Progress {
                total_bytes,
                downloaded_bytes,
            } => {
                let Some(task) = self.tasks.get_mut(&id) else {
                    return;
                };
                task.progress.total_bytes = total_bytes;
                task.progress.downloaded_bytes = downloaded_bytes;
                let speed = task.progress.speed;
                self.dirty_progress.insert(id);
                self.emit(
                    id,
                    TaskEventKind::Progress {
                        total_bytes,
                        downloaded_bytes,
                        speed,
                    },
                );
            }
            JobMessage::Done { output_path } => {
                let Some(task) = self.tasks.get_mut(&id) else {
                    return;
                };
                if task.status != TaskStatus::Running {
                    return;
                }
                task.output_path = Some(output_path.clone());
                task.progress.downloaded_bytes = task.progress.total_bytes;
                self.active.remove(&id);
                self.draining.insert(id, generation);
                self.set_status(id, TaskStatus::Done);
                self.emit(id, TaskEventKind::Done { output_path });
            }
            JobMessage::Error { message } => {
                let Some(task) = self.tasks.get_mut(&id) else {
                    return;
                };
                if task.status != TaskStatus::Running {
                    return;
                }
                task.last_error = Some(message.clone());
                self.active.remove(&id);
                self.draining.insert(id, generation);
                self.set_status(id, TaskStatus::Error);
                self.emit(id, TaskEventKind::Error { message });
            }
        }
    }

    fn on_exit(&mut self, id: TaskId, generation: u64) {
        self.control.unregister(id);
        if self.active.get(&id) == Some(&generation) {
            self.active.remove(&id);
            let running = self
                .tasks
                .get(&id)
                .is_some_and(|t| t.status == TaskStatus::Running);
            if running && self.shutting_down {
                // Picked up again on the next start.
                self.set_status(id, TaskStatus::Queued);
            } else if running {
                let message = "orchestrator exited without a result".to_string();
                if let Some(task) = self.tasks.get_mut(&id) {
                    task.last_error = Some(message.clone());
                }
                self.set_status(id, TaskStatus::Error);
                self.emit(id, TaskEventKind::Error { message });
            }
        }
        if self.draining.get(&id) == Some(&generation) {
            self.draining.remove(&id);
        }
        if let Some(dir) = self.purge_on_exit.remove(&id) {
            tokio::task::spawn_blocking(move || storage::remove_dir_best_effort(&dir));
        }
        if !self.shutting_down {
            self.pump();
        }
    }
}
