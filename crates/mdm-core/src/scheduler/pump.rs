//! Admission pump, dispatch, and the periodic speed tick.

use std::collections::VecDeque;
use std::time::Instant;

use crate::orchestrator::{JobContext, JobSignal};
use crate::task::{TaskEventKind, TaskId, TaskStatus};

use super::actor::Actor;
use super::speed::SpeedMeter;

impl Actor {
    /// Start queued tasks while slots are free.
    ///
    /// The cap is read from the live settings on every call; lowering it
    /// never stops running tasks, it only delays new starts. Draining runs
    /// occupy a slot, and a task whose previous run is still draining is
    /// skipped (it keeps its queue position).
    pub(super) fn pump(&mut self) {
        let cap = self.settings.task_concurrency();
        let mut skipped = VecDeque::new();
        while self.active.len() + self.draining.len() < cap {
            let Some(id) = self.queue.pop_front() else {
                break;
            };
            if self.tasks.get(&id).map(|t| t.status) != Some(TaskStatus::Queued) {
                continue;
            }
            if self.draining.contains_key(&id) {
                skipped.push_back(id);
                continue;
            }
            self.dispatch(id);
        }
        while let Some(id) = skipped.pop_back() {
            self.queue.push_front(id);
        }
    }

    fn dispatch(&mut self, id: TaskId) {
        let generation = self.next_generation;
        self.next_generation += 1;
        let abort = self.control.register(id);
        self.active.insert(id, generation);
        if let Some(task) = self.tasks.get_mut(&id) {
            task.last_error = None;
            task.output_path = None;
        }
        self.set_status(id, TaskStatus::Running);

        let Some(task) = self.tasks.get(&id).cloned() else {
            return;
        };
        self.speed.insert(id, SpeedMeter::new(task.progress.downloaded_bytes, Instant::now()));
        tracing::debug!(task_id = id, generation, "dispatching orchestrator");

        let ctx = JobContext::new(task, abort, generation, self.job_tx.clone());
        let exit = ctx.clone();
        let run = self.runner.run(ctx);
        tokio::spawn(async move {
            // A panicking run still has to give its slot back.
            if let Err(e) = tokio::spawn(run).await {
                tracing::warn!(task_id = id, "orchestrator panicked: {}", e);
            }
            exit.signal(JobSignal::Exited);
        });
    }

    /// Sample speeds of running tasks and persist progress that changed.
    pub(super) fn tick(&mut self) {
        let now = Instant::now();
        let running: Vec<TaskId> = self.active.keys().copied().collect();
        for id in running {
            let (Some(task), Some(meter)) = (self.tasks.get_mut(&id), self.speed.get_mut(&id)) else {
                continue;
            };
            if task.status != TaskStatus::Running {
                continue;
            }
            let speed = meter.sample(task.progress.downloaded_bytes, now);
            if (speed - task.progress.speed).abs() < f64::EPSILON {
                continue;
            }
            task.progress.speed = speed;
            let kind = TaskEventKind::Progress {
                total_bytes: task.progress.total_bytes,
                downloaded_bytes: task.progress.downloaded_bytes,
                speed,
            };
            self.emit(id, kind);
        }
        self.flush_progress();
    }
}
