//! `mdm pause|resume|cancel <id>`.
//!
//! Goes through the control socket when `mdm run` is active; otherwise the
//! stored row is updated directly using the scheduler's transition rules.

use anyhow::{bail, Result};
use mdm_core::control::default_control_socket_path;
use mdm_core::store::TaskStore;
use mdm_core::task::{ControlAction, TaskStatus};

use crate::cli::control_socket;

/// Status a stored task moves to when no scheduler is running, or None if
/// `action` is not allowed from `status`.
pub fn offline_transition(status: TaskStatus, action: ControlAction) -> Option<TaskStatus> {
    match action {
        ControlAction::Pause => {
            matches!(status, TaskStatus::Queued | TaskStatus::Running).then_some(TaskStatus::Paused)
        }
        ControlAction::Resume => status.is_resumable().then_some(TaskStatus::Queued),
        ControlAction::Cancel => (status != TaskStatus::Done).then_some(TaskStatus::Canceled),
        ControlAction::Delete => None,
    }
}

pub async fn run_control(store: &TaskStore, id: i64, action: ControlAction) -> Result<()> {
    if let Ok(path) = default_control_socket_path() {
        if let Some(reply) = control_socket::send_control(&path, action, id).await? {
            match reply.strip_prefix("ok ") {
                Some(status) => println!("Task {id}: {status}"),
                None => bail!("{}", reply.strip_prefix("error ").unwrap_or(&reply)),
            }
            return Ok(());
        }
    }

    let Some(task) = store.get(id).await? else {
        bail!("task {id} not found");
    };
    let Some(next) = offline_transition(task.status, action) else {
        bail!("cannot {:?} task {} while {}", action, id, task.status.as_str());
    };
    store.set_status(id, next).await?;
    println!("Task {id}: {}", next.as_str());
    Ok(())
}
