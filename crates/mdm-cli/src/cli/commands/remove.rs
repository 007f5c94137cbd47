//! `mdm remove <id>` – remove a task and its temporary files; with
//! `--delete-files` the finished output goes too.

use anyhow::{bail, Result};
use mdm_core::control::default_control_socket_path;
use mdm_core::storage;
use mdm_core::store::TaskStore;
use mdm_core::task::ControlAction;

use crate::cli::control_socket;

pub async fn run_remove(store: &TaskStore, id: i64, delete_files: bool) -> Result<()> {
    let Some(task) = store.get(id).await? else {
        bail!("task {id} not found");
    };

    let mut via_scheduler = false;
    if let Ok(path) = default_control_socket_path() {
        if let Some(reply) = control_socket::send_control(&path, ControlAction::Delete, id).await? {
            if let Some(err) = reply.strip_prefix("error ") {
                bail!("{}", err);
            }
            via_scheduler = true;
        }
    }
    if !via_scheduler {
        let temp_dir = task.temp_dir();
        tokio::task::spawn_blocking(move || storage::remove_dir_best_effort(&temp_dir)).await?;
        store.remove(id).await?;
    }

    if delete_files {
        if let Some(path) = &task.output_path {
            match tokio::fs::remove_file(path).await {
                Ok(()) => tracing::debug!(path = %path.display(), "deleted file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(path = %path.display(), "could not delete file: {}", e),
            }
        }
    }

    println!("Removed task {id}");
    Ok(())
}
