//! `mdm add` – queue a new task.
//!
//! A running `mdm run` receives the task over the control socket and may start
//! it right away; otherwise the row is written to the database and picked up by
//! the next `mdm run`.

use anyhow::{bail, Result};
use mdm_core::config::MdmConfig;
use mdm_core::control::default_control_socket_path;
use mdm_core::scheduler;
use mdm_core::store::TaskStore;
use mdm_core::task::{NewTask, StreamRefs, Task};
use std::path::{Path, PathBuf};

use crate::cli::control_socket;

#[derive(Debug, Clone)]
pub struct AddArgs {
    pub title: String,
    pub platform: String,
    pub video: Option<String>,
    pub audio: Option<String>,
    pub dir: Option<PathBuf>,
}

/// Without `--dir` or a configured download_dir, the current directory is used.
pub fn build_new_task(args: AddArgs, cfg: &MdmConfig) -> Result<NewTask> {
    let target_dir = match args.dir.or_else(|| cfg.download_dir.clone()) {
        Some(d) => d,
        None => std::env::current_dir()?,
    };
    Ok(NewTask {
        title: args.title,
        platform: args.platform,
        target_dir: Some(target_dir),
        streams: StreamRefs {
            video: args.video,
            audio: args.audio,
        },
        settings: None,
    })
}

/// Validate `args` the way the scheduler admits tasks and build the row.
pub fn build_task(id: i64, args: AddArgs, cfg: &MdmConfig) -> Result<Task> {
    let new = build_new_task(args, cfg)?;
    Ok(scheduler::admit(id, new, cfg)?)
}

pub async fn run_add(store: &TaskStore, cfg: &MdmConfig, args: AddArgs) -> Result<()> {
    let socket = default_control_socket_path().ok();
    add_via(socket.as_deref(), store, cfg, args).await
}

async fn add_via(socket: Option<&Path>, store: &TaskStore, cfg: &MdmConfig, args: AddArgs) -> Result<()> {
    let new = build_new_task(args, cfg)?;
    if let Some(path) = socket {
        if let Some(reply) = control_socket::send_add(path, &new).await? {
            match reply.strip_prefix("ok ") {
                Some(id) => println!("Added task {} ({}) to the running scheduler", id, new.title),
                None => bail!("{}", reply.strip_prefix("error ").unwrap_or(&reply)),
            }
            return Ok(());
        }
    }

    let id = store.max_id().await? + 1;
    let task = scheduler::admit(id, new, cfg)?;
    store.upsert(&task).await?;
    println!("Added task {} ({}) -> {}", task.id, task.title, task.target_dir.display());
    Ok(())
}
