//! Control socket: server (during `mdm run`) and client (for `mdm add`, `mdm pause` etc.).
//! Protocol: one line per request, `<pause|resume|cancel|delete> <id>` or
//! `add <json NewTask>`; the server answers each with one line, `ok <status>`
//! (`ok <id>` for add) or `error <message>`.

use anyhow::Result;
use mdm_core::scheduler::Scheduler;
use mdm_core::task::{ControlAction, NewTask, TaskId};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Control(ControlAction, TaskId),
    Add(NewTask),
}

/// Parses one request line. None for anything malformed.
pub fn parse_line(line: &str) -> Option<Request> {
    let line = line.trim();
    if let Some(json) = line.strip_prefix("add ") {
        return serde_json::from_str(json).ok().map(Request::Add);
    }
    let mut words = line.split_whitespace();
    let action = ControlAction::parse(words.next()?)?;
    let id = words.next()?.parse::<TaskId>().ok()?;
    if words.next().is_some() {
        return None;
    }
    Some(Request::Control(action, id))
}

fn action_word(action: ControlAction) -> &'static str {
    match action {
        ControlAction::Pause => "pause",
        ControlAction::Resume => "resume",
        ControlAction::Cancel => "cancel",
        ControlAction::Delete => "delete",
    }
}

/// Spawns a task that listens on `path` and applies each request to `scheduler`.
pub fn spawn_control_listener(
    scheduler: Arc<Scheduler>,
    path: impl AsRef<Path>,
) -> Result<tokio::task::JoinHandle<()>> {
    let path = path.as_ref().to_path_buf();
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path)?;
    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let scheduler = Arc::clone(&scheduler);
                    tokio::spawn(serve_client(stream, scheduler));
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    });
    Ok(handle)
}

async fn serve_client(stream: UnixStream, scheduler: Arc<Scheduler>) {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let reply = match parse_line(&line) {
            Some(Request::Control(action, id)) => match scheduler.control(id, action).await {
                Ok(Some(task)) => format!("ok {}\n", task.status.as_str()),
                Ok(None) => "ok removed\n".to_string(),
                Err(e) => format!("error {}\n", e),
            },
            Some(Request::Add(new)) => match scheduler.create(new).await {
                Ok(task) => format!("ok {}\n", task.id),
                Err(e) => format!("error {}\n", e),
            },
            None => format!("error malformed request: {}\n", line.trim()),
        };
        if write.write_all(reply.as_bytes()).await.is_err() {
            break;
        }
    }
}

async fn send_line(socket_path: &Path, line: &str) -> Result<Option<String>> {
    if !socket_path.exists() {
        return Ok(None);
    }
    let stream = match UnixStream::connect(socket_path).await {
        Ok(s) => s,
        Err(e) => {
            tracing::debug!(path = %socket_path.display(), "control socket connect: {}", e);
            return Ok(None);
        }
    };
    let (read, mut write) = stream.into_split();
    write.write_all(format!("{}\n", line).as_bytes()).await?;
    let mut lines = BufReader::new(read).lines();
    Ok(lines.next_line().await?)
}

/// Sends one control request to a running `mdm run` and returns its reply line.
///
/// `Ok(None)` if no scheduler is listening on `socket_path`.
pub async fn send_control(socket_path: &Path, action: ControlAction, id: TaskId) -> Result<Option<String>> {
    send_line(socket_path, &format!("{} {}", action_word(action), id)).await
}

/// Hands a new task to a running `mdm run`; `Ok(None)` if none is listening.
pub async fn send_add(socket_path: &Path, new: &NewTask) -> Result<Option<String>> {
    send_line(socket_path, &format!("add {}", serde_json::to_string(new)?)).await
}
