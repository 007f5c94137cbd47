//! Abort tokens for running orchestrators.
//!
//! Every running task owns one token; pause, cancel and delete set it. The
//! orchestrator hands a clone down to each fetcher worker, which checks it
//! between writes and during backoff sleeps.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::task::TaskId;

/// Error returned when a transfer is stopped by an operator (pause/cancel/delete).
#[derive(Debug)]
pub struct JobAborted;

impl std::fmt::Display for JobAborted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task aborted by operator")
    }
}

impl std::error::Error for JobAborted {}

/// One task's abort flag. Cheap to clone; all clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct AbortToken(Arc<AtomicBool>);

impl AbortToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Shared flag, for callbacks that only take an `AtomicBool`.
    pub fn flag(&self) -> &AtomicBool {
        &self.0
    }

    /// Err(JobAborted) once abort was requested.
    pub fn check(&self) -> Result<(), JobAborted> {
        if self.is_aborted() {
            Err(JobAborted)
        } else {
            Ok(())
        }
    }
}

/// Registry of task id -> abort token for every running orchestrator.
#[derive(Debug, Default)]
pub struct JobControl {
    jobs: RwLock<HashMap<TaskId, AbortToken>>,
}

impl JobControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task that is about to start and return its fresh token.
    /// Replaces any stale token left by an earlier run.
    pub fn register(&self, id: TaskId) -> AbortToken {
        let token = AbortToken::new();
        self.jobs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, token.clone());
        token
    }

    pub fn unregister(&self, id: TaskId) {
        self.jobs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
    }

    /// Signal abort. Returns false if the task has no registered token.
    pub fn request_abort(&self, id: TaskId) -> bool {
        match self
            .jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
        {
            Some(token) => {
                token.abort();
                true
            }
            None => false,
        }
    }

    /// Signal abort to every registered task (shutdown).
    pub fn abort_all(&self) {
        for token in self.jobs.read().unwrap_or_else(|e| e.into_inner()).values() {
            token.abort();
        }
    }

    pub fn is_registered(&self, id: TaskId) -> bool {
        self.jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&id)
    }
}

/// Default path for the control socket (same XDG state dir as the task database).
pub fn default_control_socket_path() -> std::io::Result<PathBuf> {
    let dir = xdg::BaseDirectories::with_prefix("mdm")?.get_state_home();
    Ok(dir.join("control.sock"))
}
