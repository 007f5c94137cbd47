//! Task data model: what the scheduler tracks and what it tells consumers.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::MdmConfig;
use crate::planner;

/// Task identifier. Unique within one scheduler/store.
pub type TaskId = i64;

/// Lifecycle state of a task.
///
/// `queued → running → {done | error | canceled | paused}`; `paused` and
/// `error` return to `queued` through an explicit resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Paused,
    Done,
    Error,
    Canceled,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Paused => "paused",
            TaskStatus::Done => "done",
            TaskStatus::Error => "error",
            TaskStatus::Canceled => "canceled",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "queued" => TaskStatus::Queued,
            "running" => TaskStatus::Running,
            "paused" => TaskStatus::Paused,
            "done" => TaskStatus::Done,
            "canceled" => TaskStatus::Canceled,
            _ => TaskStatus::Error,
        }
    }

    /// True for states that only an explicit resume can leave (or none at all).
    pub fn is_settled(self) -> bool {
        !matches!(self, TaskStatus::Queued | TaskStatus::Running)
    }

    /// True if `resume` is allowed from this state.
    pub fn is_resumable(self) -> bool {
        matches!(self, TaskStatus::Paused | TaskStatus::Error)
    }
}

/// Which elementary stream of a task a transfer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
}

impl StreamKind {
    /// Subdirectory name inside the task's temporary directory.
    pub fn dir_name(self) -> &'static str {
        match self {
            StreamKind::Video => "video",
            StreamKind::Audio => "audio",
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Source stream URLs. At least one must be present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRefs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
}

impl StreamRefs {
    /// Present streams in transfer order: video, then audio.
    pub fn iter(&self) -> impl Iterator<Item = (StreamKind, &str)> {
        self.video
            .as_deref()
            .map(|u| (StreamKind::Video, u))
            .into_iter()
            .chain(self.audio.as_deref().map(|u| (StreamKind::Audio, u)))
    }

    pub fn is_empty(&self) -> bool {
        self.video.is_none() && self.audio.is_none()
    }
}

/// Combined progress of all streams of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub total_bytes: u64,
    pub downloaded_bytes: u64,
    /// Bytes per second, as last sampled by the scheduler tick.
    pub speed: f64,
}

impl Progress {
    /// Fraction complete in [0.0, 1.0].
    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.downloaded_bytes as f64 / self.total_bytes as f64).min(1.0)
    }
}

/// Settings captured when a task is created. In-flight work never sees later
/// configuration changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSettings {
    /// Range fetchers per stream.
    pub chunk_concurrency: usize,
    /// Part size in MiB (clamped when planning).
    pub chunk_size_mib: u64,
    pub filename_template: String,
}

impl TaskSettings {
    pub fn from_config(cfg: &MdmConfig) -> Self {
        Self {
            chunk_concurrency: cfg.clamped_chunk_concurrency(),
            chunk_size_mib: cfg.chunk_size_mib,
            filename_template: cfg.filename_template.clone(),
        }
    }

    /// Part size in bytes, clamped to the planner's bounds.
    pub fn chunk_size_bytes(&self) -> u64 {
        planner::clamp_chunk_size(self.chunk_size_mib.saturating_mul(planner::MIB))
    }
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self::from_config(&MdmConfig::default())
    }
}

/// One user-requested download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub platform: String,
    /// Destination directory for the final artifact.
    pub target_dir: PathBuf,
    pub streams: StreamRefs,
    pub status: TaskStatus,
    pub progress: Progress,
    pub settings: TaskSettings,
    /// Unix milliseconds.
    pub created_at: i64,
    /// Unix milliseconds.
    pub updated_at: i64,
    pub output_path: Option<PathBuf>,
    pub last_error: Option<String>,
}

impl Task {
    /// Task-scoped temporary directory: `<target>/.tmp_<id>`.
    pub fn temp_dir(&self) -> PathBuf {
        temp_dir_for(&self.target_dir, self.id)
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = unix_millis();
    }
}

/// Temporary directory used for a task's parts and manifests.
pub fn temp_dir_for(target_dir: &std::path::Path, id: TaskId) -> PathBuf {
    target_dir.join(format!(".tmp_{}", id))
}

/// Admission request handed to `Scheduler::create`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    pub platform: String,
    /// Destination directory; falls back to the configured `download_dir`.
    pub target_dir: Option<PathBuf>,
    pub streams: StreamRefs,
    /// Overrides the settings snapshot taken from the live configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<TaskSettings>,
}

/// Operator actions on an existing task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Pause,
    Resume,
    Cancel,
    Delete,
}

impl ControlAction {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pause" => Some(ControlAction::Pause),
            "resume" => Some(ControlAction::Resume),
            "cancel" => Some(ControlAction::Cancel),
            "delete" | "remove" => Some(ControlAction::Delete),
            _ => None,
        }
    }
}

/// The only information an orchestrator sends back to the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub enum JobMessage {
    Progress { total_bytes: u64, downloaded_bytes: u64 },
    Done { output_path: PathBuf },
    Error { message: String },
}

/// Status published to external consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskEvent {
    pub id: TaskId,
    pub kind: TaskEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskEventKind {
    Status(TaskStatus),
    Progress {
        total_bytes: u64,
        downloaded_bytes: u64,
        speed: f64,
    },
    Done { output_path: PathBuf },
    Error { message: String },
    /// Task was deleted and is no longer listed.
    Removed,
}

/// Current time as Unix milliseconds.
pub(crate) fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
