use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

/// Bounds for the number of tasks running at once.
pub const TASK_CONCURRENCY_RANGE: (usize, usize) = (1, 16);
/// Bounds for the number of range fetchers per stream.
pub const CHUNK_CONCURRENCY_RANGE: (usize, usize) = (1, 16);

/// Retry policy parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per part (including the first).
    pub max_attempts: u32,
    /// Base delay in seconds for exponential backoff (e.g. 0.8 = 800ms).
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
    /// Random extra delay as a fraction of the computed backoff (0.25 = up to +25%).
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_jitter() -> f64 {
    0.25
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_secs: 0.8,
            max_delay_secs: 15,
            jitter: default_jitter(),
        }
    }
}

/// Global configuration loaded from `~/.config/mdm/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MdmConfig {
    /// Maximum number of tasks downloading at once. Clamped to [1, 16].
    pub task_concurrency: usize,
    /// Maximum concurrent range fetchers per stream. Clamped to [1, 16].
    pub chunk_concurrency: usize,
    /// Part size in MiB. Clamped to [2, 64].
    pub chunk_size_mib: u64,
    /// Output name template; `{title}` and `{id}` are substituted.
    pub filename_template: String,
    /// Default destination directory for tasks that do not name one.
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
    /// Muxer executable. Defaults to `$FFMPEG_PATH` or `ffmpeg`.
    #[serde(default)]
    pub ffmpeg_path: Option<String>,
    /// Optional retry policy; if missing, built-in defaults are used.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl Default for MdmConfig {
    fn default() -> Self {
        Self {
            task_concurrency: 4,
            chunk_concurrency: 4,
            chunk_size_mib: 8,
            filename_template: "{title}-{id}".to_string(),
            download_dir: None,
            ffmpeg_path: None,
            retry: None,
        }
    }
}

impl MdmConfig {
    pub fn clamped_task_concurrency(&self) -> usize {
        self.task_concurrency
            .clamp(TASK_CONCURRENCY_RANGE.0, TASK_CONCURRENCY_RANGE.1)
    }

    pub fn clamped_chunk_concurrency(&self) -> usize {
        self.chunk_concurrency
            .clamp(CHUNK_CONCURRENCY_RANGE.0, CHUNK_CONCURRENCY_RANGE.1)
    }

    /// Muxer executable: config value, then `$FFMPEG_PATH`, then `ffmpeg` on PATH.
    pub fn ffmpeg_program(&self) -> String {
        self.ffmpeg_path
            .clone()
            .or_else(|| std::env::var("FFMPEG_PATH").ok())
            .unwrap_or_else(|| "ffmpeg".to_string())
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("mdm")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<MdmConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = MdmConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: MdmConfig = toml::from_str(&data)?;
    Ok(cfg)
}

/// Live settings shared between the operator and the scheduler.
///
/// Only the task concurrency cap is read live (on every scheduler pump);
/// everything else is snapshotted into a task when it is created.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    inner: Arc<RwLock<MdmConfig>>,
}

impl Settings {
    pub fn new(cfg: MdmConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(cfg)),
        }
    }

    /// Copy of the current configuration.
    pub fn snapshot(&self) -> MdmConfig {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Current task concurrency cap, clamped to [1, 16].
    pub fn task_concurrency(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clamped_task_concurrency()
    }

    /// Apply an operator change. Takes effect for work started afterwards.
    pub fn update(&self, f: impl FnOnce(&mut MdmConfig)) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard);
    }
}
