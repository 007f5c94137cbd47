//! Muxer contract: combine merged elementary streams into the final container.
//!
//! Runs an external program (ffmpeg by default). A single input is simply
//! moved into place.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::EngineError;

/// Combines `inputs` (video first, then audio) into `output`.
///
/// Blocking; called from `spawn_blocking`. Errors should carry an
/// `EngineError::MuxFailed` root.
pub trait Muxer: Send + Sync {
    fn mux(&self, inputs: &[PathBuf], output: &Path) -> Result<()>;
}

/// Move a single input into place, copying when rename crosses filesystems.
pub fn passthrough(input: &Path, output: &Path) -> Result<()> {
    if fs::rename(input, output).is_ok() {
        return Ok(());
    }
    fs::copy(input, output)
        .with_context(|| format!("copy {} to {}", input.display(), output.display()))
        .map_err(|e| EngineError::MuxFailed(format!("{:#}", e)))?;
    let _ = fs::remove_file(input);
    Ok(())
}

/// `ffmpeg -y -i <video> -i <audio> -c copy -movflags faststart <out>`.
#[derive(Debug, Clone)]
pub struct FfmpegMuxer {
    pub program: String,
}

impl FfmpegMuxer {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn args(inputs: &[PathBuf], output: &Path) -> Vec<std::ffi::OsString> {
        let mut args: Vec<std::ffi::OsString> = vec!["-y".into()];
        for input in inputs {
            args.push("-i".into());
            args.push(input.into());
        }
        args.extend(["-c", "copy", "-movflags", "faststart"].map(std::ffi::OsString::from));
        args.push(output.into());
        args
    }
}

impl Default for FfmpegMuxer {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl Muxer for FfmpegMuxer {
    fn mux(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
        match inputs {
            [] => Err(EngineError::MuxFailed("no inputs".into()).into()),
            [single] => passthrough(single, output),
            _ => {
                tracing::debug!(program = %self.program, "muxing {} inputs", inputs.len());
                let out = Command::new(&self.program)
                    .args(Self::args(inputs, output))
                    .output()
                    .map_err(|e| EngineError::MuxFailed(format!("{}: {}", self.program, e)))?;
                if !out.status.success() {
                    let stderr = String::from_utf8_lossy(&out.stderr);
                    let lines: Vec<&str> = stderr.lines().collect();
                    let tail = lines[lines.len().saturating_sub(5)..].join("\n");
                    return Err(EngineError::MuxFailed(format!(
                        "{} exited with {}: {}",
                        self.program, out.status, tail
                    ))
                    .into());
                }
                Ok(())
            }
        }
    }
}
