//! CLI for the MDM media download manager.

mod commands;
mod control_socket;

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use mdm_core::config;
use mdm_core::store::TaskStore;
use mdm_core::task::ControlAction;
use std::path::{Path, PathBuf};

use commands::{
    run_add, run_checksum, run_completions, run_control, run_man, run_remove, run_scheduler,
    run_status, AddArgs,
};

/// Top-level CLI for the MDM media download manager.
#[derive(Debug, Parser)]
#[command(name = "mdm")]
#[command(about = "MDM: segmented media download manager", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Queue a new task for a video and/or audio stream. A running `mdm run`
    /// takes it over the control socket; otherwise it waits in the database.
    Add {
        /// Human-readable title, used in the output file name.
        #[arg(long)]
        title: String,
        /// Source platform label.
        #[arg(long, default_value = "web")]
        platform: String,
        /// Video stream URL.
        #[arg(long, value_name = "URL")]
        video: Option<String>,
        /// Audio stream URL.
        #[arg(long, value_name = "URL")]
        audio: Option<String>,
        /// Destination directory (default: download_dir from config, else the current directory).
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,
    },

    /// Run the scheduler until every queued task has settled.
    Run {
        /// Override task_concurrency for this run.
        #[arg(long, value_name = "N")]
        jobs: Option<usize>,
    },

    /// Show all tasks.
    Status,

    /// Pause a queued or running task.
    Pause {
        /// Task identifier.
        id: i64,
    },

    /// Put a paused or failed task back at the front of the queue.
    Resume {
        /// Task identifier.
        id: i64,
    },

    /// Cancel a task. Its temporary files are kept.
    Cancel {
        /// Task identifier.
        id: i64,
    },

    /// Remove a task and its temporary files.
    Remove {
        /// Task identifier.
        id: i64,
        /// Also delete the finished output file.
        #[arg(long)]
        delete_files: bool,
    },

    /// Compute SHA-256 of a file (e.g. a finished download).
    Checksum {
        /// Path to the file.
        path: PathBuf,
    },

    /// Print a shell completion script.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Print the man page (roff).
    Man,
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();

        // These need neither config nor database.
        match &cli.command {
            CliCommand::Completions { shell } => return run_completions(*shell),
            CliCommand::Man => return run_man(),
            CliCommand::Checksum { path } => return run_checksum(Path::new(path)).await,
            _ => {}
        }

        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);
        let store = TaskStore::open_default().await?;

        match cli.command {
            CliCommand::Add {
                title,
                platform,
                video,
                audio,
                dir,
            } => {
                let args = AddArgs {
                    title,
                    platform,
                    video,
                    audio,
                    dir,
                };
                run_add(&store, &cfg, args).await?;
            }
            CliCommand::Run { jobs } => run_scheduler(store, cfg, jobs).await?,
            CliCommand::Status => run_status(&store).await?,
            CliCommand::Pause { id } => run_control(&store, id, ControlAction::Pause).await?,
            CliCommand::Resume { id } => run_control(&store, id, ControlAction::Resume).await?,
            CliCommand::Cancel { id } => run_control(&store, id, ControlAction::Cancel).await?,
            CliCommand::Remove { id, delete_files } => run_remove(&store, id, delete_files).await?,
            CliCommand::Checksum { .. } | CliCommand::Completions { .. } | CliCommand::Man => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
