//! CLI command handlers, one file per command.

mod add;
mod checksum;
mod control;
mod docs;
mod remove;
mod run;
mod status;

pub use add::{run_add, AddArgs};
pub use checksum::run_checksum;
pub use control::run_control;
pub use docs::{run_completions, run_man};
pub use remove::run_remove;
pub use run::run_scheduler;
pub use status::run_status;
