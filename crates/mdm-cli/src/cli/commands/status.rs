//! `mdm status` – show all tasks.

use anyhow::Result;
use mdm_core::store::TaskStore;
use mdm_core::task::Task;

fn progress_cell(task: &Task) -> String {
    if task.progress.total_bytes == 0 {
        return "-".to_string();
    }
    format!(
        "{:.1}/{:.1} MiB",
        task.progress.downloaded_bytes as f64 / 1_048_576.0,
        task.progress.total_bytes as f64 / 1_048_576.0
    )
}

pub async fn run_status(store: &TaskStore) -> Result<()> {
    let tasks = store.load_all().await?;
    if tasks.is_empty() {
        println!("No tasks in database.");
        return Ok(());
    }
    println!("{:<6} {:<9} {:<20} {}", "ID", "STATUS", "PROGRESS", "TITLE");
    for t in tasks {
        println!(
            "{:<6} {:<9} {:<20} {}",
            t.id,
            t.status.as_str(),
            progress_cell(&t),
            t.title
        );
        if let Some(path) = &t.output_path {
            println!("{:<6} -> {}", "", path.display());
        }
        if let Some(err) = &t.last_error {
            println!("{:<6} !! {}", "", err);
        }
    }
    Ok(())
}
