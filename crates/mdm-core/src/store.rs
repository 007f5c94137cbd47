//! SQLite-backed task store.
//!
//! The database file lives under the XDG state directory
//! (`~/.local/state/mdm/tasks.db`). The scheduler writes to it through a
//! background task, never from its control path.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::path::{Path, PathBuf};

use crate::task::{Progress, StreamRefs, Task, TaskId, TaskSettings, TaskStatus};

/// Percent-encode a path for use in a sqlite:// URI so spaces and special chars don't break parsing.
fn path_to_sqlite_uri(path: &Path) -> String {
    let s = path.to_string_lossy();
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            ' ' => out.push_str("%20"),
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            '&' => out.push_str("%26"),
            c => out.push(c),
        }
    }
    format!("sqlite://{}", out)
}

/// Default database path: `$XDG_STATE_HOME/mdm/tasks.db`.
pub fn default_db_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("mdm")?;
    Ok(xdg_dirs.get_state_home().join("tasks.db"))
}

#[derive(Clone)]
pub struct TaskStore {
    pool: Pool<Sqlite>,
}

impl TaskStore {
    /// Open (or create) the default task database.
    pub async fn open_default() -> Result<Self> {
        Self::open_at(default_db_path()?).await
    }

    /// Open (or create) the database at `path`. Creates parent dirs if needed.
    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let uri = path_to_sqlite_uri(path) + "?mode=rwc";
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(&uri)
            .await
            .with_context(|| format!("failed to open {}", path.display()))?;
        let store = TaskStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// In-memory database (tests, dry runs).
    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = TaskStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        // `streams_json` and `settings_json` hold the serde forms of
        // StreamRefs and TaskSettings.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                platform TEXT NOT NULL,
                target_dir TEXT NOT NULL,
                streams_json TEXT NOT NULL,
                status TEXT NOT NULL,
                total_bytes INTEGER NOT NULL DEFAULT 0,
                downloaded_bytes INTEGER NOT NULL DEFAULT 0,
                settings_json TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                output_path TEXT,
                last_error TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert or replace the full row for `task`.
    pub async fn upsert(&self, task: &Task) -> Result<()> {
        let streams_json = serde_json::to_string(&task.streams)?;
        let settings_json = serde_json::to_string(&task.settings)?;
        sqlx::query(
            r#"
            INSERT INTO tasks (
                id, title, platform, target_dir, streams_json, status,
                total_bytes, downloaded_bytes, settings_json,
                created_at, updated_at, output_path, last_error
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                platform = excluded.platform,
                target_dir = excluded.target_dir,
                streams_json = excluded.streams_json,
                status = excluded.status,
                total_bytes = excluded.total_bytes,
                downloaded_bytes = excluded.downloaded_bytes,
                settings_json = excluded.settings_json,
                updated_at = excluded.updated_at,
                output_path = excluded.output_path,
                last_error = excluded.last_error
            "#,
        )
        .bind(task.id)
        .bind(&task.title)
        .bind(&task.platform)
        .bind(task.target_dir.to_string_lossy().into_owned())
        .bind(streams_json)
        .bind(task.status.as_str())
        .bind(task.progress.total_bytes as i64)
        .bind(task.progress.downloaded_bytes as i64)
        .bind(settings_json)
        .bind(task.created_at)
        .bind(task.updated_at)
        .bind(
            task.output_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
        )
        .bind(task.last_error.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove(&self, id: TaskId) -> Result<()> {
        sqlx::query("DELETE FROM tasks WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_status(&self, id: TaskId, status: TaskStatus) -> Result<()> {
        sqlx::query("UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(status.as_str())
            .bind(crate::task::unix_millis())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// All tasks in creation order.
    pub async fn load_all(&self) -> Result<Vec<Task>> {
        let rows = sqlx::query("SELECT * FROM tasks ORDER BY created_at ASC, id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(task_from_row).collect()
    }

    pub async fn get(&self, id: TaskId) -> Result<Option<Task>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(task_from_row).transpose()
    }

    /// Highest id in use, or 0.
    pub async fn max_id(&self) -> Result<TaskId> {
        let row = sqlx::query("SELECT COALESCE(MAX(id), 0) AS max_id FROM tasks")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("max_id"))
    }

    /// Rows left `running` by a crash become `queued`. Returns how many.
    pub async fn recover_running(&self) -> Result<u64> {
        let r = sqlx::query("UPDATE tasks SET status = 'queued', updated_at = ?1 WHERE status = 'running'")
            .bind(crate::task::unix_millis())
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected())
    }
}

fn task_from_row(row: &SqliteRow) -> Result<Task> {
    let streams_json: String = row.get("streams_json");
    let settings_json: String = row.get("settings_json");
    let status: String = row.get("status");
    let target_dir: String = row.get("target_dir");
    let output_path: Option<String> = row.get("output_path");
    let total_bytes: i64 = row.get("total_bytes");
    let downloaded_bytes: i64 = row.get("downloaded_bytes");

    Ok(Task {
        id: row.get("id"),
        title: row.get("title"),
        platform: row.get("platform"),
        target_dir: PathBuf::from(target_dir),
        streams: serde_json::from_str::<StreamRefs>(&streams_json).context("streams_json")?,
        status: TaskStatus::from_str(&status),
        progress: Progress {
            total_bytes: total_bytes.max(0) as u64,
            downloaded_bytes: downloaded_bytes.max(0) as u64,
            speed: 0.0,
        },
        settings: serde_json::from_str::<TaskSettings>(&settings_json).unwrap_or_default(),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        output_path: output_path.map(PathBuf::from),
        last_error: row.get("last_error"),
    })
}
