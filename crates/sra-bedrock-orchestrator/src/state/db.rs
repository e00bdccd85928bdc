//! Local SQLite database location and connection setup

use anyhow::{Context, Result};
use directories::ProjectDirs;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::fs;
use std::path::{Path, PathBuf};

/// Database connection pool type alias
pub type DbPool = SqlitePool;

/// Get the state database path
fn get_db_path() -> Result<PathBuf> {
    let proj_dirs = ProjectDirs::from("", "", "sra-bedrock-org")
        .context("Failed to get project directories")?;

    let state_dir = proj_dirs.data_local_dir();
    fs::create_dir_all(state_dir).context("Failed to create state directory")?;

    Ok(state_dir.join("state.db"))
}

/// Open the default local state database, creating it if needed
pub async fn open_db() -> Result<DbPool> {
    open_db_at(&get_db_path()?).await
}

/// Open a state database at an explicit path, creating it if needed
pub async fn open_db_at(path: &Path) -> Result<DbPool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open state database at {}", path.display()))
}
