//! Database test utilities
//!
//! Provides in-memory SQLite database setup for testing.
//!
//! Note: Schema setup is done by the orchestrator's SQLite ledger since the
//! table definition lives there.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

/// Database connection pool type alias
pub type TestDbPool = SqlitePool;

/// Create an in-memory SQLite connection pool for testing.
///
/// This creates a fresh database with no schema.
///
/// # Example
///
/// ```ignore
/// use sra_bedrock_test_utils::db::open_test_db;
///
/// #[tokio::test]
/// async fn test_ledger() {
///     let pool = open_test_db().await.unwrap();
///     let ledger = SqliteLedger::new(pool, "sra_state");
///     ledger.create_table().await.unwrap();
/// }
/// ```
pub async fn open_test_db() -> Result<TestDbPool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1) // Single connection for in-memory to maintain state
        .connect_with(options)
        .await?;

    Ok(pool)
}
