//! SQLite ledger backend for local runs and tests

use super::db::DbPool;
use super::ledger::{LedgerError, StateLedger};
use super::types::{
    ManagedResource, RecordAttrs, RecordField, attrs_from_strings, columns, format_record_time,
    parse_record_time,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

/// Ledger stored in one SQLite table
#[derive(Debug, Clone)]
pub struct SqliteLedger {
    pool: DbPool,
    table: String,
}

impl SqliteLedger {
    pub fn new(pool: DbPool, table: &str) -> Self {
        Self {
            pool,
            table: table.to_string(),
        }
    }

    fn missing_table(&self, error: sqlx::Error) -> anyhow::Error {
        match &error {
            sqlx::Error::Database(db) if db.message().contains("no such table") => {
                LedgerError::TableNotFound {
                    table: self.table.clone(),
                }
                .into()
            }
            _ => anyhow::Error::new(error),
        }
    }

    fn to_resource(row: &SqliteRow) -> Option<ManagedResource> {
        let get = |column: &str| row.try_get::<Option<String>, _>(column).ok().flatten();
        Some(ManagedResource {
            solution_name: get(columns::SOLUTION_NAME)?,
            record_id: get(columns::RECORD_ID)?,
            timestamp: parse_record_time(&get(columns::DATE_TIME)?)?,
            attrs: attrs_from_strings(get)?,
        })
    }
}

impl StateLedger for SqliteLedger {
    fn table(&self) -> &str {
        &self.table
    }

    async fn table_exists(&self) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name = ?",
        )
        .bind(&self.table)
        .fetch_one(&self.pool)
        .await
        .context("Failed to check for state table")?;
        Ok(exists)
    }

    async fn create_table(&self) -> Result<()> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{table}" (
                solution_name TEXT NOT NULL,
                record_id TEXT NOT NULL,
                date_time TEXT NOT NULL,
                aws_service TEXT,
                component_state TEXT,
                account TEXT,
                component_region TEXT,
                component_type TEXT,
                component_name TEXT,
                arn TEXT,
                description TEXT,
                PRIMARY KEY (solution_name, record_id)
            )
            "#,
            table = self.table
        ))
        .execute(&self.pool)
        .await
        .context("Failed to create state table")?;

        sqlx::query(&format!(
            r#"CREATE INDEX IF NOT EXISTS "idx_{table}_arn" ON "{table}"(solution_name, arn)"#,
            table = self.table
        ))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find(
        &self,
        partition: &str,
        matching: &[(RecordField, &str)],
    ) -> Result<Option<ManagedResource>> {
        let mut sql = format!(
            r#"SELECT * FROM "{}" WHERE solution_name = ?"#,
            self.table
        );
        for (field, _) in matching {
            sql.push_str(&format!(" AND {} = ?", field.column()));
        }
        sql.push_str(" ORDER BY record_id");

        let mut query = sqlx::query(&sql).bind(partition);
        for (_, value) in matching {
            query = query.bind(*value);
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.missing_table(e))?;

        Ok(rows.iter().find_map(Self::to_resource))
    }

    async fn insert(&self, partition: &str) -> Result<(String, DateTime<Utc>)> {
        let record_id = Uuid::now_v7().to_string();
        let now = Utc::now();

        sqlx::query(&format!(
            r#"INSERT INTO "{}" (solution_name, record_id, date_time) VALUES (?, ?, ?)"#,
            self.table
        ))
        .bind(partition)
        .bind(&record_id)
        .bind(format_record_time(now))
        .execute(&self.pool)
        .await
        .map_err(|e| self.missing_table(e))?;

        Ok((record_id, now))
    }

    async fn update(&self, partition: &str, record_id: &str, attrs: &RecordAttrs) -> Result<()> {
        let pairs = attrs.pairs();
        let assignments: Vec<String> = pairs
            .iter()
            .map(|(column, _)| format!("{column} = ?"))
            .collect();
        let sql = format!(
            r#"UPDATE "{}" SET {}, date_time = ? WHERE solution_name = ? AND record_id = ?"#,
            self.table,
            assignments.join(", ")
        );

        let mut query = sqlx::query(&sql);
        for (_, value) in pairs {
            query = query.bind(value);
        }
        let result = query
            .bind(format_record_time(Utc::now()))
            .bind(partition)
            .bind(record_id)
            .execute(&self.pool)
            .await
            .map_err(|e| self.missing_table(e))?;

        if result.rows_affected() == 0 {
            anyhow::bail!("No ledger record {record_id} in partition {partition}");
        }
        Ok(())
    }

    async fn list(&self, partition: &str) -> Result<Vec<ManagedResource>> {
        let rows = sqlx::query(&format!(
            r#"SELECT * FROM "{}" WHERE solution_name = ? ORDER BY record_id"#,
            self.table
        ))
        .bind(partition)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| self.missing_table(e))?;

        Ok(rows.iter().filter_map(Self::to_resource).collect())
    }
}
