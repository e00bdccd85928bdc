//! Ledger contract shared by the DynamoDB and SQLite backends

use super::types::{ManagedResource, RecordAttrs, RecordField};
use anyhow::Result;
use chrono::{DateTime, Utc};
use sra_bedrock_common::ComponentState;
use thiserror::Error;
use tracing::debug;

/// Errors with a meaning beyond "the backend failed"
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The ledger table has not been created (fatal: reconcile cannot record)
    #[error("State table '{table}' does not exist")]
    TableNotFound { table: String },
}

/// Durable record store of managed resources.
///
/// Records are partitioned by solution name and identified by an opaque
/// `record_id` that stays stable across updates.
#[allow(async_fn_in_trait)]
pub trait StateLedger: Send + Sync {
    /// Name of the backing table
    fn table(&self) -> &str;

    async fn table_exists(&self) -> Result<bool>;

    /// Create the backing table and wait until it accepts writes
    async fn create_table(&self) -> Result<()>;

    /// First record in `partition` whose fields equal every criterion
    async fn find(
        &self,
        partition: &str,
        matching: &[(RecordField, &str)],
    ) -> Result<Option<ManagedResource>>;

    /// Insert a placeholder record and return its new identity
    async fn insert(&self, partition: &str) -> Result<(String, DateTime<Utc>)>;

    /// Overwrite a record's attributes and refresh its timestamp
    async fn update(&self, partition: &str, record_id: &str, attrs: &RecordAttrs) -> Result<()>;

    /// Every populated record in `partition`
    async fn list(&self, partition: &str) -> Result<Vec<ManagedResource>>;
}

/// Upsert the record for `attrs.arn`: reuse the record id when one exists,
/// mint one otherwise, then write the attributes.
pub async fn record_resource<L: StateLedger>(
    ledger: &L,
    partition: &str,
    attrs: &RecordAttrs,
) -> Result<String> {
    let record_id = match ledger.find(partition, &[(RecordField::Arn, &attrs.arn)]).await? {
        Some(existing) => existing.record_id,
        None => {
            let (record_id, _) = ledger.insert(partition).await?;
            debug!(arn = %attrs.arn, record_id = %record_id, "Minted ledger record");
            record_id
        }
    };
    ledger.update(partition, &record_id, attrs).await?;
    Ok(record_id)
}

/// Soft-delete the record for `arn`. Returns false when no record exists.
pub async fn mark_removed<L: StateLedger>(ledger: &L, partition: &str, arn: &str) -> Result<bool> {
    let Some(existing) = ledger.find(partition, &[(RecordField::Arn, arn)]).await? else {
        return Ok(false);
    };
    let attrs = RecordAttrs {
        component_state: ComponentState::Removed,
        ..existing.attrs
    };
    ledger.update(partition, &existing.record_id, &attrs).await?;
    Ok(true)
}
