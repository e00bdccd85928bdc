//! Ledger of managed resources
//!
//! Every resource the orchestrator provisions gets a record keyed by its
//! ARN. Records are upserted on each live pass and soft-deleted on teardown.
//! DynamoDB is the production backend; SQLite serves local runs and tests.

mod cli;
mod db;
mod dynamo;
mod ledger;
mod sqlite;
mod types;

pub use cli::{list_records, render_records};
pub use db::{DbPool, open_db, open_db_at};
pub use dynamo::DynamoLedger;
pub use ledger::{LedgerError, StateLedger, mark_removed, record_resource};
pub use sqlite::SqliteLedger;
pub use types::{ManagedResource, RecordAttrs, RecordField};
