//! sra-bedrock-common - Shared types and constants
//!
//! This crate provides the vocabulary shared by the orchestrator and its
//! test helpers, without any AWS SDK dependencies to keep it lightweight.
//!
//! ## Modules
//!
//! - [`defaults`]: Solution-wide names and fixed resource settings
//! - [`ledger`]: Enumerations stored in managed-resource records
//! - [`resource_kind`]: The resource catalog and its teardown ordering
//! - [`tags`]: Tag constants applied to every created resource

pub mod defaults;
pub mod ledger;
pub mod resource_kind;
pub mod tags;

// Re-export commonly used types
pub use ledger::{AwsService, ComponentState, ComponentType};
pub use resource_kind::ResourceKind;

/// Format used for run start/finish stamps in handler responses.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format a UTC timestamp the way handler responses report it.
pub fn format_timestamp(time: chrono::DateTime<chrono::Utc>) -> String {
    time.format(TIMESTAMP_FORMAT).to_string()
}
