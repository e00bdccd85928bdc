//! Shared test utilities for the SRA Bedrock orchestrator
//!
//! This crate provides common test helpers that can be used across
//! multiple test modules without circular dependencies.
//!
//! ## Modules
//!
//! - [`aws`]: AWS region detection and unique test identifiers
//! - [`db`]: In-memory SQLite pools for ledger tests
//! - [`fixtures`]: Lifecycle events and resource properties

pub mod aws;
pub mod db;
pub mod fixtures;

// Re-export commonly used items
pub use aws::{get_test_region, test_run_id};
pub use db::open_test_db;
pub use fixtures::{EventBuilder, check_spec, fanout_event, filter_spec, observability_spec};
