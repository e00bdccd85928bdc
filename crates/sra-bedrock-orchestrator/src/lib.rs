//! sra-bedrock-orchestrator - SRA Bedrock multi-account baseline
//!
//! This crate reconciles the Bedrock security baseline (config rules,
//! CloudTrail metric alarms, central observability) across the accounts and
//! regions of an organization, driven by stack lifecycle events and the
//! per-region messages it fans out to itself.

pub mod aws;
pub mod config;
pub mod deploy;
pub mod error;
pub mod fanout;
pub mod params;
pub mod prereq;
pub mod reconcile;
pub mod router;
pub mod state;
pub mod templates;
pub mod wait;

#[cfg(test)]
mod testing;
