//! Enumerations stored in managed-resource records
//!
//! The string forms are what gets persisted, so they must remain stable
//! once records exist in a ledger table.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a managed resource
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum ComponentState {
    /// Provisioned and owned by the solution
    #[default]
    Implemented,
    /// Torn down; the record is kept for history
    Removed,
}

/// AWS service owning a managed resource
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum AwsService {
    Iam,
    Kms,
    Sns,
    Cloudwatch,
    Config,
    Lambda,
    Dynamodb,
    S3,
}

/// Kind of component recorded in the ledger
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum ComponentType {
    Role,
    Policy,
    Key,
    Alias,
    Topic,
    Rule,
    Lambda,
    Table,
    Link,
    Sink,
    Dashboard,
    Filter,
    Alarm,
}
