//! AWS client modules for the orchestrator
//!
//! This module provides the AWS side of every resource capability:
//! - IAM: Roles, customer-managed policies and attachments
//! - KMS: Alarm topic keys and their aliases
//! - SNS: Topics, topic policies and subscriptions
//! - Lambda / Config: Rule functions, invoke permissions and custom rules
//! - CloudWatch / Logs / OAM: Filters, alarms, dashboards, sinks and links
//! - S3: Code staging
//! - SSM / STS: Prerequisite parameters and account lookup

pub mod account;
pub mod cloudwatch;
pub mod config_rules;
pub mod context;
pub mod error;
pub mod iam;
pub mod kms;
pub mod lambda;
pub mod logs;
pub mod oam;
pub mod provider;
pub mod s3;
pub mod sns;
pub mod ssm;

pub use account::{AccountId, get_current_account_id};
pub use context::{AwsContext, SessionCache, role_arn};
pub use provider::AwsProvider;
pub use sns::SnsPublisher;
pub use ssm::SsmParameters;

// Error handling
pub use error::{AwsError, classify_anyhow_error, classify_aws_error, ignore_not_found};
