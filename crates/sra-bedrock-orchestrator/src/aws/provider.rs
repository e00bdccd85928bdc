//! The AWS-backed capability provider
//!
//! Capabilities for each service live in the sibling modules (`iam`, `kms`,
//! `sns`, ...) as `impl Capability<Spec> for AwsProvider` blocks. They all
//! reach the governed account through the provider's session cache.

use super::context::{AwsContext, SessionCache};
use crate::reconcile::Scope;
use anyhow::Result;

/// Provider that talks to AWS through the execution role of each account
#[derive(Debug)]
pub struct AwsProvider {
    sessions: SessionCache,
    partition: String,
    solution: String,
    http: reqwest::Client,
}

impl AwsProvider {
    pub fn new(sessions: SessionCache, partition: &str, solution: &str) -> Self {
        Self {
            sessions,
            partition: partition.to_string(),
            solution: solution.to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Context acting inside the scope's account and region
    pub async fn context(&self, scope: &Scope) -> Result<AwsContext> {
        self.sessions.session(&scope.account, &scope.region).await
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    /// Solution name used for tagging
    pub fn solution(&self) -> &str {
        &self.solution
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }
}
