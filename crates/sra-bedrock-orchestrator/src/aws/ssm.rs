//! SSM Parameter Store lookups for landing-zone prerequisites

use super::context::AwsContext;
use super::error::{AwsResultExt, ignore_not_found};
use crate::prereq::ParameterSource;
use anyhow::{Context, Result};
use aws_sdk_ssm::Client;
use tracing::debug;

/// Parameter Store reader in the management account
#[derive(Debug, Clone)]
pub struct SsmParameters {
    client: Client,
}

impl SsmParameters {
    pub fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.ssm_client(),
        }
    }
}

impl ParameterSource for SsmParameters {
    async fn get_parameter(&self, name: &str) -> Result<Option<String>> {
        let output = ignore_not_found(self.client.get_parameter().name(name).send().await)
            .aws_context(format!("Failed to read SSM parameter {name}"))?;

        let value = output.and_then(|o| o.parameter).and_then(|p| p.value);
        debug!(parameter = %name, found = value.is_some(), "Read SSM parameter");
        Ok(value)
    }
}
