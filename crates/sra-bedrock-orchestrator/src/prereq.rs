//! Landing-zone prerequisites published by the SRA common solution

use crate::error::BaselineError;
use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info};

pub const GOVERNED_REGIONS_PARAMETER: &str = "/sra/regions/customer-control-tower-regions";
pub const SECURITY_ACCOUNT_PARAMETER: &str = "/sra/control-tower/audit-account-id";
pub const ORGANIZATION_ID_PARAMETER: &str = "/sra/control-tower/organization-id";
pub const STAGING_BUCKET_PARAMETER: &str = "/sra/staging-s3-bucket-name";

/// Read access to a parameter store
#[allow(async_fn_in_trait)]
#[cfg_attr(test, mockall::automock)]
pub trait ParameterSource: Send + Sync {
    /// Value of `name`, or `None` when it does not exist
    async fn get_parameter(&self, name: &str) -> Result<Option<String>>;
}

/// Values every phase needs from the landing zone
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Prerequisites {
    pub governed_regions: Vec<String>,
    /// Audit account hosting the sink, dashboard and ledger
    pub security_account: String,
    pub organization_id: String,
    pub staging_bucket: String,
}

async fn required<S: ParameterSource>(source: &S, name: &str) -> Result<String> {
    match source.get_parameter(name).await? {
        Some(value) if !value.trim().is_empty() => {
            debug!(parameter = %name, "Found prerequisite parameter");
            Ok(value)
        }
        _ => Err(BaselineError::PrerequisiteMissing {
            parameter: name.to_string(),
        }
        .into()),
    }
}

impl Prerequisites {
    /// Load every prerequisite, failing on the first missing one
    pub async fn load<S: ParameterSource>(source: &S) -> Result<Self> {
        let regions = required(source, GOVERNED_REGIONS_PARAMETER).await?;
        let security_account = required(source, SECURITY_ACCOUNT_PARAMETER).await?;
        let organization_id = required(source, ORGANIZATION_ID_PARAMETER).await?;
        let staging_bucket = required(source, STAGING_BUCKET_PARAMETER).await?;

        let governed_regions = regions
            .split(',')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(String::from)
            .collect();

        let prereqs = Self {
            governed_regions,
            security_account,
            organization_id,
            staging_bucket,
        };
        info!(
            security_account = %prereqs.security_account,
            staging_bucket = %prereqs.staging_bucket,
            regions = ?prereqs.governed_regions,
            "Loaded landing-zone prerequisites"
        );
        Ok(prereqs)
    }
}
