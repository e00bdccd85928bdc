//! Shared AWS configuration context
//!
//! Provides `AwsContext` for loading AWS SDK configuration once and creating
//! service clients from it, plus `SessionCache` which hands out contexts that
//! act inside a governed account through its execution role.

use anyhow::Result;
use aws_config::sts::AssumeRoleProvider;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Shared AWS configuration context for creating service clients.
///
/// # Example
/// ```ignore
/// let aws = AwsContext::new("us-east-1").await;
/// let iam = IamClient::from_context(&aws);
/// let sns = SnsClient::from_context(&aws);
/// ```
#[derive(Clone)]
pub struct AwsContext {
    config: Arc<SdkConfig>,
    region: String,
}

impl AwsContext {
    /// Load AWS configuration for the specified region.
    ///
    /// This loads credentials, region configuration, and other AWS SDK
    /// settings from the environment, config files, and IAM roles.
    pub async fn new(region: &str) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;

        Self {
            config: Arc::new(config),
            region: region.to_string(),
        }
    }

    /// Load a context whose credentials come from assuming `role_arn`.
    ///
    /// Credentials are fetched lazily on the first call and refreshed by the
    /// SDK before they expire.
    pub async fn assume_role(&self, role_arn: &str, session_name: &str, region: &str) -> Self {
        let provider = AssumeRoleProvider::builder(role_arn)
            .session_name(session_name)
            .region(Region::new(region.to_string()))
            .configure(&self.config)
            .build()
            .await;

        let config = aws_config::defaults(BehaviorVersion::latest())
            .credentials_provider(provider)
            .region(Region::new(region.to_string()))
            .load()
            .await;

        Self {
            config: Arc::new(config),
            region: region.to_string(),
        }
    }

    /// Get the underlying SDK config for direct client construction.
    pub fn sdk_config(&self) -> &SdkConfig {
        &self.config
    }

    /// Get the region string.
    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn iam_client(&self) -> aws_sdk_iam::Client {
        aws_sdk_iam::Client::new(self.sdk_config())
    }

    pub fn s3_client(&self) -> aws_sdk_s3::Client {
        aws_sdk_s3::Client::new(self.sdk_config())
    }

    pub fn kms_client(&self) -> aws_sdk_kms::Client {
        aws_sdk_kms::Client::new(self.sdk_config())
    }

    pub fn sns_client(&self) -> aws_sdk_sns::Client {
        aws_sdk_sns::Client::new(self.sdk_config())
    }

    pub fn lambda_client(&self) -> aws_sdk_lambda::Client {
        aws_sdk_lambda::Client::new(self.sdk_config())
    }

    pub fn config_client(&self) -> aws_sdk_config::Client {
        aws_sdk_config::Client::new(self.sdk_config())
    }

    pub fn logs_client(&self) -> aws_sdk_cloudwatchlogs::Client {
        aws_sdk_cloudwatchlogs::Client::new(self.sdk_config())
    }

    pub fn cloudwatch_client(&self) -> aws_sdk_cloudwatch::Client {
        aws_sdk_cloudwatch::Client::new(self.sdk_config())
    }

    pub fn oam_client(&self) -> aws_sdk_oam::Client {
        aws_sdk_oam::Client::new(self.sdk_config())
    }

    pub fn ssm_client(&self) -> aws_sdk_ssm::Client {
        aws_sdk_ssm::Client::new(self.sdk_config())
    }

    pub fn dynamodb_client(&self) -> aws_sdk_dynamodb::Client {
        aws_sdk_dynamodb::Client::new(self.sdk_config())
    }
}

impl std::fmt::Debug for AwsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsContext")
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

/// Build the ARN of a role in an account.
pub fn role_arn(partition: &str, account: &str, role_name: &str) -> String {
    format!("arn:{partition}:iam::{account}:role/{role_name}")
}

/// Per-invocation cache of assumed-role contexts keyed by (account, region).
pub struct SessionCache {
    base: AwsContext,
    partition: String,
    role_name: String,
    session_name: String,
    sessions: Mutex<HashMap<(String, String), AwsContext>>,
}

impl SessionCache {
    pub fn new(base: AwsContext, partition: &str, role_name: &str, session_name: &str) -> Self {
        Self {
            base,
            partition: partition.to_string(),
            role_name: role_name.to_string(),
            session_name: session_name.to_string(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Context acting as the execution role in `account` / `region`.
    pub async fn session(&self, account: &str, region: &str) -> Result<AwsContext> {
        let key = (account.to_string(), region.to_string());
        let mut sessions = self.sessions.lock().await;
        if let Some(ctx) = sessions.get(&key) {
            return Ok(ctx.clone());
        }

        let arn = role_arn(&self.partition, account, &self.role_name);
        debug!(account = %account, region = %region, role = %arn, "Assuming execution role");
        let ctx = self.base.assume_role(&arn, &self.session_name, region).await;
        sessions.insert(key, ctx.clone());
        Ok(ctx)
    }
}

impl std::fmt::Debug for SessionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCache")
            .field("role_name", &self.role_name)
            .finish_non_exhaustive()
    }
}
