//! CloudWatch Logs metric filters

use super::error::{AwsResultExt, ignore_absent, ignore_not_found};
use super::provider::AwsProvider;
use crate::reconcile::kinds::MetricFilterSpec;
use crate::reconcile::{Capability, Existing, Scope};
use anyhow::{Context, Result};
use aws_sdk_cloudwatchlogs::Client;
use aws_sdk_cloudwatchlogs::types::MetricTransformation;
use tracing::{debug, info};

/// ARN identifying a metric filter (log group plus filter name)
fn metric_filter_arn(partition: &str, scope: &Scope, log_group: &str, name: &str) -> String {
    format!(
        "arn:{partition}:logs:{}:{}:log-group:{log_group}:metric-filter:{name}",
        scope.region, scope.account
    )
}

/// Split a metric filter ARN back into (log group, filter name)
fn parse_metric_filter_arn(arn: &str) -> Option<(&str, &str)> {
    let (_, rest) = arn.split_once(":log-group:")?;
    rest.rsplit_once(":metric-filter:")
}

async fn client(provider: &AwsProvider, scope: &Scope) -> Result<Client> {
    Ok(provider.context(scope).await?.logs_client())
}

impl AwsProvider {
    async fn put_metric_filter(&self, logs: &Client, desired: &MetricFilterSpec) -> Result<()> {
        let transformation = MetricTransformation::builder()
            .metric_name(&desired.metric_name)
            .metric_namespace(&desired.namespace)
            .metric_value(&desired.value)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build metric transformation: {}", e))?;

        logs.put_metric_filter()
            .log_group_name(&desired.log_group)
            .filter_name(&desired.name)
            .filter_pattern(&desired.pattern)
            .metric_transformations(transformation)
            .send()
            .await
            .aws_context("Failed to put metric filter")?;
        Ok(())
    }
}

impl Capability<MetricFilterSpec> for AwsProvider {
    async fn find(&self, scope: &Scope, desired: &MetricFilterSpec) -> Result<Option<Existing>> {
        let logs = client(self, scope).await?;
        let output = ignore_not_found(
            logs.describe_metric_filters()
                .log_group_name(&desired.log_group)
                .filter_name_prefix(&desired.name)
                .send()
                .await,
        )
        .aws_context("Failed to describe metric filters")?;

        let found = output
            .and_then(|o| o.metric_filters)
            .unwrap_or_default()
            .into_iter()
            .find(|f| f.filter_name() == Some(desired.name.as_str()));

        Ok(found.map(|filter| {
            let arn = metric_filter_arn(self.partition(), scope, &desired.log_group, &desired.name);
            Existing::new(arn, &desired.name).with_body(filter.filter_pattern)
        }))
    }

    async fn create(&self, scope: &Scope, desired: &MetricFilterSpec) -> Result<Existing> {
        let logs = client(self, scope).await?;
        info!(
            filter = %desired.name,
            log_group = %desired.log_group,
            account = %scope.account,
            region = %scope.region,
            "Creating metric filter"
        );

        self.put_metric_filter(&logs, desired).await?;
        let arn = metric_filter_arn(self.partition(), scope, &desired.log_group, &desired.name);
        Ok(Existing::new(arn, &desired.name).with_body(Some(desired.pattern.clone())))
    }

    async fn update(&self, scope: &Scope, _existing: &Existing, desired: &MetricFilterSpec) -> Result<()> {
        let logs = client(self, scope).await?;
        debug!(filter = %desired.name, "Updating metric filter pattern");
        self.put_metric_filter(&logs, desired).await
    }

    async fn delete(&self, scope: &Scope, existing: &Existing) -> Result<()> {
        let (log_group, name) =
            parse_metric_filter_arn(&existing.arn).context("Malformed metric filter ARN")?;
        let logs = client(self, scope).await?;
        info!(filter = %name, log_group = %log_group, "Deleting metric filter");

        ignore_absent(
            logs.delete_metric_filter()
                .log_group_name(log_group)
                .filter_name(name)
                .send()
                .await,
        )
        .aws_context("Failed to delete metric filter")?;
        Ok(())
    }
}
