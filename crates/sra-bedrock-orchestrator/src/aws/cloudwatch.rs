//! CloudWatch metric alarms and dashboards

use super::error::{AwsResultExt, ignore_absent, ignore_not_found};
use super::provider::AwsProvider;
use crate::reconcile::kinds::{AlarmSpec, DashboardSpec};
use crate::reconcile::{Capability, Existing, Scope};
use anyhow::Result;
use aws_sdk_cloudwatch::Client;
use aws_sdk_cloudwatch::types::{ComparisonOperator, Statistic, Tag};
use sra_bedrock_common::defaults::{
    ALARM_EVALUATION_PERIODS, ALARM_PERIOD_SECS, ALARM_THRESHOLD, ALARM_TREAT_MISSING_DATA,
};
use sra_bedrock_common::tags::solution_tags;
use tracing::{debug, info};

async fn client(provider: &AwsProvider, scope: &Scope) -> Result<Client> {
    Ok(provider.context(scope).await?.cloudwatch_client())
}

fn cloudwatch_tags(solution: &str) -> Vec<Tag> {
    solution_tags(solution)
        .into_iter()
        .map(|(key, value)| Tag::builder().key(key).value(value).build())
        .collect()
}

impl Capability<AlarmSpec> for AwsProvider {
    async fn find(&self, scope: &Scope, desired: &AlarmSpec) -> Result<Option<Existing>> {
        let cloudwatch = client(self, scope).await?;
        let output = cloudwatch
            .describe_alarms()
            .alarm_names(&desired.name)
            .send()
            .await
            .aws_context("Failed to describe CloudWatch alarms")?;

        Ok(output
            .metric_alarms
            .unwrap_or_default()
            .into_iter()
            .next()
            .map(|alarm| Existing::new(alarm.alarm_arn.unwrap_or_default(), &desired.name)))
    }

    async fn create(&self, scope: &Scope, desired: &AlarmSpec) -> Result<Existing> {
        let cloudwatch = client(self, scope).await?;
        info!(alarm = %desired.name, account = %scope.account, region = %scope.region, "Creating CloudWatch alarm");

        cloudwatch
            .put_metric_alarm()
            .alarm_name(&desired.name)
            .alarm_description(format!("Alarm for {} metric", desired.metric_name))
            .metric_name(&desired.metric_name)
            .namespace(&desired.namespace)
            .statistic(Statistic::Sum)
            .period(ALARM_PERIOD_SECS)
            .evaluation_periods(ALARM_EVALUATION_PERIODS)
            .threshold(ALARM_THRESHOLD)
            .comparison_operator(ComparisonOperator::GreaterThanThreshold)
            .treat_missing_data(ALARM_TREAT_MISSING_DATA)
            .actions_enabled(true)
            .alarm_actions(&desired.topic_arn)
            .set_tags(Some(cloudwatch_tags(self.solution())))
            .send()
            .await
            .aws_context("Failed to create CloudWatch alarm")?;

        let arn = format!(
            "arn:{}:cloudwatch:{}:{}:alarm:{}",
            self.partition(),
            scope.region,
            scope.account,
            desired.name
        );
        Ok(Existing::new(arn, &desired.name))
    }

    async fn delete(&self, scope: &Scope, existing: &Existing) -> Result<()> {
        let cloudwatch = client(self, scope).await?;
        info!(alarm = %existing.id, "Deleting CloudWatch alarm");

        ignore_absent(cloudwatch.delete_alarms().alarm_names(&existing.id).send().await)
            .aws_context("Failed to delete CloudWatch alarm")?;
        Ok(())
    }
}

impl AwsProvider {
    async fn put_dashboard(&self, cloudwatch: &Client, desired: &DashboardSpec) -> Result<()> {
        let output = cloudwatch
            .put_dashboard()
            .dashboard_name(&desired.name)
            .dashboard_body(&desired.body)
            .send()
            .await
            .aws_context("Failed to put CloudWatch dashboard")?;

        for message in output.dashboard_validation_messages() {
            debug!(dashboard = %desired.name, message = ?message.message(), "Dashboard validation message");
        }
        Ok(())
    }
}

impl Capability<DashboardSpec> for AwsProvider {
    async fn find(&self, scope: &Scope, desired: &DashboardSpec) -> Result<Option<Existing>> {
        let cloudwatch = client(self, scope).await?;
        let output = ignore_not_found(
            cloudwatch
                .get_dashboard()
                .dashboard_name(&desired.name)
                .send()
                .await,
        )
        .aws_context("Failed to get CloudWatch dashboard")?;

        Ok(output.map(|dashboard| {
            Existing::new(dashboard.dashboard_arn.unwrap_or_default(), &desired.name)
                .with_body(dashboard.dashboard_body)
        }))
    }

    async fn create(&self, scope: &Scope, desired: &DashboardSpec) -> Result<Existing> {
        let cloudwatch = client(self, scope).await?;
        info!(dashboard = %desired.name, account = %scope.account, "Creating CloudWatch dashboard");

        self.put_dashboard(&cloudwatch, desired).await?;
        let arn = format!(
            "arn:{}:cloudwatch::{}:dashboard/{}",
            self.partition(),
            scope.account,
            desired.name
        );
        Ok(Existing::new(arn, &desired.name).with_body(Some(desired.body.clone())))
    }

    async fn update(&self, scope: &Scope, _existing: &Existing, desired: &DashboardSpec) -> Result<()> {
        let cloudwatch = client(self, scope).await?;
        info!(dashboard = %desired.name, "Updating CloudWatch dashboard");
        self.put_dashboard(&cloudwatch, desired).await
    }

    async fn delete(&self, scope: &Scope, existing: &Existing) -> Result<()> {
        let cloudwatch = client(self, scope).await?;
        info!(dashboard = %existing.id, "Deleting CloudWatch dashboard");

        ignore_absent(
            cloudwatch
                .delete_dashboards()
                .dashboard_names(&existing.id)
                .send()
                .await,
        )
        .aws_context("Failed to delete CloudWatch dashboard")?;
        Ok(())
    }
}
