//! AWS Config custom Lambda rules

use super::error::{AwsResultExt, ignore_absent, ignore_not_found};
use super::provider::AwsProvider;
use crate::reconcile::kinds::ConfigRuleSpec;
use crate::reconcile::{Capability, Existing, Scope};
use anyhow::{Context, Result};
use aws_sdk_config::Client;
use aws_sdk_config::types::{
    ConfigRule, EvaluationMode, EvaluationModeConfiguration, EventSource,
    MaximumExecutionFrequency, MessageType, Owner, Source, SourceDetail, Tag,
};
use sra_bedrock_common::tags::solution_tags;
use tracing::info;

async fn client(provider: &AwsProvider, scope: &Scope) -> Result<Client> {
    Ok(provider.context(scope).await?.config_client())
}

fn build_rule(desired: &ConfigRuleSpec) -> Result<ConfigRule> {
    let frequency = MaximumExecutionFrequency::from(desired.frequency.as_str());

    let source = Source::builder()
        .owner(Owner::CustomLambda)
        .source_identifier(&desired.function_arn)
        .source_details(
            SourceDetail::builder()
                .event_source(EventSource::AwsConfig)
                .message_type(MessageType::ScheduledNotification)
                .maximum_execution_frequency(frequency.clone())
                .build(),
        )
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build config rule source: {}", e))?;

    let rule = ConfigRule::builder()
        .config_rule_name(&desired.name)
        .description(&desired.name)
        .source(source)
        .input_parameters(&desired.input_parameters)
        .maximum_execution_frequency(frequency)
        .evaluation_modes(
            EvaluationModeConfiguration::builder()
                .mode(EvaluationMode::Detective)
                .build(),
        )
        .build();
    Ok(rule)
}

impl AwsProvider {
    async fn put_rule(&self, config: &Client, desired: &ConfigRuleSpec) -> Result<()> {
        let mut request = config.put_config_rule().config_rule(build_rule(desired)?);
        for (key, value) in solution_tags(self.solution()) {
            request = request.tags(Tag::builder().key(key).value(value).build());
        }
        request.send().await.aws_context("Failed to put config rule")?;
        Ok(())
    }

    async fn describe_rule(&self, config: &Client, name: &str) -> Result<Option<Existing>> {
        let output = ignore_not_found(
            config
                .describe_config_rules()
                .config_rule_names(name)
                .send()
                .await,
        )
        .aws_context("Failed to describe config rule")?;

        Ok(output
            .and_then(|o| o.config_rules.unwrap_or_default().into_iter().next())
            .map(|rule| {
                Existing::new(rule.config_rule_arn.unwrap_or_default(), name)
                    .with_body(rule.input_parameters)
            }))
    }
}

impl Capability<ConfigRuleSpec> for AwsProvider {
    async fn find(&self, scope: &Scope, desired: &ConfigRuleSpec) -> Result<Option<Existing>> {
        let config = client(self, scope).await?;
        self.describe_rule(&config, &desired.name).await
    }

    async fn create(&self, scope: &Scope, desired: &ConfigRuleSpec) -> Result<Existing> {
        let config = client(self, scope).await?;
        info!(rule = %desired.name, account = %scope.account, region = %scope.region, "Creating config rule");

        self.put_rule(&config, desired).await?;
        self.describe_rule(&config, &desired.name)
            .await?
            .context("Config rule missing right after creation")
    }

    async fn update(&self, scope: &Scope, _existing: &Existing, desired: &ConfigRuleSpec) -> Result<()> {
        let config = client(self, scope).await?;
        info!(rule = %desired.name, "Updating config rule input parameters");
        self.put_rule(&config, desired).await
    }

    async fn delete(&self, scope: &Scope, existing: &Existing) -> Result<()> {
        let config = client(self, scope).await?;
        info!(rule = %existing.id, "Deleting config rule");

        ignore_absent(
            config
                .delete_config_rule()
                .config_rule_name(&existing.id)
                .send()
                .await,
        )
        .aws_context("Failed to delete config rule")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_rule() {
        let rule = build_rule(&ConfigRuleSpec {
            name: "sra-bedrock-check-guardrails".into(),
            function_arn: "arn:aws:lambda:us-east-1:111111111111:function:sra-bedrock-check-guardrails".into(),
            input_parameters: r#"{"content_filters":"true"}"#.into(),
            frequency: "One_Hour".into(),
        })
        .unwrap();

        assert_eq!(rule.config_rule_name(), Some("sra-bedrock-check-guardrails"));
        assert_eq!(
            rule.maximum_execution_frequency(),
            Some(&MaximumExecutionFrequency::OneHour)
        );
        assert_eq!(rule.input_parameters(), Some(r#"{"content_filters":"true"}"#));
    }
}
