//! SNS topics, topic access policies and subscriptions

use super::context::AwsContext;
use super::error::{AwsResultExt, ignore_absent, ignore_not_found};
use super::provider::AwsProvider;
use crate::fanout::{PublishEntry, Publisher};
use crate::reconcile::kinds::{SubscriptionSpec, TopicPolicySpec, TopicSpec};
use crate::reconcile::{Capability, Existing, Scope};
use anyhow::{Context, Result};
use aws_sdk_sns::Client;
use aws_sdk_sns::types::{PublishBatchRequestEntry, Tag};
use sra_bedrock_common::tags::solution_tags;
use tracing::{debug, info};

const POLICY_ATTRIBUTE: &str = "Policy";
const KMS_KEY_ATTRIBUTE: &str = "KmsMasterKeyId";

/// Subscriptions awaiting endpoint confirmation report this instead of an ARN
const PENDING_CONFIRMATION: &str = "PendingConfirmation";

/// ARN of a topic in the scope's account and region
pub fn topic_arn(partition: &str, scope: &Scope, name: &str) -> String {
    format!("arn:{partition}:sns:{}:{}:{name}", scope.region, scope.account)
}

fn sns_tags(solution: &str) -> Result<Vec<Tag>> {
    solution_tags(solution)
        .into_iter()
        .map(|(key, value)| {
            Tag::builder()
                .key(key)
                .value(value)
                .build()
                .map_err(|e| anyhow::anyhow!("Failed to build SNS tag: {}", e))
        })
        .collect()
}

async fn client(provider: &AwsProvider, scope: &Scope) -> Result<Client> {
    Ok(provider.context(scope).await?.sns_client())
}

/// Attributes of a topic, or `None` when it does not exist
async fn topic_attributes(
    sns: &Client,
    arn: &str,
) -> Result<Option<std::collections::HashMap<String, String>>> {
    let output = ignore_not_found(sns.get_topic_attributes().topic_arn(arn).send().await)
        .aws_context("Failed to get SNS topic attributes")?;
    Ok(output.map(|o| o.attributes.unwrap_or_default()))
}

impl Capability<TopicSpec> for AwsProvider {
    async fn find(&self, scope: &Scope, desired: &TopicSpec) -> Result<Option<Existing>> {
        let sns = client(self, scope).await?;
        let arn = topic_arn(self.partition(), scope, &desired.name);
        Ok(topic_attributes(&sns, &arn)
            .await?
            .map(|_| Existing::new(arn.clone(), arn)))
    }

    async fn create(&self, scope: &Scope, desired: &TopicSpec) -> Result<Existing> {
        let sns = client(self, scope).await?;
        info!(topic = %desired.name, account = %scope.account, region = %scope.region, "Creating SNS topic");

        let mut request = sns
            .create_topic()
            .name(&desired.name)
            .set_tags(Some(sns_tags(self.solution())?));
        if let Some(key) = &desired.kms_key_id {
            request = request.attributes(KMS_KEY_ATTRIBUTE, key);
        }

        let arn = request
            .send()
            .await
            .aws_context("Failed to create SNS topic")?
            .topic_arn
            .context("CreateTopic returned no ARN")?;
        Ok(Existing::new(arn.clone(), arn))
    }

    async fn delete(&self, scope: &Scope, existing: &Existing) -> Result<()> {
        let sns = client(self, scope).await?;
        info!(topic = %existing.arn, "Deleting SNS topic");

        ignore_absent(sns.delete_topic().topic_arn(&existing.arn).send().await)
            .aws_context("Failed to delete SNS topic")?;
        Ok(())
    }
}

impl Capability<TopicPolicySpec> for AwsProvider {
    async fn find(&self, scope: &Scope, desired: &TopicPolicySpec) -> Result<Option<Existing>> {
        let sns = client(self, scope).await?;
        Ok(topic_attributes(&sns, &desired.topic_arn).await?.map(|mut attrs| {
            Existing::new(&desired.topic_arn, &desired.topic_name)
                .with_body(attrs.remove(POLICY_ATTRIBUTE))
        }))
    }

    async fn create(&self, scope: &Scope, desired: &TopicPolicySpec) -> Result<Existing> {
        let existing = Existing::new(&desired.topic_arn, &desired.topic_name)
            .with_body(Some(desired.policy.clone()));
        <Self as Capability<TopicPolicySpec>>::update(self, scope, &existing, desired).await?;
        Ok(existing)
    }

    async fn update(&self, scope: &Scope, _existing: &Existing, desired: &TopicPolicySpec) -> Result<()> {
        let sns = client(self, scope).await?;
        debug!(topic = %desired.topic_arn, "Setting SNS topic policy");

        sns.set_topic_attributes()
            .topic_arn(&desired.topic_arn)
            .attribute_name(POLICY_ATTRIBUTE)
            .attribute_value(&desired.policy)
            .send()
            .await
            .aws_context("Failed to set SNS topic policy")?;
        Ok(())
    }

    async fn delete(&self, _scope: &Scope, existing: &Existing) -> Result<()> {
        // Topic policies go away with their topic.
        debug!(topic = %existing.arn, "Leaving topic policy to topic deletion");
        Ok(())
    }
}

impl Capability<SubscriptionSpec> for AwsProvider {
    async fn find(&self, scope: &Scope, desired: &SubscriptionSpec) -> Result<Option<Existing>> {
        let sns = client(self, scope).await?;
        let mut next_token: Option<String> = None;

        loop {
            let page = ignore_not_found(
                sns.list_subscriptions_by_topic()
                    .topic_arn(&desired.topic_arn)
                    .set_next_token(next_token.take())
                    .send()
                    .await,
            )
            .aws_context("Failed to list SNS subscriptions")?;

            let Some(page) = page else {
                return Ok(None);
            };

            let found = page.subscriptions().iter().find(|s| {
                s.protocol() == Some(desired.protocol.as_str())
                    && s.endpoint() == Some(desired.endpoint.as_str())
            });
            if let Some(subscription) = found {
                let arn = subscription.subscription_arn().unwrap_or(PENDING_CONFIRMATION);
                return Ok(Some(Existing::new(arn, arn)));
            }

            match page.next_token {
                Some(token) => next_token = Some(token),
                None => return Ok(None),
            }
        }
    }

    async fn create(&self, scope: &Scope, desired: &SubscriptionSpec) -> Result<Existing> {
        let sns = client(self, scope).await?;
        info!(
            topic = %desired.topic_arn,
            protocol = %desired.protocol,
            "Subscribing endpoint to SNS topic"
        );

        let arn = sns
            .subscribe()
            .topic_arn(&desired.topic_arn)
            .protocol(&desired.protocol)
            .endpoint(&desired.endpoint)
            .send()
            .await
            .aws_context("Failed to subscribe to SNS topic")?
            .subscription_arn
            .unwrap_or_else(|| PENDING_CONFIRMATION.to_string());
        Ok(Existing::new(arn.clone(), arn))
    }

    async fn delete(&self, scope: &Scope, existing: &Existing) -> Result<()> {
        if !existing.arn.starts_with("arn:") {
            debug!("Unconfirmed subscription lapses on its own");
            return Ok(());
        }
        let sns = client(self, scope).await?;
        debug!(subscription = %existing.arn, "Unsubscribing");

        ignore_absent(sns.unsubscribe().subscription_arn(&existing.arn).send().await)
            .aws_context("Failed to unsubscribe from SNS topic")?;
        Ok(())
    }
}

/// Publishes region messages to the configuration topic
#[derive(Debug, Clone)]
pub struct SnsPublisher {
    client: Client,
}

impl SnsPublisher {
    pub fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.sns_client(),
        }
    }
}

impl Publisher for SnsPublisher {
    async fn publish_batch(&self, topic_arn: &str, entries: Vec<PublishEntry>) -> Result<()> {
        let total = entries.len();
        let entries = entries
            .into_iter()
            .map(|entry| {
                PublishBatchRequestEntry::builder()
                    .id(entry.id)
                    .subject(entry.subject)
                    .message(entry.message)
                    .build()
                    .map_err(|e| anyhow::anyhow!("Failed to build SNS batch entry: {}", e))
            })
            .collect::<Result<Vec<_>>>()?;

        let output = self
            .client
            .publish_batch()
            .topic_arn(topic_arn)
            .set_publish_batch_request_entries(Some(entries))
            .send()
            .await
            .aws_context("Failed to publish region messages")?;

        let failed = output.failed();
        if !failed.is_empty() {
            let ids: Vec<&str> = failed.iter().map(|f| f.id()).collect();
            anyhow::bail!(
                "SNS rejected {} of {} region messages: {}",
                failed.len(),
                total,
                ids.join(", ")
            );
        }
        debug!(topic = %topic_arn, published = total, "Published message batch");
        Ok(())
    }
}
