//! KMS keys (found through their alias) and key aliases

use super::error::{AwsResultExt, ignore_absent, ignore_not_found};
use super::provider::AwsProvider;
use crate::reconcile::kinds::{AliasSpec, KeySpec};
use crate::reconcile::{Capability, Existing, Scope};
use anyhow::{Context, Result};
use aws_sdk_kms::Client;
use aws_sdk_kms::types::{KeyState, Tag};
use sra_bedrock_common::defaults::KEY_DELETION_WINDOW_DAYS;
use sra_bedrock_common::tags::solution_tags;
use tracing::{debug, info};

const DEFAULT_POLICY: &str = "default";

fn kms_tags(solution: &str) -> Result<Vec<Tag>> {
    solution_tags(solution)
        .into_iter()
        .map(|(key, value)| {
            Tag::builder()
                .tag_key(key)
                .tag_value(value)
                .build()
                .map_err(|e| anyhow::anyhow!("Failed to build KMS tag: {}", e))
        })
        .collect()
}

async fn client(provider: &AwsProvider, scope: &Scope) -> Result<Client> {
    Ok(provider.context(scope).await?.kms_client())
}

impl Capability<KeySpec> for AwsProvider {
    async fn find(&self, scope: &Scope, desired: &KeySpec) -> Result<Option<Existing>> {
        let kms = client(self, scope).await?;
        let described = ignore_not_found(kms.describe_key().key_id(&desired.alias).send().await)
            .aws_context("Failed to describe KMS key")?;

        let Some(metadata) = described.and_then(|o| o.key_metadata) else {
            return Ok(None);
        };
        if metadata.key_state() == Some(&KeyState::PendingDeletion) {
            debug!(alias = %desired.alias, "Key behind alias is pending deletion");
            return Ok(None);
        }

        let policy = kms
            .get_key_policy()
            .key_id(&metadata.key_id)
            .policy_name(DEFAULT_POLICY)
            .send()
            .await
            .aws_context("Failed to get KMS key policy")?
            .policy;

        let arn = metadata.arn.unwrap_or_default();
        Ok(Some(Existing::new(arn, metadata.key_id).with_body(policy)))
    }

    async fn create(&self, scope: &Scope, desired: &KeySpec) -> Result<Existing> {
        let kms = client(self, scope).await?;
        info!(alias = %desired.alias, account = %scope.account, region = %scope.region, "Creating KMS key");

        let output = kms
            .create_key()
            .policy(&desired.policy)
            .description(&desired.description)
            .set_tags(Some(kms_tags(self.solution())?))
            .send()
            .await
            .aws_context("Failed to create KMS key")?;

        let metadata = output.key_metadata.context("CreateKey returned no metadata")?;
        Ok(Existing::new(metadata.arn.unwrap_or_default(), metadata.key_id)
            .with_body(Some(desired.policy.clone())))
    }

    async fn update(&self, scope: &Scope, existing: &Existing, desired: &KeySpec) -> Result<()> {
        let kms = client(self, scope).await?;
        info!(key = %existing.id, "Updating KMS key policy");

        kms.put_key_policy()
            .key_id(&existing.id)
            .policy_name(DEFAULT_POLICY)
            .policy(&desired.policy)
            .send()
            .await
            .aws_context("Failed to update KMS key policy")?;
        Ok(())
    }

    async fn delete(&self, scope: &Scope, existing: &Existing) -> Result<()> {
        let kms = client(self, scope).await?;
        info!(key = %existing.id, window_days = KEY_DELETION_WINDOW_DAYS, "Scheduling KMS key deletion");

        ignore_absent(
            kms.schedule_key_deletion()
                .key_id(&existing.id)
                .pending_window_in_days(KEY_DELETION_WINDOW_DAYS)
                .send()
                .await,
        )
        .aws_context("Failed to schedule KMS key deletion")?;
        Ok(())
    }
}

impl Capability<AliasSpec> for AwsProvider {
    async fn find(&self, scope: &Scope, desired: &AliasSpec) -> Result<Option<Existing>> {
        let kms = client(self, scope).await?;
        let mut marker: Option<String> = None;

        loop {
            let page = kms
                .list_aliases()
                .set_marker(marker.take())
                .send()
                .await
                .aws_context("Failed to list KMS aliases")?;

            if let Some(alias) = page
                .aliases()
                .iter()
                .find(|a| a.alias_name() == Some(desired.alias.as_str()))
            {
                let arn = alias.alias_arn().unwrap_or_default();
                let target = alias.target_key_id().map(str::to_string);
                return Ok(Some(Existing::new(arn, &desired.alias).with_body(target)));
            }

            match page.next_marker {
                Some(next) if page.truncated => marker = Some(next),
                _ => return Ok(None),
            }
        }
    }

    async fn create(&self, scope: &Scope, desired: &AliasSpec) -> Result<Existing> {
        let kms = client(self, scope).await?;
        debug!(alias = %desired.alias, key = %desired.target_key_id, "Creating KMS alias");

        kms.create_alias()
            .alias_name(&desired.alias)
            .target_key_id(&desired.target_key_id)
            .send()
            .await
            .aws_context("Failed to create KMS alias")?;

        let arn = format!(
            "arn:{}:kms:{}:{}:{}",
            self.partition(),
            scope.region,
            scope.account,
            desired.alias
        );
        Ok(Existing::new(arn, &desired.alias).with_body(Some(desired.target_key_id.clone())))
    }

    async fn update(&self, scope: &Scope, existing: &Existing, desired: &AliasSpec) -> Result<()> {
        let kms = client(self, scope).await?;
        info!(
            alias = %existing.id,
            from = existing.body.as_deref().unwrap_or("-"),
            to = %desired.target_key_id,
            "Pointing KMS alias at new key"
        );

        kms.update_alias()
            .alias_name(&existing.id)
            .target_key_id(&desired.target_key_id)
            .send()
            .await
            .aws_context("Failed to update KMS alias")?;
        Ok(())
    }

    async fn delete(&self, scope: &Scope, existing: &Existing) -> Result<()> {
        let kms = client(self, scope).await?;
        debug!(alias = %existing.id, "Deleting KMS alias");

        ignore_absent(kms.delete_alias().alias_name(&existing.id).send().await)
            .aws_context("Failed to delete KMS alias")?;
        Ok(())
    }
}
