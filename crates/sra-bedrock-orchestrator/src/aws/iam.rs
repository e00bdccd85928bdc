//! IAM roles, customer-managed policies and policy attachments

use super::error::{AwsResultExt, classify_sdk_error, ignore_absent, ignore_not_found};
use super::provider::AwsProvider;
use crate::reconcile::kinds::{AttachmentSpec, PolicySpec, RoleSpec};
use crate::reconcile::{Capability, Existing, Scope};
use anyhow::{Context, Result};
use aws_sdk_iam::Client;
use aws_sdk_iam::types::Tag;
use sra_bedrock_common::tags::solution_tags;
use tracing::{debug, info};

/// ARN of a customer-managed policy
pub fn policy_arn(partition: &str, account: &str, name: &str) -> String {
    format!("arn:{partition}:iam::{account}:policy/{name}")
}

/// ARN of an AWS managed policy (`name` may carry a path such as `service-role/`)
pub fn managed_policy_arn(partition: &str, name: &str) -> String {
    format!("arn:{partition}:iam::aws:policy/{name}")
}

fn iam_tags(solution: &str) -> Result<Vec<Tag>> {
    solution_tags(solution)
        .into_iter()
        .map(|(key, value)| {
            Tag::builder()
                .key(key)
                .value(value)
                .build()
                .map_err(|e| anyhow::anyhow!("Failed to build IAM tag: {}", e))
        })
        .collect()
}

async fn client(provider: &AwsProvider, scope: &Scope) -> Result<Client> {
    Ok(provider.context(scope).await?.iam_client())
}

impl Capability<RoleSpec> for AwsProvider {
    async fn find(&self, scope: &Scope, desired: &RoleSpec) -> Result<Option<Existing>> {
        let iam = client(self, scope).await?;
        let output = ignore_not_found(iam.get_role().role_name(&desired.name).send().await)
            .aws_context("Failed to get IAM role")?;

        Ok(output
            .and_then(|o| o.role)
            .map(|role| Existing::new(role.arn, role.role_name)))
    }

    async fn create(&self, scope: &Scope, desired: &RoleSpec) -> Result<Existing> {
        let iam = client(self, scope).await?;
        info!(role = %desired.name, account = %scope.account, "Creating IAM role");

        let result = iam
            .create_role()
            .role_name(&desired.name)
            .assume_role_policy_document(&desired.trust_policy)
            .description(&desired.description)
            .set_tags(Some(iam_tags(self.solution())?))
            .send()
            .await;

        // Roles are global, so region consumers running side by side race here.
        let output = match result {
            Ok(output) => output,
            Err(e) if classify_sdk_error(&e).is_already_exists() => {
                debug!(role = %desired.name, "Role created concurrently, adopting it");
                return Capability::<RoleSpec>::find(self, scope, desired)
                    .await?
                    .context("IAM role vanished after a create conflict");
            }
            Err(e) => return Err(e).aws_context("Failed to create IAM role"),
        };

        let role = output.role.context("CreateRole returned no role")?;
        Ok(Existing::new(role.arn, role.role_name))
    }

    async fn delete(&self, scope: &Scope, existing: &Existing) -> Result<()> {
        let iam = client(self, scope).await?;
        info!(role = %existing.id, account = %scope.account, "Deleting IAM role");

        ignore_absent(iam.delete_role().role_name(&existing.id).send().await)
            .aws_context("Failed to delete IAM role")?;
        Ok(())
    }
}

impl Capability<PolicySpec> for AwsProvider {
    async fn find(&self, scope: &Scope, desired: &PolicySpec) -> Result<Option<Existing>> {
        let iam = client(self, scope).await?;
        let arn = policy_arn(self.partition(), &scope.account, &desired.name);
        let output = ignore_not_found(iam.get_policy().policy_arn(&arn).send().await)
            .aws_context("Failed to get IAM policy")?;

        Ok(output
            .and_then(|o| o.policy)
            .map(|_| Existing::new(arn.clone(), arn)))
    }

    async fn create(&self, scope: &Scope, desired: &PolicySpec) -> Result<Existing> {
        let iam = client(self, scope).await?;
        info!(policy = %desired.name, account = %scope.account, "Creating IAM policy");

        let result = iam
            .create_policy()
            .policy_name(&desired.name)
            .policy_document(&desired.document)
            .description(&desired.description)
            .set_tags(Some(iam_tags(self.solution())?))
            .send()
            .await;

        let output = match result {
            Ok(output) => output,
            Err(e) if classify_sdk_error(&e).is_already_exists() => {
                debug!(policy = %desired.name, "Policy created concurrently, adopting it");
                return Capability::<PolicySpec>::find(self, scope, desired)
                    .await?
                    .context("IAM policy vanished after a create conflict");
            }
            Err(e) => return Err(e).aws_context("Failed to create IAM policy"),
        };

        let arn = output
            .policy
            .and_then(|p| p.arn)
            .context("CreatePolicy returned no ARN")?;
        Ok(Existing::new(arn.clone(), arn))
    }

    async fn delete(&self, scope: &Scope, existing: &Existing) -> Result<()> {
        let iam = client(self, scope).await?;
        info!(policy = %existing.arn, "Deleting IAM policy");

        // Non-default versions block deletion.
        let versions = ignore_not_found(
            iam.list_policy_versions()
                .policy_arn(&existing.arn)
                .send()
                .await,
        )
        .aws_context("Failed to list IAM policy versions")?;

        for version in versions.iter().flat_map(|o| o.versions()) {
            if version.is_default_version {
                continue;
            }
            let Some(version_id) = version.version_id() else {
                continue;
            };
            debug!(policy = %existing.arn, version = %version_id, "Deleting policy version");
            ignore_absent(
                iam.delete_policy_version()
                    .policy_arn(&existing.arn)
                    .version_id(version_id)
                    .send()
                    .await,
            )
            .aws_context("Failed to delete IAM policy version")?;
        }

        ignore_absent(iam.delete_policy().policy_arn(&existing.arn).send().await)
            .aws_context("Failed to delete IAM policy")?;
        Ok(())
    }
}

impl Capability<AttachmentSpec> for AwsProvider {
    async fn find(&self, scope: &Scope, desired: &AttachmentSpec) -> Result<Option<Existing>> {
        let iam = client(self, scope).await?;
        let mut marker: Option<String> = None;

        loop {
            let page = ignore_not_found(
                iam.list_attached_role_policies()
                    .role_name(&desired.role)
                    .set_marker(marker.take())
                    .send()
                    .await,
            )
            .aws_context("Failed to list attached role policies")?;

            // The role itself is missing.
            let Some(page) = page else {
                return Ok(None);
            };

            let attached = page
                .attached_policies()
                .iter()
                .any(|p| p.policy_arn() == Some(desired.policy_arn.as_str()));
            if attached {
                return Ok(Some(Existing::new(&desired.policy_arn, &desired.role)));
            }

            match page.marker {
                Some(next) if page.is_truncated => marker = Some(next),
                _ => return Ok(None),
            }
        }
    }

    async fn create(&self, scope: &Scope, desired: &AttachmentSpec) -> Result<Existing> {
        let iam = client(self, scope).await?;
        debug!(role = %desired.role, policy = %desired.policy_arn, "Attaching policy");

        iam.attach_role_policy()
            .role_name(&desired.role)
            .policy_arn(&desired.policy_arn)
            .send()
            .await
            .aws_context("Failed to attach policy to role")?;

        Ok(Existing::new(&desired.policy_arn, &desired.role))
    }

    async fn delete(&self, scope: &Scope, existing: &Existing) -> Result<()> {
        let iam = client(self, scope).await?;
        debug!(role = %existing.id, policy = %existing.arn, "Detaching policy");

        ignore_absent(
            iam.detach_role_policy()
                .role_name(&existing.id)
                .policy_arn(&existing.arn)
                .send()
                .await,
        )
        .aws_context("Failed to detach policy from role")?;
        Ok(())
    }
}
