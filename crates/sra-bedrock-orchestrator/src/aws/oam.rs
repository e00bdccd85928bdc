//! Observability access manager sinks, sink policies and links

use super::error::{AwsResultExt, ignore_absent, ignore_not_found};
use super::provider::AwsProvider;
use crate::reconcile::kinds::{LinkSpec, SinkPolicySpec, SinkSpec};
use crate::reconcile::{Capability, Existing, Scope};
use anyhow::{Context, Result};
use aws_sdk_oam::Client;
use aws_sdk_oam::types::ResourceType;
use sra_bedrock_common::tags::solution_tags;
use tracing::{debug, info};

async fn client(provider: &AwsProvider, scope: &Scope) -> Result<Client> {
    Ok(provider.context(scope).await?.oam_client())
}

impl Capability<SinkSpec> for AwsProvider {
    async fn find(&self, scope: &Scope, desired: &SinkSpec) -> Result<Option<Existing>> {
        let oam = client(self, scope).await?;
        let mut next_token: Option<String> = None;

        loop {
            let page = oam
                .list_sinks()
                .set_next_token(next_token.take())
                .send()
                .await
                .aws_context("Failed to list OAM sinks")?;

            if let Some(sink) = page.items().iter().find(|s| s.name() == Some(desired.name.as_str())) {
                let arn = sink.arn().unwrap_or_default();
                return Ok(Some(Existing::new(arn, &desired.name)));
            }

            match page.next_token {
                Some(token) => next_token = Some(token),
                None => return Ok(None),
            }
        }
    }

    async fn create(&self, scope: &Scope, desired: &SinkSpec) -> Result<Existing> {
        let oam = client(self, scope).await?;
        info!(sink = %desired.name, account = %scope.account, region = %scope.region, "Creating OAM sink");

        let mut request = oam.create_sink().name(&desired.name);
        for (key, value) in solution_tags(self.solution()) {
            request = request.tags(key, value);
        }
        let arn = request
            .send()
            .await
            .aws_context("Failed to create OAM sink")?
            .arn
            .context("CreateSink returned no ARN")?;
        Ok(Existing::new(arn, &desired.name))
    }

    async fn delete(&self, scope: &Scope, existing: &Existing) -> Result<()> {
        let oam = client(self, scope).await?;
        info!(sink = %existing.arn, "Deleting OAM sink");

        ignore_absent(oam.delete_sink().identifier(&existing.arn).send().await)
            .aws_context("Failed to delete OAM sink")?;
        Ok(())
    }
}

impl Capability<SinkPolicySpec> for AwsProvider {
    async fn find(&self, scope: &Scope, desired: &SinkPolicySpec) -> Result<Option<Existing>> {
        let oam = client(self, scope).await?;
        let output = ignore_not_found(
            oam.get_sink_policy()
                .sink_identifier(&desired.sink_arn)
                .send()
                .await,
        )
        .aws_context("Failed to get OAM sink policy")?;

        Ok(output.and_then(|o| o.policy).map(|policy| {
            Existing::new(&desired.sink_arn, &desired.sink_name).with_body(Some(policy))
        }))
    }

    async fn create(&self, scope: &Scope, desired: &SinkPolicySpec) -> Result<Existing> {
        let existing = Existing::new(&desired.sink_arn, &desired.sink_name)
            .with_body(Some(desired.policy.clone()));
        <Self as Capability<SinkPolicySpec>>::update(self, scope, &existing, desired).await?;
        Ok(existing)
    }

    async fn update(&self, scope: &Scope, _existing: &Existing, desired: &SinkPolicySpec) -> Result<()> {
        let oam = client(self, scope).await?;
        debug!(sink = %desired.sink_arn, "Putting OAM sink policy");

        oam.put_sink_policy()
            .sink_identifier(&desired.sink_arn)
            .policy(&desired.policy)
            .send()
            .await
            .aws_context("Failed to put OAM sink policy")?;
        Ok(())
    }

    async fn delete(&self, _scope: &Scope, existing: &Existing) -> Result<()> {
        // Sink policies go away with their sink.
        debug!(sink = %existing.arn, "Leaving sink policy to sink deletion");
        Ok(())
    }
}

impl Capability<LinkSpec> for AwsProvider {
    async fn find(&self, scope: &Scope, desired: &LinkSpec) -> Result<Option<Existing>> {
        let oam = client(self, scope).await?;
        let mut next_token: Option<String> = None;

        loop {
            let page = oam
                .list_links()
                .set_next_token(next_token.take())
                .send()
                .await
                .aws_context("Failed to list OAM links")?;

            if let Some(link) = page
                .items()
                .iter()
                .find(|l| l.sink_arn() == Some(desired.sink_arn.as_str()))
            {
                let arn = link.arn().unwrap_or_default();
                return Ok(Some(Existing::new(arn, arn)));
            }

            match page.next_token {
                Some(token) => next_token = Some(token),
                None => return Ok(None),
            }
        }
    }

    async fn create(&self, scope: &Scope, desired: &LinkSpec) -> Result<Existing> {
        let oam = client(self, scope).await?;
        info!(sink = %desired.sink_arn, account = %scope.account, region = %scope.region, "Creating OAM link");

        let mut request = oam
            .create_link()
            .label_template(&desired.label_template)
            .sink_identifier(&desired.sink_arn)
            .set_resource_types(Some(
                desired
                    .resource_types
                    .iter()
                    .map(|t| ResourceType::from(t.as_str()))
                    .collect(),
            ));
        for (key, value) in solution_tags(self.solution()) {
            request = request.tags(key, value);
        }

        let arn = request
            .send()
            .await
            .aws_context("Failed to create OAM link")?
            .arn
            .context("CreateLink returned no ARN")?;
        Ok(Existing::new(arn.clone(), arn))
    }

    async fn delete(&self, scope: &Scope, existing: &Existing) -> Result<()> {
        let oam = client(self, scope).await?;
        info!(link = %existing.arn, account = %scope.account, region = %scope.region, "Deleting OAM link");

        ignore_absent(oam.delete_link().identifier(&existing.arn).send().await)
            .aws_context("Failed to delete OAM link")?;
        Ok(())
    }
}
