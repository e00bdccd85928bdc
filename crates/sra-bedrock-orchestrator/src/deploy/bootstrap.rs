//! Code staging and the configuration topic

use crate::aws::s3::staged_code_key;
use crate::config::RunContext;
use crate::reconcile::kinds::{CodeArchiveSpec, PermissionSpec, SubscriptionSpec, TopicSpec};
use crate::reconcile::{Existing, Provider, Reconciler};
use crate::state::StateLedger;
use anyhow::Result;
use sra_bedrock_common::defaults::configuration_topic_name;
use tracing::{info, warn};

const SNS_PRINCIPAL: &str = "sns.amazonaws.com";
const SNS_INVOKE_SID: &str = "sns-invoke";
const LAMBDA_PROTOCOL: &str = "lambda";

/// Make sure the repository archive is in the staging bucket
pub(super) async fn stage_code<P: Provider, L: StateLedger>(
    rec: &mut Reconciler<'_, P, L>,
    ctx: &RunContext,
) -> Result<()> {
    let url = &ctx.params.globals.repo_zip_url;
    let archive = CodeArchiveSpec {
        bucket: ctx.staging_bucket().to_string(),
        object_key: staged_code_key(ctx.solution(), url)?,
        source_url: url.clone(),
    };
    rec.ensure(&ctx.management_scope(), &archive).await?;
    Ok(())
}

/// Configuration topic in the management account, subscribed by the handler.
///
/// Returns the topic so fan-out can publish to it.
pub(super) async fn configuration_topic<P: Provider, L: StateLedger>(
    rec: &mut Reconciler<'_, P, L>,
    ctx: &RunContext,
) -> Result<Existing> {
    let scope = ctx.management_scope();
    let name = configuration_topic_name(ctx.solution());
    let topic = rec
        .ensure(
            &scope,
            &TopicSpec {
                name: name.clone(),
                kms_key_id: None,
                description: "fan-out topic for region configuration".to_string(),
            },
        )
        .await?;

    let Some(function_arn) = ctx.function_arn.as_deref() else {
        warn!(topic = %name, "Handler function is unknown; not subscribing it to the configuration topic");
        return Ok(topic);
    };

    let permission =
        PermissionSpec::new(function_arn, SNS_INVOKE_SID, SNS_PRINCIPAL).source_arn(&topic.arn);
    rec.ensure_under(&scope, &permission, &topic).await?;

    let subscription = SubscriptionSpec::new(&name, &topic.arn, LAMBDA_PROTOCOL, function_arn);
    rec.ensure_under(&scope, &subscription, &topic).await?;

    info!(topic = %topic.arn, planned = topic.is_planned(), "Configuration topic ready");
    Ok(topic)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FanOutMode;
    use crate::config::test_support::{MANAGEMENT, run_context};
    use crate::reconcile::{PolicyCompare, Scope};
    use crate::state::SqliteLedger;
    use crate::testing::{Call, FakeProvider};
    use sra_bedrock_common::ResourceKind;
    use sra_bedrock_test_utils::{EventBuilder, open_test_db};

    async fn ledger() -> SqliteLedger {
        let ledger = SqliteLedger::new(open_test_db().await.unwrap(), "sra_state");
        ledger.create_table().await.unwrap();
        ledger
    }

    #[tokio::test]
    async fn test_staging_skipped_when_present() {
        let provider = FakeProvider::default();
        let ledger = ledger().await;
        let ctx = run_context(EventBuilder::create().dry_run(false), FanOutMode::Inline);
        let mut rec = Reconciler::new(&provider, &ledger, ctx.solution(), false, PolicyCompare::Exact);

        stage_code(&mut rec, &ctx).await.unwrap();
        stage_code(&mut rec, &ctx).await.unwrap();

        assert_eq!(provider.count(Call::Create), 1);
        let info = rec.report().deployment_info();
        assert_eq!(info.action_count, 1);
        assert_eq!(info.resources_deployed, 0);
    }

    #[tokio::test]
    async fn test_topic_subscribes_handler() {
        let provider = FakeProvider::default();
        let ledger = ledger().await;
        let ctx = run_context(EventBuilder::create().dry_run(false), FanOutMode::Topic);
        let mut rec = Reconciler::new(&provider, &ledger, ctx.solution(), false, PolicyCompare::Exact);

        let topic = configuration_topic(&mut rec, &ctx).await.unwrap();

        assert!(!topic.is_planned());
        let scope = Scope::new(MANAGEMENT, "us-east-1");
        assert!(provider.contains(ResourceKind::Topic, &scope, "sra-bedrock-org-configuration"));
        assert!(provider.contains(
            ResourceKind::Subscription,
            &scope,
            "sra-bedrock-org-configuration/lambda"
        ));
        assert_eq!(provider.count(Call::Create), 3);
    }

    #[tokio::test]
    async fn test_unknown_handler_only_creates_topic() {
        let provider = FakeProvider::default();
        let ledger = ledger().await;
        let mut ctx = run_context(EventBuilder::create().dry_run(false), FanOutMode::Topic);
        ctx.function_arn = None;
        let mut rec = Reconciler::new(&provider, &ledger, ctx.solution(), false, PolicyCompare::Exact);

        configuration_topic(&mut rec, &ctx).await.unwrap();

        assert_eq!(provider.count(Call::Create), 1);
    }
}
