//! Cross-account telemetry sharing into the security account

use crate::aws::iam::managed_policy_arn;
use crate::config::RunContext;
use crate::reconcile::kinds::{AttachmentSpec, LinkSpec, RoleSpec, SinkPolicySpec, SinkSpec};
use crate::reconcile::{Existing, Provider, Reconciler, Scope};
use crate::state::StateLedger;
use crate::templates;
use anyhow::Result;
use sra_bedrock_common::defaults::{
    CROSS_ACCOUNT_POLICIES, CROSS_ACCOUNT_ROLE, LINK_LABEL_TEMPLATE, LINK_RESOURCE_TYPES, SINK_NAME,
};
use tracing::{info, instrument};

/// Accounts that share telemetry: the bedrock accounts plus management
pub(crate) fn sharing_accounts(ctx: &RunContext) -> Vec<String> {
    ctx.target_accounts(&ctx.params.observability.bedrock_accounts)
}

/// Regions that share telemetry, defaulting to the requested regions
pub(crate) fn sharing_regions(ctx: &RunContext) -> &[String] {
    let regions = &ctx.params.observability.regions;
    if regions.is_empty() {
        &ctx.params.globals.regions
    } else {
        regions
    }
}

/// Sink, sink policy, and a sharing role plus link per account and region
#[instrument(skip_all, fields(security_account = %ctx.security_account()))]
pub(super) async fn reconcile<P: Provider, L: StateLedger>(
    rec: &mut Reconciler<'_, P, L>,
    ctx: &RunContext,
) -> Result<()> {
    let security = ctx.security_scope();
    let sink = rec
        .ensure(
            &security,
            &SinkSpec {
                name: SINK_NAME.to_string(),
            },
        )
        .await?;
    rec.ensure_under(
        &security,
        &SinkPolicySpec {
            sink_name: SINK_NAME.to_string(),
            sink_arn: sink.arn.clone(),
            policy: templates::sink_policy(ctx.organization_id())?,
        },
        &sink,
    )
    .await?;

    let trust_policy = templates::cross_account_trust_policy(&ctx.partition, ctx.security_account())?;
    let regions = sharing_regions(ctx);
    for account in sharing_accounts(ctx) {
        let role = ensure_sharing_role(rec, ctx, &Scope::new(&account, &ctx.home_region), &trust_policy)
            .await?;
        for region in regions {
            ensure_link(rec, &Scope::new(&account, region), &sink, &role).await?;
        }
    }

    info!(sink = %sink.arn, regions = regions.len(), "Central observability reconciled");
    Ok(())
}

async fn ensure_sharing_role<P: Provider, L: StateLedger>(
    rec: &mut Reconciler<'_, P, L>,
    ctx: &RunContext,
    scope: &Scope,
    trust_policy: &str,
) -> Result<Existing> {
    let role = rec
        .ensure(
            scope,
            &RoleSpec {
                name: CROSS_ACCOUNT_ROLE.to_string(),
                trust_policy: trust_policy.to_string(),
                description: "lets the security account read telemetry".to_string(),
            },
        )
        .await?;
    for policy in CROSS_ACCOUNT_POLICIES {
        let attachment = AttachmentSpec::new(CROSS_ACCOUNT_ROLE, &managed_policy_arn(&ctx.partition, policy));
        rec.ensure_under(scope, &attachment, &role).await?;
    }
    Ok(role)
}

async fn ensure_link<P: Provider, L: StateLedger>(
    rec: &mut Reconciler<'_, P, L>,
    scope: &Scope,
    sink: &Existing,
    role: &Existing,
) -> Result<()> {
    let link = LinkSpec {
        sink_name: SINK_NAME.to_string(),
        sink_arn: sink.arn.clone(),
        label_template: LINK_LABEL_TEMPLATE.to_string(),
        resource_types: LINK_RESOURCE_TYPES.iter().map(|t| t.to_string()).collect(),
    };
    // A link cannot exist while its sink or sharing role is only planned
    let parent = if sink.is_planned() { sink } else { role };
    rec.ensure_under(scope, &link, parent).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FanOutMode;
    use crate::config::test_support::{MANAGEMENT, SECURITY, run_context};
    use crate::reconcile::PolicyCompare;
    use crate::state::SqliteLedger;
    use crate::testing::{Call, FakeProvider};
    use sra_bedrock_common::ResourceKind;
    use sra_bedrock_test_utils::{EventBuilder, observability_spec, open_test_db};

    fn observability_event() -> EventBuilder {
        EventBuilder::create().dry_run(false).property(
            "SRA-BEDROCK-CENTRAL-OBSERVABILITY",
            observability_spec(true, &["111111111111"], &["us-east-1", "us-west-2"]),
        )
    }

    async fn ledger() -> SqliteLedger {
        let ledger = SqliteLedger::new(open_test_db().await.unwrap(), "sra_state");
        ledger.create_table().await.unwrap();
        ledger
    }

    #[tokio::test]
    async fn test_links_for_every_account_and_region() {
        let provider = FakeProvider::default();
        let ledger = ledger().await;
        let ctx = run_context(observability_event(), FanOutMode::Inline);
        let mut rec = Reconciler::new(&provider, &ledger, ctx.solution(), false, PolicyCompare::Exact);

        reconcile(&mut rec, &ctx).await.unwrap();

        assert!(provider.contains(ResourceKind::Sink, &Scope::new(SECURITY, "us-east-1"), SINK_NAME));
        for account in ["111111111111", MANAGEMENT] {
            assert!(provider.contains(
                ResourceKind::Role,
                &Scope::new(account, "us-east-1"),
                CROSS_ACCOUNT_ROLE
            ));
            for region in ["us-east-1", "us-west-2"] {
                assert!(provider.contains(ResourceKind::Link, &Scope::new(account, region), SINK_NAME));
            }
        }
        // one role per account, not per region
        let role_creates = provider
            .log()
            .iter()
            .filter(|c| c.call == Call::Create && c.kind == ResourceKind::Role)
            .count();
        assert_eq!(role_creates, 2);
    }

    #[tokio::test]
    async fn test_sink_policy_drift_is_updated() {
        let provider = FakeProvider::default();
        let ledger = ledger().await;
        let ctx = run_context(observability_event(), FanOutMode::Inline);
        let security = Scope::new(SECURITY, "us-east-1");
        let sink = provider.seed(&security, &SinkSpec { name: SINK_NAME.into() });
        provider.seed(
            &security,
            &SinkPolicySpec {
                sink_name: SINK_NAME.into(),
                sink_arn: sink.arn.clone(),
                policy: templates::sink_policy("o-old").unwrap(),
            },
        );

        let mut rec = Reconciler::new(&provider, &ledger, ctx.solution(), false, PolicyCompare::Exact);
        reconcile(&mut rec, &ctx).await.unwrap();

        assert_eq!(provider.count(Call::Update), 1);
        assert!(
            rec.report()
                .live_run_actions()
                .contains_key("sra-oam-sink_333333333333_us-east-1_OAMSinkPolicyUpdate")
        );
    }

    #[test]
    fn test_regions_default_to_requested() {
        let builder = EventBuilder::create()
            .regions(&["eu-west-1"])
            .property(
                "SRA-BEDROCK-CENTRAL-OBSERVABILITY",
                observability_spec(true, &[], &[]),
            );
        let ctx = run_context(builder, FanOutMode::Inline);
        assert_eq!(sharing_regions(&ctx), ["eu-west-1"]);
        assert_eq!(sharing_accounts(&ctx), [MANAGEMENT]);
    }
}
