//! Phase-ordered deployment of the baseline
//!
//! A create (or update) runs the phases in dependency order: ledger table,
//! code staging, configuration topic, per-region fan-out, central
//! observability and the dashboard. Per-region work goes through
//! [`reconcile_region`], which is shared by the inline path and the fan-out
//! message consumer.

mod alarms;
mod bootstrap;
mod dashboard;
mod observability;
mod rules;
pub mod teardown;

use crate::config::RunContext;
use crate::fanout::{self, Publisher};
use crate::reconcile::{Existing, Provider, Reconciler, Scope};
use crate::state::StateLedger;
use anyhow::Result;
use std::collections::HashMap;
use tracing::{debug, info, instrument};

pub use teardown::{TeardownItem, plan_teardown, teardown};

/// Run every create phase in order
#[instrument(skip_all, fields(solution = %ctx.solution(), dry_run = ctx.dry_run()))]
pub async fn create<P: Provider, L: StateLedger, B: Publisher>(
    rec: &mut Reconciler<'_, P, L>,
    ctx: &RunContext,
    publisher: &B,
) -> Result<()> {
    info!("Deploying baseline");

    rec.ensure_state_table(&ctx.security_scope(), &ctx.state_table_arn())
        .await?;
    bootstrap::stage_code(rec, ctx).await?;
    let topic = bootstrap::configuration_topic(rec, ctx).await?;

    fanout::dispatch(rec, ctx, publisher, &topic).await?;

    if ctx.params.observability.deploy {
        observability::reconcile(rec, ctx).await?;
        dashboard::reconcile(rec, ctx).await?;
    } else {
        debug!("Central observability not requested");
    }

    info!(
        actions = rec.report().deployment_info().action_count,
        "Baseline deployment finished"
    );
    Ok(())
}

/// Reconcile every rule, filter and alarm that applies to `region`.
///
/// `accounts` are the accounts named by the request; the management account
/// is always added. Kinds whose filters exclude an account or the region are
/// skipped without touching the provider.
#[instrument(skip_all, fields(region = %region))]
pub async fn reconcile_region<P: Provider, L: StateLedger>(
    rec: &mut Reconciler<'_, P, L>,
    ctx: &RunContext,
    accounts: &[String],
    region: &str,
) -> Result<()> {
    let targets = ctx.target_accounts(accounts);
    info!(accounts = targets.len(), "Reconciling region");

    for check in ctx.params.deployed_checks() {
        for account in &targets {
            if !check.spec.deploys_to(account, region) {
                continue;
            }
            rules::ensure_rule(rec, ctx, check, &Scope::new(account, region)).await?;
        }
    }

    // One alarm topic per account serves every filter in the region
    let mut alarm_topics: HashMap<&str, Existing> = HashMap::new();
    for filter in ctx.params.deployed_filters() {
        for account in &targets {
            if !filter.spec.deploys_to(account, region) {
                continue;
            }
            let scope = Scope::new(account, region);
            let topic = match alarm_topics.get(account.as_str()) {
                Some(topic) => topic.clone(),
                None => {
                    let topic = alarms::ensure_alarm_topic(rec, ctx, &scope).await?;
                    alarm_topics.insert(account, topic.clone());
                    topic
                }
            };
            alarms::ensure_filter_alarm(rec, filter, &scope, &topic).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FanOutMode;
    use crate::config::test_support::{MANAGEMENT, run_context};
    use crate::fanout::MockPublisher;
    use crate::reconcile::PolicyCompare;
    use crate::state::SqliteLedger;
    use crate::testing::{Call, FakeProvider};
    use serde_json::json;
    use sra_bedrock_common::ResourceKind;
    use sra_bedrock_common::defaults::STATE_TABLE;
    use sra_bedrock_test_utils::{EventBuilder, check_spec, filter_spec, observability_spec, open_test_db};

    fn guardrails_event(dry_run: bool) -> EventBuilder {
        EventBuilder::create()
            .dry_run(dry_run)
            .accounts(&["111111111111"])
            .regions(&["us-east-1"])
            .property(
                "SRA-BEDROCK-CHECK-GUARDRAILS",
                check_spec(true, &["111111111111"], &["us-east-1"], json!({})),
            )
    }

    fn seeded_provider() -> FakeProvider {
        let provider = FakeProvider::default();
        let staging = crate::reconcile::kinds::CodeArchiveSpec {
            bucket: "sra-staging-000000000000-us-east-1".into(),
            object_key: "sra-bedrock-org/code/main.zip".into(),
            source_url: String::new(),
        };
        provider.seed(&Scope::new(MANAGEMENT, "us-east-1"), &staging);
        provider
    }

    fn quiet_publisher() -> MockPublisher {
        let mut publisher = MockPublisher::new();
        publisher.expect_publish_batch().never();
        publisher
    }

    async fn ledger() -> SqliteLedger {
        SqliteLedger::new(open_test_db().await.unwrap(), STATE_TABLE)
    }

    #[tokio::test]
    async fn test_dry_run_guardrails_scenario() {
        let provider = seeded_provider();
        let ledger = ledger().await;
        let builder = EventBuilder::create()
            .dry_run(true)
            .accounts(&["111111111111", "222222222222"])
            .regions(&["us-east-1", "us-west-2"])
            .property(
                "SRA-BEDROCK-CHECK-GUARDRAILS",
                check_spec(true, &["111111111111"], &["us-east-1"], json!({})),
            );
        let ctx = run_context(builder, FanOutMode::Topic);

        let mut rec = Reconciler::new(&provider, &ledger, ctx.solution(), true, PolicyCompare::Exact);
        create(&mut rec, &ctx, &quiet_publisher()).await.unwrap();
        let report = rec.into_report();

        assert_eq!(provider.mutations(), 0);
        assert!(!ledger.table_exists().await.unwrap());

        let data = report.dry_run_actions();
        for key in [
            "sra-bedrock-check-guardrails_111111111111_IAMRole",
            "sra-bedrock-check-guardrails_111111111111_us-east-1_Lambda",
            "sra-bedrock-check-guardrails_111111111111_us-east-1_Config",
        ] {
            assert!(data.contains_key(key), "missing {key} in {data:?}");
        }
        assert!(
            data.keys()
                .filter(|k| k.starts_with("sra-bedrock-check-"))
                .all(|k| k.contains("_111111111111_")),
            "{data:?}"
        );
        assert!(!data.keys().any(|k| k.contains("222222222222")), "{data:?}");
        assert!(!data.keys().any(|k| k.contains("us-west-2")), "{data:?}");
        assert!(
            provider
                .log()
                .iter()
                .all(|call| call.account != "222222222222" && call.region != "us-west-2")
        );
    }

    #[tokio::test]
    async fn test_second_live_run_deploys_nothing() {
        let provider = seeded_provider();
        let ledger = ledger().await;
        let ctx = run_context(guardrails_event(false), FanOutMode::Inline);

        let mut first = Reconciler::new(&provider, &ledger, ctx.solution(), false, PolicyCompare::Exact);
        create(&mut first, &ctx, &quiet_publisher()).await.unwrap();
        let first = first.into_report().deployment_info();
        assert!(first.resources_deployed > 0);
        let records = ledger.list(ctx.solution()).await.unwrap().len();

        provider.clear_log();
        let mut second = Reconciler::new(&provider, &ledger, ctx.solution(), false, PolicyCompare::Exact);
        create(&mut second, &ctx, &quiet_publisher()).await.unwrap();
        let second = second.into_report().deployment_info();

        assert_eq!(second.resources_deployed, 0);
        assert_eq!(second.action_count, 0);
        assert_eq!(provider.count(Call::Create), 0);
        assert_eq!(ledger.list(ctx.solution()).await.unwrap().len(), records);
    }

    fn full_baseline_event(dry_run: bool) -> EventBuilder {
        guardrails_event(dry_run)
            .property(
                "SRA-BEDROCK-FILTER-SERVICE-CHANGES",
                filter_spec(
                    true,
                    &["111111111111"],
                    &["us-east-1"],
                    json!({"log_group_name": "aws-controltower/CloudTrailLogs"}),
                ),
            )
            .property(
                "SRA-BEDROCK-CENTRAL-OBSERVABILITY",
                observability_spec(true, &["111111111111"], &["us-east-1"]),
            )
    }

    #[tokio::test]
    async fn test_live_run_covers_dry_run_plan() {
        // SNS and OAM attach a default access policy to every new topic and sink
        let provider = seeded_provider()
            .with_service_default(
                ResourceKind::Topic,
                ResourceKind::TopicPolicy,
                r#"{"Version":"2008-10-17","Id":"__default_policy_ID"}"#,
            )
            .with_service_default(ResourceKind::Sink, ResourceKind::SinkPolicy, "{}");
        let ledger = ledger().await;
        let dry_ctx = run_context(full_baseline_event(true), FanOutMode::Inline);
        let live_ctx = run_context(full_baseline_event(false), FanOutMode::Inline);

        let mut dry = Reconciler::new(&provider, &ledger, dry_ctx.solution(), true, PolicyCompare::Exact);
        create(&mut dry, &dry_ctx, &quiet_publisher()).await.unwrap();
        let mut live = Reconciler::new(&provider, &ledger, live_ctx.solution(), false, PolicyCompare::Exact);
        create(&mut live, &live_ctx, &quiet_publisher()).await.unwrap();

        let planned = dry.into_report();
        let applied = live.into_report();
        for key in [
            "sra-bedrock-org-alarms_111111111111_us-east-1_SNSTopicPolicy",
            "sra-bedrock-filter-service-changes-alarm_111111111111_us-east-1_CloudWatchAlarm",
        ] {
            assert!(planned.dry_run_actions().contains_key(key), "{key} was not planned");
        }
        let missing: Vec<&String> = planned
            .dry_run_actions()
            .keys()
            .filter(|key| !applied.live_run_actions().contains_key(*key))
            .collect();
        assert!(missing.is_empty(), "planned but not applied: {missing:?}");
    }

    #[tokio::test]
    async fn test_filters_skip_other_accounts_and_regions() {
        let provider = FakeProvider::default();
        let ledger = ledger().await;
        let builder = EventBuilder::create()
            .dry_run(false)
            .property(
                "SRA-BEDROCK-FILTER-SERVICE-CHANGES",
                filter_spec(
                    true,
                    &["111111111111"],
                    &["us-east-1"],
                    json!({"log_group_name": "aws-controltower/CloudTrailLogs"}),
                ),
            );
        let ctx = run_context(builder, FanOutMode::Inline);
        let accounts = vec!["111111111111".to_string(), "222222222222".to_string()];

        ledger.create_table().await.unwrap();
        let mut rec = Reconciler::new(&provider, &ledger, ctx.solution(), false, PolicyCompare::Exact);
        reconcile_region(&mut rec, &ctx, &accounts, "us-east-1").await.unwrap();
        reconcile_region(&mut rec, &ctx, &accounts, "us-west-2").await.unwrap();

        assert!(provider.log().iter().all(|call| call.account == "111111111111"));
        assert!(provider.log().iter().all(|call| call.region == "us-east-1"));
        let filter_scope = Scope::new("111111111111", "us-east-1");
        assert!(provider.contains(
            ResourceKind::MetricFilter,
            &filter_scope,
            "sra-bedrock-filter-service-changes"
        ));
        assert!(provider.contains(
            ResourceKind::MetricAlarm,
            &filter_scope,
            "sra-bedrock-filter-service-changes-alarm"
        ));
    }

    #[tokio::test]
    async fn test_management_account_always_targeted() {
        let provider = FakeProvider::default();
        let ledger = ledger().await;
        ledger.create_table().await.unwrap();
        let builder = EventBuilder::create().dry_run(false).property(
            "SRA-BEDROCK-CHECK-GUARDRAILS",
            check_spec(true, &[], &["us-east-1"], json!({})),
        );
        let ctx = run_context(builder, FanOutMode::Inline);

        let mut rec = Reconciler::new(&provider, &ledger, ctx.solution(), false, PolicyCompare::Exact);
        reconcile_region(&mut rec, &ctx, &[], "us-east-1").await.unwrap();

        assert!(provider.contains(
            ResourceKind::ConfigRule,
            &Scope::new(MANAGEMENT, "us-east-1"),
            "sra-bedrock-check-guardrails"
        ));
    }
}
