//! Removal of everything the baseline may have deployed
//!
//! Teardown ignores deploy flags: every kind is planned for every scope its
//! account and region filters allow, and removal of an absent resource is a
//! no-op. The plan is executed in teardown-priority order so dependents go
//! before the resources they depend on. The ledger table and the staged code
//! are left in place.

use super::observability::{sharing_accounts, sharing_regions};
use crate::aws::iam::{managed_policy_arn, policy_arn};
use crate::aws::sns::topic_arn;
use crate::config::RunContext;
use crate::reconcile::kinds::*;
use crate::reconcile::{Desired, Provider, Reconciler, Scope, action_key};
use crate::state::StateLedger;
use anyhow::Result;
use sra_bedrock_common::ResourceKind;
use sra_bedrock_common::defaults::{
    ALARM_KEY_ALIAS, CROSS_ACCOUNT_POLICIES, CROSS_ACCOUNT_ROLE, RULE_MANAGED_POLICIES, SINK_NAME,
    alarm_name, alarm_topic_name, configuration_topic_name, rule_basic_policy_name,
};
use std::collections::HashSet;
use tracing::{debug, info, instrument};

/// A resource teardown will try to remove
#[derive(Debug, Clone)]
pub enum Target {
    Role(RoleSpec),
    Policy(PolicySpec),
    Attachment(AttachmentSpec),
    Function(FunctionSpec),
    Permission(PermissionSpec),
    Rule(ConfigRuleSpec),
    Key(KeySpec),
    Alias(AliasSpec),
    Topic(TopicSpec),
    TopicPolicy(TopicPolicySpec),
    Subscription(SubscriptionSpec),
    Filter(MetricFilterSpec),
    Alarm(AlarmSpec),
    Sink(SinkSpec),
    SinkPolicy(SinkPolicySpec),
    Link(LinkSpec),
    Dashboard(DashboardSpec),
}

impl Target {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Target::Role(_) => RoleSpec::KIND,
            Target::Policy(_) => PolicySpec::KIND,
            Target::Attachment(_) => AttachmentSpec::KIND,
            Target::Function(_) => FunctionSpec::KIND,
            Target::Permission(_) => PermissionSpec::KIND,
            Target::Rule(_) => ConfigRuleSpec::KIND,
            Target::Key(_) => KeySpec::KIND,
            Target::Alias(_) => AliasSpec::KIND,
            Target::Topic(_) => TopicSpec::KIND,
            Target::TopicPolicy(_) => TopicPolicySpec::KIND,
            Target::Subscription(_) => SubscriptionSpec::KIND,
            Target::Filter(_) => MetricFilterSpec::KIND,
            Target::Alarm(_) => AlarmSpec::KIND,
            Target::Sink(_) => SinkSpec::KIND,
            Target::SinkPolicy(_) => SinkPolicySpec::KIND,
            Target::Link(_) => LinkSpec::KIND,
            Target::Dashboard(_) => DashboardSpec::KIND,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Target::Role(d) => d.key(),
            Target::Policy(d) => d.key(),
            Target::Attachment(d) => d.key(),
            Target::Function(d) => d.key(),
            Target::Permission(d) => d.key(),
            Target::Rule(d) => d.key(),
            Target::Key(d) => d.key(),
            Target::Alias(d) => d.key(),
            Target::Topic(d) => d.key(),
            Target::TopicPolicy(d) => d.key(),
            Target::Subscription(d) => d.key(),
            Target::Filter(d) => d.key(),
            Target::Alarm(d) => d.key(),
            Target::Sink(d) => d.key(),
            Target::SinkPolicy(d) => d.key(),
            Target::Link(d) => d.key(),
            Target::Dashboard(d) => d.key(),
        }
    }
}

/// One planned removal
#[derive(Debug, Clone)]
pub struct TeardownItem {
    pub scope: Scope,
    pub target: Target,
}

impl TeardownItem {
    pub fn priority(&self) -> u8 {
        self.target.kind().teardown_priority()
    }
}

/// Removals collected once per resource identity
#[derive(Default)]
struct Plan {
    items: Vec<TeardownItem>,
    seen: HashSet<String>,
}

impl Plan {
    fn add(&mut self, scope: &Scope, target: Target) {
        let identity = action_key(scope, target.kind(), target.key(), "");
        if self.seen.insert(identity) {
            self.items.push(TeardownItem {
                scope: scope.clone(),
                target,
            });
        }
    }
}

fn role(name: &str) -> Target {
    Target::Role(RoleSpec {
        name: name.to_string(),
        trust_policy: String::new(),
        description: String::new(),
    })
}

fn policy(name: &str) -> Target {
    Target::Policy(PolicySpec {
        name: name.to_string(),
        document: String::new(),
        description: String::new(),
    })
}

fn topic(name: &str) -> Target {
    Target::Topic(TopicSpec {
        name: name.to_string(),
        kms_key_id: None,
        description: String::new(),
    })
}

fn plan_configuration_topic(plan: &mut Plan, ctx: &RunContext) {
    let scope = ctx.management_scope();
    let name = configuration_topic_name(ctx.solution());
    let arn = topic_arn(&ctx.partition, &scope, &name);

    if let Some(function_arn) = ctx.function_arn.as_deref() {
        plan.add(
            &scope,
            Target::Permission(
                PermissionSpec::new(function_arn, "sns-invoke", "sns.amazonaws.com").source_arn(&arn),
            ),
        );
        plan.add(
            &scope,
            Target::Subscription(SubscriptionSpec::new(&name, &arn, "lambda", function_arn)),
        );
    }
    plan.add(&scope, topic(&name));
}

fn plan_rules(plan: &mut Plan, ctx: &RunContext, accounts: &[String], regions: &[String]) {
    for check in &ctx.params.checks {
        let rule = check.rule_name.as_str();
        for account in accounts {
            for region in regions {
                if !check.spec.applies_to(account, region) {
                    continue;
                }
                let scope = Scope::new(account, region);
                plan.add(
                    &scope,
                    Target::Rule(ConfigRuleSpec {
                        name: rule.to_string(),
                        function_arn: String::new(),
                        input_parameters: String::new(),
                        frequency: String::new(),
                    }),
                );
                plan.add(
                    &scope,
                    Target::Permission(PermissionSpec::new(rule, "config-invoke", "config.amazonaws.com")),
                );
                plan.add(
                    &scope,
                    Target::Function(FunctionSpec {
                        name: rule.to_string(),
                        role_arn: String::new(),
                        code_bucket: String::new(),
                        code_key: String::new(),
                        runtime: String::new(),
                        handler: String::new(),
                        timeout_secs: 0,
                        memory_mb: 0,
                        description: String::new(),
                    }),
                );

                let custom = [rule_basic_policy_name(rule), rule.to_string()];
                for name in &custom {
                    let arn = policy_arn(&ctx.partition, account, name);
                    plan.add(&scope, Target::Attachment(AttachmentSpec::new(rule, &arn)));
                    plan.add(&scope, policy(name));
                }
                for name in RULE_MANAGED_POLICIES {
                    let arn = managed_policy_arn(&ctx.partition, name);
                    plan.add(&scope, Target::Attachment(AttachmentSpec::new(rule, &arn)));
                }
                plan.add(&scope, role(rule));
            }
        }
    }
}

fn plan_alarms(plan: &mut Plan, ctx: &RunContext, accounts: &[String], regions: &[String]) {
    let topic_name = alarm_topic_name(ctx.solution());
    for filter in &ctx.params.filters {
        for account in accounts {
            for region in regions {
                if !filter.spec.applies_to(account, region) {
                    continue;
                }
                let scope = Scope::new(account, region);
                let arn = topic_arn(&ctx.partition, &scope, &topic_name);

                plan.add(
                    &scope,
                    Target::Alarm(AlarmSpec {
                        name: alarm_name(&filter.filter_name),
                        metric_name: String::new(),
                        namespace: String::new(),
                        topic_arn: arn.clone(),
                    }),
                );
                match &filter.params {
                    Some(params) => plan.add(
                        &scope,
                        Target::Filter(MetricFilterSpec {
                            name: filter.filter_name.clone(),
                            log_group: params.log_group_name.clone(),
                            pattern: String::new(),
                            metric_name: String::new(),
                            namespace: String::new(),
                            value: String::new(),
                        }),
                    ),
                    None => debug!(
                        filter = %filter.filter_name,
                        "No log group known for filter; cannot look it up"
                    ),
                }

                if let Some(email) = &ctx.params.globals.alarm_email {
                    plan.add(
                        &scope,
                        Target::Subscription(SubscriptionSpec::new(&topic_name, &arn, "email", email)),
                    );
                }
                plan.add(
                    &scope,
                    Target::TopicPolicy(TopicPolicySpec {
                        topic_name: topic_name.clone(),
                        topic_arn: arn.clone(),
                        policy: String::new(),
                    }),
                );
                plan.add(&scope, topic(&topic_name));
                plan.add(
                    &scope,
                    Target::Alias(AliasSpec {
                        alias: ALARM_KEY_ALIAS.to_string(),
                        target_key_id: String::new(),
                    }),
                );
                plan.add(
                    &scope,
                    Target::Key(KeySpec {
                        alias: ALARM_KEY_ALIAS.to_string(),
                        policy: String::new(),
                        description: String::new(),
                    }),
                );
            }
        }
    }
}

async fn plan_observability<P: Provider, L: StateLedger>(
    plan: &mut Plan,
    rec: &Reconciler<'_, P, L>,
    ctx: &RunContext,
) -> Result<()> {
    let security = ctx.security_scope();
    let sink = SinkSpec {
        name: SINK_NAME.to_string(),
    };
    plan.add(
        &security,
        Target::Dashboard(DashboardSpec {
            name: ctx.solution().to_string(),
            body: String::new(),
        }),
    );

    let found = rec.lookup(&security, &sink).await?;
    let regions = sharing_regions(ctx);
    for account in sharing_accounts(ctx) {
        if let Some(sink) = &found {
            for region in regions {
                plan.add(
                    &Scope::new(&account, region),
                    Target::Link(LinkSpec {
                        sink_name: SINK_NAME.to_string(),
                        sink_arn: sink.arn.clone(),
                        label_template: String::new(),
                        resource_types: Vec::new(),
                    }),
                );
            }
        }
        let scope = Scope::new(&account, &ctx.home_region);
        for name in CROSS_ACCOUNT_POLICIES {
            let arn = managed_policy_arn(&ctx.partition, name);
            plan.add(&scope, Target::Attachment(AttachmentSpec::new(CROSS_ACCOUNT_ROLE, &arn)));
        }
        plan.add(&scope, role(CROSS_ACCOUNT_ROLE));
    }
    match &found {
        Some(existing) => plan.add(
            &security,
            Target::SinkPolicy(SinkPolicySpec {
                sink_name: SINK_NAME.to_string(),
                sink_arn: existing.arn.clone(),
                policy: String::new(),
            }),
        ),
        None => debug!("No sink found; links cannot exist"),
    }
    plan.add(&security, Target::Sink(sink));
    Ok(())
}

/// Every removal teardown would attempt, sorted by teardown priority
pub async fn plan_teardown<P: Provider, L: StateLedger>(
    rec: &Reconciler<'_, P, L>,
    ctx: &RunContext,
) -> Result<Vec<TeardownItem>> {
    let accounts = ctx.target_accounts(&ctx.params.globals.accounts);
    let regions = &ctx.params.globals.regions;

    let mut plan = Plan::default();
    plan_configuration_topic(&mut plan, ctx);
    plan_rules(&mut plan, ctx, &accounts, regions);
    plan_alarms(&mut plan, ctx, &accounts, regions);
    plan_observability(&mut plan, rec, ctx).await?;

    let mut items = plan.items;
    items.sort_by_key(TeardownItem::priority);
    Ok(items)
}

async fn remove_item<P: Provider, L: StateLedger>(
    rec: &mut Reconciler<'_, P, L>,
    item: &TeardownItem,
) -> Result<bool> {
    let scope = &item.scope;
    match &item.target {
        Target::Role(d) => rec.remove(scope, d).await,
        Target::Policy(d) => rec.remove(scope, d).await,
        Target::Attachment(d) => rec.remove(scope, d).await,
        Target::Function(d) => rec.remove(scope, d).await,
        Target::Permission(d) => rec.remove(scope, d).await,
        Target::Rule(d) => rec.remove(scope, d).await,
        Target::Key(d) => rec.remove(scope, d).await,
        Target::Alias(d) => rec.remove(scope, d).await,
        Target::Topic(d) => rec.remove(scope, d).await,
        Target::TopicPolicy(d) => rec.remove(scope, d).await,
        Target::Subscription(d) => rec.remove(scope, d).await,
        Target::Filter(d) => rec.remove(scope, d).await,
        Target::Alarm(d) => rec.remove(scope, d).await,
        Target::Sink(d) => rec.remove(scope, d).await,
        Target::SinkPolicy(d) => rec.remove(scope, d).await,
        Target::Link(d) => rec.remove(scope, d).await,
        Target::Dashboard(d) => rec.remove(scope, d).await,
    }
}

/// Remove everything the baseline may have deployed. Returns how many
/// resources were found (and, in live mode, removed).
#[instrument(skip_all, fields(solution = %ctx.solution(), dry_run = ctx.dry_run()))]
pub async fn teardown<P: Provider, L: StateLedger>(
    rec: &mut Reconciler<'_, P, L>,
    ctx: &RunContext,
) -> Result<usize> {
    let items = plan_teardown(rec, ctx).await?;
    info!(planned = items.len(), "Tearing down baseline");

    let mut removed = 0;
    for item in &items {
        if remove_item(rec, item).await? {
            removed += 1;
        }
    }

    info!(removed, "Baseline teardown finished");
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FanOutMode;
    use crate::config::test_support::{SECURITY, run_context};
    use crate::deploy::create;
    use crate::fanout::MockPublisher;
    use crate::reconcile::PolicyCompare;
    use crate::state::SqliteLedger;
    use crate::testing::{Call, FakeProvider};
    use serde_json::json;
    use sra_bedrock_test_utils::{
        EventBuilder, check_spec, filter_spec, observability_spec, open_test_db,
    };

    fn full_event(builder: EventBuilder) -> EventBuilder {
        builder
            .dry_run(false)
            .accounts(&["111111111111"])
            .regions(&["us-east-1"])
            .property("SRA_ALARM_EMAIL", "secops@example.com")
            .property(
                "SRA-BEDROCK-CHECK-GUARDRAILS",
                check_spec(true, &["111111111111"], &["us-east-1"], json!({})),
            )
            .property(
                "SRA-BEDROCK-FILTER-SERVICE-CHANGES",
                filter_spec(true, &[], &[], json!({"log_group_name": "trail"})),
            )
            .property(
                "SRA-BEDROCK-CENTRAL-OBSERVABILITY",
                observability_spec(true, &["111111111111"], &["us-east-1"]),
            )
    }

    async fn ledger() -> SqliteLedger {
        let ledger = SqliteLedger::new(open_test_db().await.unwrap(), "sra_state");
        ledger.create_table().await.unwrap();
        ledger
    }

    fn publisher() -> MockPublisher {
        let mut publisher = MockPublisher::new();
        publisher.expect_publish_batch().never();
        publisher
    }

    #[tokio::test]
    async fn test_teardown_after_create_removes_everything() {
        let provider = FakeProvider::default();
        let ledger = ledger().await;
        let create_ctx = run_context(full_event(EventBuilder::create()), FanOutMode::Inline);
        let delete_ctx = run_context(full_event(EventBuilder::delete()), FanOutMode::Inline);

        let mut rec = Reconciler::new(&provider, &ledger, create_ctx.solution(), false, PolicyCompare::Exact);
        create(&mut rec, &create_ctx, &publisher()).await.unwrap();
        let deployed = rec.into_report().deployment_info().resources_deployed;

        let mut rec = Reconciler::new(&provider, &ledger, delete_ctx.solution(), false, PolicyCompare::Exact);
        teardown(&mut rec, &delete_ctx).await.unwrap();
        let info = rec.into_report().deployment_info();

        assert_eq!(info.resources_deployed, -deployed);
        // Only the staged archive survives
        assert_eq!(provider.len(), 1);
        let live: Vec<_> = ledger
            .list(delete_ctx.solution())
            .await
            .unwrap()
            .into_iter()
            .filter(|r| !r.is_removed())
            .collect();
        assert_eq!(live.len(), 1, "{live:?}");
        assert_eq!(live[0].attrs.component_name, "sra_state");
    }

    #[tokio::test]
    async fn test_teardown_of_nothing_mutates_nothing() {
        let provider = FakeProvider::default();
        let ledger = ledger().await;
        let ctx = run_context(full_event(EventBuilder::delete()), FanOutMode::Inline);

        let mut rec = Reconciler::new(&provider, &ledger, ctx.solution(), false, PolicyCompare::Exact);
        let removed = teardown(&mut rec, &ctx).await.unwrap();

        assert_eq!(removed, 0);
        assert_eq!(provider.mutations(), 0);
        assert_eq!(rec.report().deployment_info().action_count, 0);
    }

    #[tokio::test]
    async fn test_removal_order() {
        let provider = FakeProvider::default();
        let ledger = ledger().await;
        let create_ctx = run_context(full_event(EventBuilder::create()), FanOutMode::Inline);
        let mut rec = Reconciler::new(&provider, &ledger, create_ctx.solution(), false, PolicyCompare::Exact);
        create(&mut rec, &create_ctx, &publisher()).await.unwrap();
        provider.clear_log();

        let ctx = run_context(full_event(EventBuilder::delete()), FanOutMode::Inline);
        let mut rec = Reconciler::new(&provider, &ledger, ctx.solution(), false, PolicyCompare::Exact);
        teardown(&mut rec, &ctx).await.unwrap();

        let deletes: Vec<ResourceKind> = provider
            .log()
            .into_iter()
            .filter(|c| c.call == Call::Delete)
            .map(|c| c.kind)
            .collect();
        let position = |kind| deletes.iter().position(|k| *k == kind).unwrap();
        assert!(position(ResourceKind::Link) < position(ResourceKind::Sink));
        assert!(position(ResourceKind::ConfigRule) < position(ResourceKind::Function));
        assert!(position(ResourceKind::PolicyAttachment) < position(ResourceKind::Policy));
        assert!(position(ResourceKind::Policy) < position(ResourceKind::Role));
        assert_eq!(deletes.last(), Some(&ResourceKind::Key));
    }

    #[tokio::test]
    async fn test_plan_ignores_deploy_flags() {
        let provider = FakeProvider::default();
        let ledger = ledger().await;
        let builder = EventBuilder::delete()
            .accounts(&["111111111111"])
            .regions(&["us-east-1"]);
        let ctx = run_context(builder, FanOutMode::Inline);
        let rec = Reconciler::new(&provider, &ledger, ctx.solution(), true, PolicyCompare::Exact);

        let plan = plan_teardown(&rec, &ctx).await.unwrap();

        // every known rule is planned even though none is deployed
        let rules = plan
            .iter()
            .filter(|i| i.target.kind() == ResourceKind::ConfigRule)
            .count();
        assert_eq!(rules, 9 * 2);
        assert!(plan.iter().any(|i| {
            i.target.kind() == ResourceKind::Dashboard && i.scope.account == SECURITY
        }));
        assert!(plan.windows(2).all(|w| w[0].priority() <= w[1].priority()));
    }
}
