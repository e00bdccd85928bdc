//! Alarm plumbing and per-filter metric alarms
//!
//! Each account/region gets one KMS-encrypted alarm topic. Every deployed
//! filter then adds a metric filter on its log group and an alarm that
//! notifies the topic.

use crate::aws::sns::topic_arn;
use crate::config::RunContext;
use crate::params::FilterSpec;
use crate::reconcile::kinds::{
    AlarmSpec, AliasSpec, KeySpec, MetricFilterSpec, SubscriptionSpec, TopicPolicySpec, TopicSpec,
};
use crate::reconcile::{Existing, Provider, Reconciler, Scope};
use crate::state::StateLedger;
use crate::templates;
use anyhow::Result;
use sra_bedrock_common::defaults::{
    ALARM_KEY_ALIAS, METRIC_NAMESPACE, METRIC_VALUE, alarm_name, alarm_topic_name, metric_name,
};
use tracing::{instrument, warn};

const EMAIL_PROTOCOL: &str = "email";

/// Key, alias, topic, topic policy and optional email subscription
#[instrument(skip_all, fields(account = %scope.account, region = %scope.region))]
pub(super) async fn ensure_alarm_topic<P: Provider, L: StateLedger>(
    rec: &mut Reconciler<'_, P, L>,
    ctx: &RunContext,
    scope: &Scope,
) -> Result<Existing> {
    let key = rec
        .ensure(
            scope,
            &KeySpec {
                alias: ALARM_KEY_ALIAS.to_string(),
                policy: templates::alarm_key_policy(&ctx.partition, &scope.account)?,
                description: "Key for CloudWatch Alarm SNS Topic Encryption".to_string(),
            },
        )
        .await?;
    rec.ensure_under(
        scope,
        &AliasSpec {
            alias: ALARM_KEY_ALIAS.to_string(),
            target_key_id: key.id.clone(),
        },
        &key,
    )
    .await?;

    let name = alarm_topic_name(ctx.solution());
    let topic = rec
        .ensure(
            scope,
            &TopicSpec {
                name: name.clone(),
                kms_key_id: Some(key.id.clone()),
                description: "alarm notifications".to_string(),
            },
        )
        .await?;

    // A planned topic has a placeholder ARN; the policy must name the real one.
    let arn = topic_arn(&ctx.partition, scope, &name);
    rec.ensure_under(
        scope,
        &TopicPolicySpec {
            topic_name: name.clone(),
            topic_arn: arn.clone(),
            policy: templates::alarm_topic_policy(&arn, &scope.account)?,
        },
        &topic,
    )
    .await?;

    if let Some(email) = &ctx.params.globals.alarm_email {
        rec.ensure_under(
            scope,
            &SubscriptionSpec::new(&name, &arn, EMAIL_PROTOCOL, email),
            &topic,
        )
        .await?;
    }

    Ok(topic)
}

/// Metric filter and alarm for one filter
#[instrument(skip_all, fields(filter = %filter.filter_name, account = %scope.account))]
pub(super) async fn ensure_filter_alarm<P: Provider, L: StateLedger>(
    rec: &mut Reconciler<'_, P, L>,
    filter: &FilterSpec,
    scope: &Scope,
    topic: &Existing,
) -> Result<()> {
    let Some(params) = &filter.params else {
        warn!("Filter has no parameters; skipping");
        return Ok(());
    };
    let metric = metric_name(&filter.filter_name);

    rec.ensure(
        scope,
        &MetricFilterSpec {
            name: filter.filter_name.clone(),
            log_group: params.log_group_name.clone(),
            pattern: templates::metric_filter_pattern(filter.kind, params)?,
            metric_name: metric.clone(),
            namespace: METRIC_NAMESPACE.to_string(),
            value: METRIC_VALUE.to_string(),
        },
    )
    .await?;

    rec.ensure_under(
        scope,
        &AlarmSpec {
            name: alarm_name(&filter.filter_name),
            metric_name: metric,
            namespace: METRIC_NAMESPACE.to_string(),
            topic_arn: topic.arn.clone(),
        },
        topic,
    )
    .await?;
    Ok(())
}
