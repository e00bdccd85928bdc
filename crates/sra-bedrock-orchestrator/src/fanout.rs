//! Per-region fan-out of the create pass
//!
//! A create run splits its per-region work into one [`RegionMessage`] per
//! requested region and publishes them to the configuration topic, whose
//! subscriber is this same handler. Each delivered message is consumed by
//! [`consume`], which runs the same reconciliation the inline path runs.

use crate::config::{FanOutMode, RunContext};
use crate::deploy::reconcile_region;
use crate::reconcile::{Existing, Provider, Reconciler};
use crate::state::StateLedger;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sra_bedrock_common::defaults::{FANOUT_ACTION, FANOUT_SUBJECT, PUBLISH_BATCH_LIMIT};
use tracing::{info, instrument, warn};

/// Work unit for one region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RegionMessage {
    pub accounts: Vec<String>,
    pub region: String,
    /// Properties of the originating event, untouched
    pub resource_properties: Value,
    pub action: String,
}

/// One entry of a batch publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishEntry {
    pub id: String,
    pub subject: String,
    pub message: String,
}

/// Batch publisher for the configuration topic
#[allow(async_fn_in_trait)]
#[cfg_attr(test, mockall::automock)]
pub trait Publisher: Send + Sync {
    /// Publish up to [`PUBLISH_BATCH_LIMIT`] entries in one request
    async fn publish_batch(&self, topic_arn: &str, entries: Vec<PublishEntry>) -> Result<()>;
}

/// One message per distinct region, each carrying every account
pub fn build_messages(accounts: &[String], regions: &[String], properties: &Value) -> Result<Vec<PublishEntry>> {
    let mut entries: Vec<PublishEntry> = Vec::with_capacity(regions.len());
    for region in regions {
        if entries.iter().any(|e| &e.id == region) {
            continue;
        }
        let message = RegionMessage {
            accounts: accounts.to_vec(),
            region: region.clone(),
            resource_properties: properties.clone(),
            action: FANOUT_ACTION.to_string(),
        };
        entries.push(PublishEntry {
            id: region.clone(),
            subject: FANOUT_SUBJECT.to_string(),
            message: serde_json::to_string(&message).context("Failed to encode region message")?,
        });
    }
    Ok(entries)
}

/// Publish entries in batches the topic accepts. Returns the batch count.
pub async fn publish_messages<B: Publisher>(
    publisher: &B,
    topic_arn: &str,
    entries: Vec<PublishEntry>,
) -> Result<usize> {
    let mut batches = 0;
    for chunk in entries.chunks(PUBLISH_BATCH_LIMIT) {
        publisher.publish_batch(topic_arn, chunk.to_vec()).await?;
        batches += 1;
    }
    Ok(batches)
}

fn warn_ungoverned(ctx: &RunContext) {
    let governed = &ctx.prereqs.governed_regions;
    for region in &ctx.params.globals.regions {
        if !governed.contains(region) {
            warn!(region = %region, "Requested region is not governed by the landing zone");
        }
    }
}

/// Hand every requested region to its consumer.
///
/// Regions are reconciled in this process in inline mode, on any dry run,
/// and when the handler function is unknown (nothing would receive the
/// messages). Otherwise one message per region goes to the topic.
#[instrument(skip_all, fields(mode = %ctx.fan_out))]
pub async fn dispatch<P: Provider, L: StateLedger, B: Publisher>(
    rec: &mut Reconciler<'_, P, L>,
    ctx: &RunContext,
    publisher: &B,
    topic: &Existing,
) -> Result<()> {
    let globals = &ctx.params.globals;
    if globals.regions.is_empty() {
        info!("No regions requested; nothing to fan out");
        return Ok(());
    }
    warn_ungoverned(ctx);

    let inline = ctx.fan_out == FanOutMode::Inline || rec.is_dry_run() || ctx.function_arn.is_none();
    if inline {
        for region in &globals.regions {
            reconcile_region(rec, ctx, &globals.accounts, region).await?;
        }
        return Ok(());
    }

    let entries = build_messages(&globals.accounts, &globals.regions, &ctx.properties)?;
    let messages = entries.len();
    let batches = publish_messages(publisher, &topic.arn, entries).await?;
    info!(topic = %topic.arn, messages, batches, "Published region messages");
    Ok(())
}

/// Reconcile the region a delivered message names
#[instrument(skip_all, fields(region = %message.region))]
pub async fn consume<P: Provider, L: StateLedger>(
    rec: &mut Reconciler<'_, P, L>,
    ctx: &RunContext,
    message: &RegionMessage,
) -> Result<()> {
    if message.action != FANOUT_ACTION {
        warn!(action = %message.action, "Unexpected region message action; reconciling anyway");
    }
    reconcile_region(rec, ctx, &message.accounts, &message.region).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support::run_context;
    use crate::reconcile::{PolicyCompare, Scope};
    use crate::state::SqliteLedger;
    use crate::testing::{Call, FakeProvider};
    use serde_json::json;
    use sra_bedrock_common::ResourceKind;
    use sra_bedrock_test_utils::{EventBuilder, check_spec, open_test_db};

    const FIFTEEN_REGIONS: [&str; 15] = [
        "us-east-1",
        "us-east-2",
        "us-west-1",
        "us-west-2",
        "eu-west-1",
        "eu-west-2",
        "eu-west-3",
        "eu-central-1",
        "eu-north-1",
        "ap-south-1",
        "ap-northeast-1",
        "ap-northeast-2",
        "ap-southeast-1",
        "ap-southeast-2",
        "ca-central-1",
    ];

    fn guardrails(regions: &[&str]) -> EventBuilder {
        EventBuilder::create()
            .dry_run(false)
            .accounts(&["111111111111"])
            .regions(regions)
            .property(
                "SRA-BEDROCK-CHECK-GUARDRAILS",
                check_spec(true, &["111111111111"], &[], json!({})),
            )
    }

    async fn ledger() -> SqliteLedger {
        let ledger = SqliteLedger::new(open_test_db().await.unwrap(), "sra_state");
        ledger.create_table().await.unwrap();
        ledger
    }

    fn topic() -> Existing {
        let arn = "arn:aws:sns:us-east-1:000000000000:sra-bedrock-org-configuration";
        Existing::new(arn, arn)
    }

    #[test]
    fn test_messages_carry_everything() {
        let properties = json!({"DRY_RUN": "false"});
        let accounts = vec!["111111111111".to_string()];
        let regions = vec!["us-east-1".to_string(), "us-west-2".to_string(), "us-east-1".to_string()];

        let entries = build_messages(&accounts, &regions, &properties).unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].id, "us-west-2");
        assert_eq!(entries[1].subject, FANOUT_SUBJECT);
        let message: RegionMessage = serde_json::from_str(&entries[1].message).unwrap();
        assert_eq!(message.region, "us-west-2");
        assert_eq!(message.accounts, accounts);
        assert_eq!(message.resource_properties, properties);
        assert_eq!(message.action, "configure");
    }

    #[test]
    fn test_message_wire_names() {
        let message = RegionMessage {
            accounts: vec![],
            region: "eu-west-1".into(),
            resource_properties: json!({}),
            action: FANOUT_ACTION.into(),
        };
        let value = serde_json::to_value(&message).unwrap();
        for key in ["Accounts", "Region", "ResourceProperties", "Action"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
    }

    #[tokio::test]
    async fn test_topic_mode_publishes_in_batches() {
        let provider = FakeProvider::default();
        let ledger = ledger().await;
        let ctx = run_context(guardrails(&FIFTEEN_REGIONS), FanOutMode::Topic);

        let mut publisher = MockPublisher::new();
        publisher
            .expect_publish_batch()
            .withf(|topic, entries| topic.ends_with(":sra-bedrock-org-configuration") && entries.len() == 10)
            .times(1)
            .returning(|_, _| Ok(()));
        publisher
            .expect_publish_batch()
            .withf(|_, entries| entries.len() == 5)
            .times(1)
            .returning(|_, _| Ok(()));

        let mut rec = Reconciler::new(&provider, &ledger, ctx.solution(), false, PolicyCompare::Exact);
        dispatch(&mut rec, &ctx, &publisher, &topic()).await.unwrap();

        // the regions are left to the message consumers
        assert!(provider.log().is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_never_publishes() {
        let provider = FakeProvider::default();
        let ledger = ledger().await;
        let ctx = run_context(guardrails(&["us-east-1", "us-west-2"]).dry_run(true), FanOutMode::Topic);
        let mut publisher = MockPublisher::new();
        publisher.expect_publish_batch().never();

        let mut rec = Reconciler::new(&provider, &ledger, ctx.solution(), true, PolicyCompare::Exact);
        dispatch(&mut rec, &ctx, &publisher, &topic()).await.unwrap();

        let regions: Vec<String> = provider.log().into_iter().map(|c| c.region).collect();
        assert!(regions.iter().any(|r| r == "us-west-2"));
        assert_eq!(provider.mutations(), 0);
    }

    #[tokio::test]
    async fn test_unknown_function_reconciles_inline() {
        let provider = FakeProvider::default();
        let ledger = ledger().await;
        let mut ctx = run_context(guardrails(&["us-east-1"]), FanOutMode::Topic);
        ctx.function_arn = None;
        let mut publisher = MockPublisher::new();
        publisher.expect_publish_batch().never();

        let mut rec = Reconciler::new(&provider, &ledger, ctx.solution(), false, PolicyCompare::Exact);
        dispatch(&mut rec, &ctx, &publisher, &topic()).await.unwrap();

        assert!(provider.contains(
            ResourceKind::ConfigRule,
            &Scope::new("111111111111", "us-east-1"),
            "sra-bedrock-check-guardrails"
        ));
    }

    #[tokio::test]
    async fn test_publish_failure_propagates() {
        let provider = FakeProvider::default();
        let ledger = ledger().await;
        let ctx = run_context(guardrails(&["us-east-1"]), FanOutMode::Topic);
        let mut publisher = MockPublisher::new();
        publisher
            .expect_publish_batch()
            .returning(|_, _| Err(anyhow::anyhow!("AuthorizationError")));

        let mut rec = Reconciler::new(&provider, &ledger, ctx.solution(), false, PolicyCompare::Exact);
        let err = dispatch(&mut rec, &ctx, &publisher, &topic()).await.unwrap_err();
        assert!(err.to_string().contains("AuthorizationError"));
    }

    #[tokio::test]
    async fn test_consume_reconciles_one_region() {
        let provider = FakeProvider::default();
        let ledger = ledger().await;
        let ctx = run_context(guardrails(&["us-east-1", "us-west-2"]), FanOutMode::Topic);
        let message = RegionMessage {
            accounts: vec!["111111111111".into()],
            region: "us-west-2".into(),
            resource_properties: ctx.properties.clone(),
            action: FANOUT_ACTION.into(),
        };

        let mut rec = Reconciler::new(&provider, &ledger, ctx.solution(), false, PolicyCompare::Exact);
        consume(&mut rec, &ctx, &message).await.unwrap();

        assert!(provider.log().iter().all(|c| c.region == "us-west-2" || c.kind.is_global()));
        assert!(provider.count(Call::Create) > 0);
    }
}
