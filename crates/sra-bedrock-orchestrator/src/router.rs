//! Invocation routing
//!
//! An invocation is either a stack lifecycle request (`Create`, `Update`,
//! `Delete`) or a batch of region messages delivered by the configuration
//! topic. [`parse_event`] tells them apart, [`execute`] runs the matching
//! flow, and [`handle_event`] wires both to AWS and turns the outcome into
//! the handler response and, for stack requests, the stack-manager signal.

use crate::aws::{
    AwsContext, AwsProvider, SessionCache, SnsPublisher, SsmParameters, classify_anyhow_error,
    get_current_account_id,
};
use crate::config::{HandlerConfig, LedgerBackend, RunContext};
use crate::deploy;
use crate::error::BaselineError;
use crate::fanout::{self, Publisher, RegionMessage};
use crate::params::BaselineParams;
use crate::prereq::Prerequisites;
use crate::reconcile::{PolicyCompare, Provider, Reconciler, RunLedger};
use crate::state::{DynamoLedger, SqliteLedger, StateLedger, open_db};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sra_bedrock_common::defaults::{CFN_RESOURCE_ID, SOLUTION_NAME, STATE_TABLE};
use sra_bedrock_common::format_timestamp;
use std::collections::BTreeMap;
use tracing::{error, info, instrument, warn};

const SNS_EVENT_SOURCE: &str = "aws:sns";

static NO_PROPERTIES: Value = Value::Null;

/// Stack lifecycle request kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
pub enum RequestType {
    Create,
    Update,
    Delete,
}

/// Where the outcome of a stack request is reported
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SignalTarget {
    #[serde(rename = "ResponseURL")]
    pub response_url: String,
    #[serde(default)]
    pub stack_id: String,
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub logical_resource_id: String,
}

impl SignalTarget {
    /// Stack-managed invocations carry a resource type and a response URL;
    /// anything else is not signalled.
    pub fn from_event(event: &Value) -> Option<Self> {
        event.get("ResourceType")?;
        event.get("ResponseURL")?;
        serde_json::from_value(event.clone()).ok()
    }
}

/// What an invocation asks for
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    Lifecycle { request: RequestType, properties: Value },
    FanOut(Vec<RegionMessage>),
}

impl Trigger {
    /// Properties the run context is decoded from
    pub fn properties(&self) -> &Value {
        match self {
            Trigger::Lifecycle { properties, .. } => properties,
            Trigger::FanOut(messages) => messages
                .first()
                .map_or(&NO_PROPERTIES, |m| &m.resource_properties),
        }
    }
}

fn unsupported(reason: impl Into<String>) -> BaselineError {
    BaselineError::UnsupportedEvent { reason: reason.into() }
}

/// Tell a lifecycle request from a topic delivery
pub fn parse_event(event: &Value) -> Result<Trigger, BaselineError> {
    let request = event.get("RequestType");
    let records = event.get("Records");

    match (request, records) {
        (Some(_), Some(_)) => Err(unsupported("event has both RequestType and Records")),
        (Some(request), None) => {
            let request = request
                .as_str()
                .and_then(|r| r.parse::<RequestType>().ok())
                .ok_or_else(|| unsupported(format!("unknown RequestType {request}")))?;
            let properties = event.get("ResourceProperties").cloned().unwrap_or_else(|| json!({}));
            Ok(Trigger::Lifecycle { request, properties })
        }
        (None, Some(records)) => {
            let records = records
                .as_array()
                .filter(|r| !r.is_empty())
                .ok_or_else(|| unsupported("Records is empty"))?;
            let mut messages = Vec::with_capacity(records.len());
            for record in records {
                if record.get("EventSource").and_then(Value::as_str) != Some(SNS_EVENT_SOURCE) {
                    return Err(unsupported("record is not an SNS delivery"));
                }
                let body = record
                    .pointer("/Sns/Message")
                    .and_then(Value::as_str)
                    .ok_or_else(|| unsupported("SNS record has no message"))?;
                let message: RegionMessage = serde_json::from_str(body)
                    .map_err(|e| unsupported(format!("malformed region message: {e}")))?;
                messages.push(message);
            }
            // One run context serves the whole batch
            if messages.windows(2).any(|w| w[0].resource_properties != w[1].resource_properties) {
                return Err(unsupported("region messages in one batch carry different properties"));
            }
            Ok(Trigger::FanOut(messages))
        }
        (None, None) => Err(unsupported("event has neither RequestType nor Records")),
    }
}

/// Run the flow a trigger asks for and return its report
#[instrument(skip_all, fields(dry_run = ctx.dry_run()))]
pub async fn execute<P: Provider, L: StateLedger, B: Publisher>(
    trigger: &Trigger,
    ctx: &RunContext,
    provider: &P,
    ledger: &L,
    publisher: &B,
    compare: PolicyCompare,
) -> Result<RunLedger> {
    let mut rec = Reconciler::new(provider, ledger, ctx.solution(), ctx.dry_run(), compare);

    match trigger {
        // An update re-runs the full create pass
        Trigger::Lifecycle {
            request: request @ (RequestType::Create | RequestType::Update),
            ..
        } => {
            info!(request = %request, "Lifecycle request");
            deploy::create(&mut rec, ctx, publisher).await?;
        }
        Trigger::Lifecycle {
            request: RequestType::Delete,
            ..
        } => {
            info!("Lifecycle request: Delete");
            deploy::teardown(&mut rec, ctx).await?;
        }
        Trigger::FanOut(messages) => {
            info!(messages = messages.len(), "Region messages");
            for message in messages {
                fanout::consume(&mut rec, ctx, message).await?;
            }
        }
    }

    Ok(rec.into_report())
}

/// Outcome reported to the stack manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum SignalStatus {
    Success,
    Failed,
}

/// Reports a stack request's outcome
#[allow(async_fn_in_trait)]
#[cfg_attr(test, mockall::automock)]
pub trait OutcomeSignal: Send + Sync {
    async fn send(&self, target: &SignalTarget, status: SignalStatus, reason: &str, data: &Value) -> Result<()>;
}

/// Body of the stack-manager response document
pub fn signal_body(target: &SignalTarget, status: SignalStatus, reason: &str, data: &Value) -> Value {
    json!({
        "Status": status.to_string(),
        "Reason": reason,
        "PhysicalResourceId": CFN_RESOURCE_ID,
        "StackId": target.stack_id,
        "RequestId": target.request_id,
        "LogicalResourceId": target.logical_resource_id,
        "NoEcho": false,
        "Data": data,
    })
}

/// Uploads the response document to the request's pre-signed URL
#[derive(Debug, Clone, Default)]
pub struct CfnResponder {
    client: reqwest::Client,
}

impl OutcomeSignal for CfnResponder {
    async fn send(&self, target: &SignalTarget, status: SignalStatus, reason: &str, data: &Value) -> Result<()> {
        let body = signal_body(target, status, reason, data).to_string();
        // The URL is signed for an empty content type.
        self.client
            .put(&target.response_url)
            .header(reqwest::header::CONTENT_TYPE, "")
            .body(body)
            .send()
            .await
            .context("Failed to send stack response")?
            .error_for_status()
            .context("Stack response was rejected")?;
        info!(status = %status, "Signalled stack manager");
        Ok(())
    }
}

/// Result returned to the invoker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandlerResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub lambda_start: String,
    pub lambda_finish: String,
    pub body: String,
    pub dry_run: bool,
    pub dry_run_data: BTreeMap<String, String>,
}

/// Dry-run flag as requested, for responses to runs that never decoded it
fn requested_dry_run(event: &Value) -> bool {
    let properties = event
        .get("ResourceProperties")
        .or_else(|| event.pointer("/Records/0/Sns/Message"));
    let flag = match properties {
        Some(Value::String(message)) => serde_json::from_str::<Value>(message)
            .ok()
            .and_then(|m| m.pointer("/ResourceProperties/DRY_RUN").cloned()),
        Some(properties) => properties.get("DRY_RUN").cloned(),
        None => None,
    };
    flag.and_then(|f| f.as_str().map(|s| s != "false")).unwrap_or(true)
}

fn log_run(report: &RunLedger) {
    let stats = json!({
        "RUN STATS": report.signal_data(),
        "RUN DATA": report.run_data(),
    });
    info!("{stats}");
}

/// Turn a run's result into the response, signalling stack requests once
pub async fn finish<S: OutcomeSignal>(
    signal: &S,
    event: &Value,
    lambda_start: String,
    result: Result<RunLedger>,
) -> HandlerResponse {
    let target = SignalTarget::from_event(event);
    let (status, reason, data, response) = match result {
        Ok(report) => {
            log_run(&report);
            let response = HandlerResponse {
                status_code: 200,
                lambda_start,
                lambda_finish: String::new(),
                body: "SUCCESS".to_string(),
                dry_run: report.is_dry_run(),
                dry_run_data: report.dry_run_actions().clone(),
            };
            (SignalStatus::Success, "Baseline reconciled".to_string(), report.signal_data(), response)
        }
        Err(e) => {
            match classify_anyhow_error(&e).suggestion() {
                Some(hint) => error!(error = format!("{e:#}"), hint = %hint, "Invocation failed"),
                None => error!(error = format!("{e:#}"), "Invocation failed"),
            }
            let response = HandlerResponse {
                status_code: 500,
                lambda_start,
                lambda_finish: String::new(),
                body: "ERROR".to_string(),
                dry_run: requested_dry_run(event),
                dry_run_data: BTreeMap::new(),
            };
            (SignalStatus::Failed, format!("{e}"), json!({}), response)
        }
    };

    if let Some(target) = &target {
        if let Err(e) = signal.send(target, status, &reason, &data).await {
            warn!(error = format!("{e:#}"), "Could not signal stack manager");
        }
    }

    HandlerResponse {
        lambda_finish: format_timestamp(chrono::Utc::now()),
        ..response
    }
}

/// Decode, load prerequisites, wire AWS and run one trigger
async fn run_aws(trigger: &Trigger, config: &HandlerConfig) -> Result<RunLedger> {
    let properties = trigger.properties();
    let params = BaselineParams::from_value(properties)?;

    let base = AwsContext::new(config.region()).await;
    let prereqs = Prerequisites::load(&SsmParameters::from_context(&base)).await?;
    let management = get_current_account_id(base.sdk_config()).await?;
    let publisher = SnsPublisher::from_context(&base);

    let role = params.globals.execution_role.clone();
    let ctx = RunContext::new(config, properties, params, prereqs, &management);
    let sessions = SessionCache::new(base, config.partition(), &role, SOLUTION_NAME);
    let provider = AwsProvider::new(sessions, config.partition(), ctx.solution());
    let compare = config.policy_compare();

    match config.ledger() {
        LedgerBackend::Sqlite => {
            let ledger = SqliteLedger::new(open_db().await?, STATE_TABLE);
            execute(trigger, &ctx, &provider, &ledger, &publisher, compare).await
        }
        LedgerBackend::Dynamodb => {
            let security = provider.context(&ctx.security_scope()).await?;
            let ledger = DynamoLedger::new(security.dynamodb_client(), STATE_TABLE);
            execute(trigger, &ctx, &provider, &ledger, &publisher, compare).await
        }
    }
}

/// Handle one invocation end to end. Never fails: errors become a 500
/// response and, for stack requests, a FAILED signal.
pub async fn handle_event(event: &Value, config: &HandlerConfig) -> HandlerResponse {
    let lambda_start = format_timestamp(chrono::Utc::now());
    let result = match parse_event(event) {
        Ok(trigger) => run_aws(&trigger, config).await,
        Err(e) => Err(e.into()),
    };
    finish(&CfnResponder::default(), event, lambda_start, result).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FanOutMode;
    use crate::config::test_support::run_context;
    use crate::fanout::MockPublisher;
    use crate::reconcile::Scope;
    use crate::testing::{Call, FakeProvider};
    use mockall::predicate::eq;
    use serde_json::json;
    use sra_bedrock_common::ResourceKind;
    use sra_bedrock_test_utils::{EventBuilder, check_spec, fanout_event, open_test_db};

    fn guardrails(builder: EventBuilder) -> EventBuilder {
        builder
            .dry_run(false)
            .accounts(&["111111111111"])
            .regions(&["us-east-1"])
            .property(
                "SRA-BEDROCK-CHECK-GUARDRAILS",
                check_spec(true, &["111111111111"], &["us-east-1"], json!({})),
            )
    }

    async fn ledger() -> SqliteLedger {
        SqliteLedger::new(open_test_db().await.unwrap(), STATE_TABLE)
    }

    fn quiet_publisher() -> MockPublisher {
        let mut publisher = MockPublisher::new();
        publisher.expect_publish_batch().never();
        publisher
    }

    #[test]
    fn test_parse_lifecycle_requests() {
        for (builder, expected) in [
            (EventBuilder::create(), RequestType::Create),
            (EventBuilder::update(), RequestType::Update),
            (EventBuilder::delete(), RequestType::Delete),
        ] {
            match parse_event(&builder.build()).unwrap() {
                Trigger::Lifecycle { request, properties } => {
                    assert_eq!(request, expected);
                    assert_eq!(properties["SOLUTION_NAME"], "sra-bedrock-org");
                }
                other => panic!("unexpected trigger {other:?}"),
            }
        }
    }

    #[test]
    fn test_parse_fanout_message() {
        let properties = EventBuilder::create().properties();
        let event = fanout_event(&["111111111111"], "us-west-2", properties.clone());

        let Trigger::FanOut(messages) = parse_event(&event).unwrap() else {
            panic!("expected a fan-out trigger");
        };
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].region, "us-west-2");
        assert_eq!(messages[0].accounts, ["111111111111"]);
        assert_eq!(messages[0].resource_properties, properties);
    }

    #[test]
    fn test_batch_must_share_properties() {
        let batch = |second: Value| {
            let mut event = fanout_event(&["111111111111"], "us-east-1", EventBuilder::create().properties());
            let other = fanout_event(&["111111111111"], "us-west-2", second);
            let records = event["Records"].as_array_mut().unwrap();
            records.push(other["Records"][0].clone());
            event
        };

        let same = parse_event(&batch(EventBuilder::create().properties())).unwrap();
        assert!(matches!(same, Trigger::FanOut(ref messages) if messages.len() == 2));

        let mixed = batch(EventBuilder::create().dry_run(false).properties());
        let err = parse_event(&mixed).unwrap_err();
        assert!(err.to_string().contains("different properties"), "{err}");
    }

    #[test]
    fn test_parse_rejects_other_events() {
        for event in [
            json!({}),
            json!({"RequestType": "Rollback"}),
            json!({"RequestType": "Create", "Records": []}),
            json!({"Records": [{"EventSource": "aws:sqs", "body": "{}"}]}),
            json!({"Records": [{"EventSource": "aws:sns", "Sns": {"Message": "not json"}}]}),
        ] {
            let err = parse_event(&event).unwrap_err();
            assert!(matches!(err, BaselineError::UnsupportedEvent { .. }), "{event}");
        }
    }

    #[test]
    fn test_signal_target_needs_resource_type_and_url() {
        assert!(SignalTarget::from_event(&EventBuilder::create().build()).is_none());

        let target = SignalTarget::from_event(&EventBuilder::create().stack_resource().build()).unwrap();
        assert_eq!(target.request_id, "request-1");
        assert_eq!(target.logical_resource_id, "SraBedrockOrgResource");

        let body = signal_body(&target, SignalStatus::Failed, "boom", &json!({}));
        assert_eq!(body["Status"], "FAILED");
        assert_eq!(body["PhysicalResourceId"], CFN_RESOURCE_ID);
        assert_eq!(body["Reason"], "boom");
    }

    #[tokio::test]
    async fn test_update_reruns_create() {
        let provider = FakeProvider::default();
        let ledger = ledger().await;
        let create = run_context(guardrails(EventBuilder::create()), FanOutMode::Inline);
        let update = run_context(guardrails(EventBuilder::update()), FanOutMode::Inline);
        let trigger = |builder: EventBuilder| parse_event(&guardrails(builder).build()).unwrap();

        let first = execute(
            &trigger(EventBuilder::create()),
            &create,
            &provider,
            &ledger,
            &quiet_publisher(),
            PolicyCompare::Exact,
        )
        .await
        .unwrap();
        assert!(first.deployment_info().resources_deployed > 0);

        provider.clear_log();
        let second = execute(
            &trigger(EventBuilder::update()),
            &update,
            &provider,
            &ledger,
            &quiet_publisher(),
            PolicyCompare::Exact,
        )
        .await
        .unwrap();
        assert_eq!(second.deployment_info().action_count, 0);
        assert_eq!(provider.mutations(), 0);
    }

    #[tokio::test]
    async fn test_delete_tears_down() {
        let provider = FakeProvider::default();
        let ledger = ledger().await;
        let create = run_context(guardrails(EventBuilder::create()), FanOutMode::Inline);
        let delete = run_context(guardrails(EventBuilder::delete()), FanOutMode::Inline);
        let scope = Scope::new("111111111111", "us-east-1");

        execute(
            &parse_event(&guardrails(EventBuilder::create()).build()).unwrap(),
            &create,
            &provider,
            &ledger,
            &quiet_publisher(),
            PolicyCompare::Exact,
        )
        .await
        .unwrap();
        assert!(provider.contains(ResourceKind::ConfigRule, &scope, "sra-bedrock-check-guardrails"));

        let report = execute(
            &parse_event(&guardrails(EventBuilder::delete()).build()).unwrap(),
            &delete,
            &provider,
            &ledger,
            &quiet_publisher(),
            PolicyCompare::Exact,
        )
        .await
        .unwrap();
        assert!(!provider.contains(ResourceKind::ConfigRule, &scope, "sra-bedrock-check-guardrails"));
        assert!(report.deployment_info().resources_deployed < 0);
    }

    #[tokio::test]
    async fn test_fanout_message_reconciles_its_region_only() {
        let provider = FakeProvider::default();
        let ledger = ledger().await;
        ledger.create_table().await.unwrap();
        let properties = guardrails(EventBuilder::create()).properties();
        let trigger = parse_event(&fanout_event(&["111111111111"], "us-east-1", properties)).unwrap();
        let ctx = run_context(guardrails(EventBuilder::create()), FanOutMode::Topic);

        execute(&trigger, &ctx, &provider, &ledger, &quiet_publisher(), PolicyCompare::Exact)
            .await
            .unwrap();

        // no bootstrap phases, only the region's rule
        assert_eq!(
            provider
                .log()
                .iter()
                .filter(|c| c.kind == ResourceKind::Topic || c.kind == ResourceKind::CodeArchive)
                .count(),
            0
        );
        assert!(provider.count(Call::Create) > 0);
    }

    #[tokio::test]
    async fn test_success_signals_once_with_counters() {
        let event = EventBuilder::create().stack_resource().build();
        let mut report = RunLedger::new(false);
        report.apply("k", "Created thing", crate::reconcile::Effect::Created);

        let mut signal = MockOutcomeSignal::new();
        signal
            .expect_send()
            .withf(|target, status, _, data| {
                target.request_id == "request-1"
                    && *status == SignalStatus::Success
                    && data["deployment_info"]["resources_deployed"] == 1
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let response = finish(&signal, &event, "start".into(), Ok(report)).await;
        assert_eq!(response.status_code, 200);
        assert_eq!(response.body, "SUCCESS");
        assert!(!response.dry_run);
        assert!(!response.lambda_finish.is_empty());
    }

    #[tokio::test]
    async fn test_failure_returns_500_and_signals_failed() {
        let event = EventBuilder::create().stack_resource().build();
        let mut signal = MockOutcomeSignal::new();
        signal
            .expect_send()
            .with(
                mockall::predicate::always(),
                eq(SignalStatus::Failed),
                mockall::predicate::always(),
                eq(json!({})),
            )
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let response = finish(&signal, &event, "start".into(), Err(anyhow::anyhow!("boom"))).await;
        assert_eq!(response.status_code, 500);
        assert_eq!(response.body, "ERROR");
        assert!(response.dry_run);
    }

    #[tokio::test]
    async fn test_fanout_and_plain_events_are_not_signalled() {
        let mut signal = MockOutcomeSignal::new();
        signal.expect_send().never();

        let plain = EventBuilder::create().build();
        finish(&signal, &plain, "start".into(), Ok(RunLedger::new(true))).await;

        let fanout = fanout_event(&[], "us-east-1", EventBuilder::create().properties());
        let response = finish(&signal, &fanout, "start".into(), Err(anyhow::anyhow!("boom"))).await;
        assert_eq!(response.status_code, 500);
    }

    #[test]
    fn test_requested_dry_run() {
        assert!(!requested_dry_run(&EventBuilder::create().dry_run(false).build()));
        assert!(requested_dry_run(&EventBuilder::create().build()));
        let fanout = fanout_event(&[], "us-east-1", EventBuilder::create().dry_run(false).properties());
        assert!(!requested_dry_run(&fanout));
        assert!(requested_dry_run(&json!({})));
    }
}
