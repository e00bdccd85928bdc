//! Policy, filter-pattern and dashboard templates
//!
//! Templates are JSON files compiled into the binary. Placeholders are plain
//! tokens inside string values (`ACCOUNT_ID`, `<SECURITY_ACCOUNT>`, ...) and
//! are substituted after parsing, so a substitution can never break the
//! document structure.

use crate::params::{FilterKind, FilterParams};
use anyhow::{Context, Result};
use serde_json::{Map, Value};

const RULE_TRUST_POLICY: &str = include_str!("../templates/rule_trust_policy.json");
const RULE_BASIC_EXECUTION_POLICY: &str =
    include_str!("../templates/rule_basic_execution_policy.json");
const RULE_PERMISSIONS: &str = include_str!("../templates/rule_permissions.json");
const METRIC_FILTERS: &str = include_str!("../templates/metric_filters.json");
const ALARM_KEY_POLICY: &str = include_str!("../templates/alarm_key_policy.json");
const ALARM_TOPIC_POLICY: &str = include_str!("../templates/alarm_topic_policy.json");
const OAM_SINK_POLICY: &str = include_str!("../templates/oam_sink_policy.json");
const OAM_TRUST_POLICY: &str = include_str!("../templates/oam_trust_policy.json");
const DASHBOARD: &str = include_str!("../templates/dashboard.json");

const BUCKET_PLACEHOLDER: &str = "<BUCKET_NAME_PLACEHOLDER>";
const INPUT_PATH_PLACEHOLDER: &str = "<INPUT_PATH>";

fn parse(name: &str, raw: &str) -> Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("Template {name} is not valid JSON"))
}

/// Replace every placeholder inside every string of `value`
fn substitute(value: &mut Value, substitutions: &[(&str, &str)]) {
    match value {
        Value::String(s) => {
            for (from, to) in substitutions {
                if s.contains(from) {
                    *s = s.replace(from, to);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(|v| substitute(v, substitutions)),
        Value::Object(map) => map.values_mut().for_each(|v| substitute(v, substitutions)),
        _ => {}
    }
}

fn render(name: &str, raw: &str, substitutions: &[(&str, &str)]) -> Result<String> {
    let mut doc = parse(name, raw)?;
    substitute(&mut doc, substitutions);
    Ok(doc.to_string())
}

/// Trust policy letting Lambda assume a rule's role
pub fn rule_trust_policy() -> Result<String> {
    render("rule_trust_policy", RULE_TRUST_POLICY, &[])
}

/// Log permissions for a rule function
pub fn rule_basic_execution_policy(partition: &str, account: &str, rule: &str) -> Result<String> {
    render(
        "rule_basic_execution_policy",
        RULE_BASIC_EXECUTION_POLICY,
        &[
            ("PARTITION", partition),
            ("ACCOUNT_ID", account),
            ("CONFIG_RULE_NAME", rule),
        ],
    )
}

/// Permissions a rule function needs to evaluate its check
pub fn rule_permissions_policy(rule: &str) -> Result<String> {
    let doc = parse("rule_permissions", RULE_PERMISSIONS)?;
    let policy = doc
        .get(rule)
        .with_context(|| format!("No permissions template for rule {rule}"))?;
    Ok(policy.to_string())
}

/// Key policy of the alarm topic key
pub fn alarm_key_policy(partition: &str, account: &str) -> Result<String> {
    render(
        "alarm_key_policy",
        ALARM_KEY_POLICY,
        &[("PARTITION", partition), ("ACCOUNT_ID", account)],
    )
}

/// Policy letting CloudWatch alarms in `account` publish to the alarm topic
pub fn alarm_topic_policy(topic_arn: &str, account: &str) -> Result<String> {
    render(
        "alarm_topic_policy",
        ALARM_TOPIC_POLICY,
        &[("TOPIC_ARN", topic_arn), ("ACCOUNT_ID", account)],
    )
}

/// Sink policy admitting links from the organization
pub fn sink_policy(organization_id: &str) -> Result<String> {
    render(
        "oam_sink_policy",
        OAM_SINK_POLICY,
        &[("<ORGANIZATION_ID>", organization_id)],
    )
}

/// Trust policy of the cross-account sharing role
pub fn cross_account_trust_policy(partition: &str, security_account: &str) -> Result<String> {
    render(
        "oam_trust_policy",
        OAM_TRUST_POLICY,
        &[("PARTITION", partition), ("<SECURITY_ACCOUNT>", security_account)],
    )
}

/// Put the bucket condition of a pattern in terms of `bucket_names`.
///
/// One bucket is substituted, several become an OR of conditions and none
/// drops the bucket clause entirely.
pub fn build_bucket_pattern(bucket_names: &[String], template: &str) -> String {
    let clause = format!("($.requestParameters.bucketName = \"{BUCKET_PLACEHOLDER}\")");
    match bucket_names {
        [] => template.replace(&format!("&& {clause}"), ""),
        [bucket] => template.replace(BUCKET_PLACEHOLDER, bucket),
        buckets => {
            let conditions = buckets
                .iter()
                .map(|b| format!("$.requestParameters.bucketName = \"{b}\""))
                .collect::<Vec<_>>()
                .join(" || ");
            template.replace(&clause, &format!("({conditions})"))
        }
    }
}

/// Filter pattern for one filter with its parameters applied
pub fn metric_filter_pattern(kind: FilterKind, params: &FilterParams) -> Result<String> {
    let doc = parse("metric_filters", METRIC_FILTERS)?;
    let name = kind.filter_name();
    let template = doc
        .get(&name)
        .and_then(Value::as_str)
        .with_context(|| format!("No filter pattern template for {name}"))?;

    if template.contains(BUCKET_PLACEHOLDER) {
        return Ok(build_bucket_pattern(&params.bucket_names, template));
    }
    if template.contains(INPUT_PATH_PLACEHOLDER) {
        let path = params
            .input_path
            .as_deref()
            .with_context(|| format!("{name} needs an input_path"))?;
        return Ok(template.replace(INPUT_PATH_PLACEHOLDER, path));
    }
    Ok(template.to_string())
}

fn stamp(entry: &mut Value, account: &str, region: &str) {
    if let Some(options) = entry.get_mut(2).and_then(Value::as_object_mut) {
        options.insert("accountId".into(), Value::String(account.into()));
        options.insert("region".into(), Value::String(region.into()));
    }
}

/// Dashboard body covering every bedrock account and region.
///
/// The service- and bucket-change entries point at the management account in
/// the home region; the prompt-injection and sensitive-info entries are
/// repeated for each account and region pair.
pub fn dashboard_body(
    management_account: &str,
    home_region: &str,
    bedrock_accounts: &[String],
    regions: &[String],
) -> Result<String> {
    let mut doc = parse("dashboard", DASHBOARD)?;
    let properties = doc
        .pointer_mut("/widgets/0/properties")
        .and_then(Value::as_object_mut)
        .context("Dashboard template has no metric widget")?;

    let metrics = properties
        .get_mut("metrics")
        .and_then(Value::as_array_mut)
        .context("Dashboard template widget has no metrics")?;
    if metrics.len() != 4 {
        anyhow::bail!("Dashboard template needs exactly four metric entries");
    }

    let per_account: Vec<Value> = metrics.split_off(2);
    for entry in metrics.iter_mut() {
        stamp(entry, management_account, home_region);
    }

    if bedrock_accounts.is_empty() || regions.is_empty() {
        metrics.extend(per_account);
    } else {
        for account in bedrock_accounts {
            for region in regions {
                for template in &per_account {
                    let mut entry = template.clone();
                    stamp(&mut entry, account, region);
                    metrics.push(entry);
                }
            }
        }
    }

    set_region(properties, home_region);
    Ok(doc.to_string())
}

fn set_region(properties: &mut Map<String, Value>, region: &str) {
    properties.insert("region".into(), Value::String(region.into()));
}
