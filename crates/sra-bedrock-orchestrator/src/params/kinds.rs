//! Per-kind resource properties: checks, filters and central observability
//!
//! Each of these properties holds a JSON document encoded as a string. The
//! documents are decoded with serde and then checked element by element so
//! that every problem in the event is reported at once.

use super::globals::{ACCOUNT_ID, REGION_NAME};
use super::{Problems, ResourceSpec, element_errors, text};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::LazyLock;
use strum::IntoEnumIterator;

pub const CHECK_PREFIX: &str = "SRA-BEDROCK-CHECK-";
pub const FILTER_PREFIX: &str = "SRA-BEDROCK-FILTER-";
pub const OBSERVABILITY_PROPERTY: &str = "SRA-BEDROCK-CENTRAL-OBSERVABILITY";

static BUCKET_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9-]*$").expect("bucket name pattern is a valid regular expression")
});

/// `"true"`/`"false"` or a JSON boolean
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Text(String),
}

impl Flag {
    fn parse(&self) -> Option<bool> {
        match self {
            Flag::Bool(b) => Some(*b),
            Flag::Text(s) if s == "true" => Some(true),
            Flag::Text(s) if s == "false" => Some(false),
            Flag::Text(_) => None,
        }
    }
}

fn parse_flag(value: &Value) -> Option<bool> {
    serde_json::from_value::<Flag>(value.clone())
        .ok()
        .and_then(|f| f.parse())
}

/// Fields shared by every per-kind document
#[derive(Debug)]
struct Targeting {
    deploy: Option<Flag>,
    accounts: Option<Vec<String>>,
    regions: Option<Vec<String>>,
}

impl Targeting {
    /// Resolve into a [`ResourceSpec`]. A document without `accounts` or `regions`
    /// never deploys.
    fn resolve(self, key: &str, problems: &mut Problems) -> ResourceSpec {
        let deploy = match &self.deploy {
            None => false,
            Some(flag) => flag.parse().unwrap_or_else(|| {
                problems.push(format!(
                    "Parameter '{key}' has a 'deploy' value that is not \"true\" or \"false\""
                ));
                false
            }),
        };
        let complete = self.accounts.is_some() && self.regions.is_some();
        let accounts = self.accounts.unwrap_or_default();
        let regions = self.regions.unwrap_or_default();
        problems.extend(element_errors(&format!("{key}.accounts"), &accounts, &ACCOUNT_ID));
        problems.extend(element_errors(&format!("{key}.regions"), &regions, &REGION_NAME));

        ResourceSpec {
            deploy: deploy && complete,
            accounts,
            regions,
        }
    }
}

fn decode_document<T: for<'de> Deserialize<'de>>(
    properties: &Map<String, Value>,
    key: &str,
    problems: &mut Problems,
) -> Option<T> {
    let raw = text(properties.get(key)?);
    match serde_json::from_str(&raw) {
        Ok(doc) => Some(doc),
        Err(e) => {
            problems.push(format!("Parameter '{key}' is not a valid document: {e}"));
            None
        }
    }
}

// Checks

/// Custom config rules the solution knows how to deploy
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display, strum::EnumString, strum::EnumIter,
)]
pub enum CheckKind {
    #[strum(serialize = "EVAL-JOB-BUCKET")]
    EvalJobBucket,
    #[strum(serialize = "IAM-USER-ACCESS")]
    IamUserAccess,
    #[strum(serialize = "GUARDRAILS")]
    Guardrails,
    #[strum(serialize = "VPC-ENDPOINTS")]
    VpcEndpoints,
    #[strum(serialize = "INVOCATION-LOG-CLOUDWATCH")]
    InvocationLogCloudwatch,
    #[strum(serialize = "INVOCATION-LOG-S3")]
    InvocationLogS3,
    #[strum(serialize = "CLOUDWATCH-ENDPOINTS")]
    CloudwatchEndpoints,
    #[strum(serialize = "S3-ENDPOINTS")]
    S3Endpoints,
    #[strum(serialize = "GUARDRAIL-ENCRYPTION")]
    GuardrailEncryption,
}

impl CheckKind {
    /// Input parameters the rule accepts
    pub fn inputs(self) -> &'static [&'static str] {
        match self {
            CheckKind::EvalJobBucket | CheckKind::IamUserAccess => &["BucketName"],
            CheckKind::Guardrails => &[
                "content_filters",
                "denied_topics",
                "word_filters",
                "sensitive_info_filters",
                "contextual_grounding",
            ],
            CheckKind::VpcEndpoints => &[
                "check_bedrock",
                "check_bedrock_agent",
                "check_bedrock_agent_runtime",
                "check_bedrock_runtime",
            ],
            CheckKind::InvocationLogCloudwatch => &["check_retention", "check_encryption"],
            CheckKind::InvocationLogS3 => &[
                "check_retention",
                "check_encryption",
                "check_access_logging",
                "check_object_locking",
                "check_versioning",
            ],
            CheckKind::CloudwatchEndpoints
            | CheckKind::S3Endpoints
            | CheckKind::GuardrailEncryption => &[],
        }
    }

    /// Property carrying this check's document
    pub fn property(self) -> String {
        format!("{CHECK_PREFIX}{self}")
    }

    /// Name shared by the rule, its function and its role
    pub fn rule_name(self) -> String {
        self.property().to_lowercase()
    }
}

/// One check as requested by the event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckSpec {
    pub kind: CheckKind,
    pub rule_name: String,
    #[serde(flatten)]
    pub spec: ResourceSpec,
    pub input_params: Map<String, Value>,
}

impl CheckSpec {
    fn absent(kind: CheckKind) -> Self {
        Self {
            kind,
            rule_name: kind.rule_name(),
            spec: ResourceSpec::default(),
            input_params: Map::new(),
        }
    }

    /// Input parameters as passed to the config rule
    pub fn input_parameters_json(&self) -> String {
        Value::Object(self.input_params.clone()).to_string()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CheckDocument {
    deploy: Option<Flag>,
    accounts: Option<Vec<String>>,
    regions: Option<Vec<String>>,
    #[serde(default)]
    input_params: Map<String, Value>,
}

fn check_inputs(kind: CheckKind, key: &str, inputs: &Map<String, Value>, problems: &mut Problems) {
    for (name, value) in inputs {
        if !kind.inputs().contains(&name.as_str()) {
            problems.push(format!("Parameter '{key}' has unknown input '{name}'"));
        } else if name == "BucketName" {
            if !value.as_str().is_some_and(|b| BUCKET_NAME.is_match(b)) {
                problems.push(format!("Parameter '{key}' has an invalid BucketName {value}"));
            }
        } else if parse_flag(value).is_none() {
            problems.push(format!(
                "Parameter '{key}' input '{name}' is not \"true\" or \"false\""
            ));
        }
    }
}

/// Every known check, absent ones as not deployed
pub(super) fn decode_checks(properties: &Map<String, Value>, problems: &mut Problems) -> Vec<CheckSpec> {
    for key in properties.keys() {
        let unknown = key
            .strip_prefix(CHECK_PREFIX)
            .is_some_and(|name| name.parse::<CheckKind>().is_err());
        if unknown {
            problems.push(format!("Parameter '{key}' is not a known check"));
        }
    }

    CheckKind::iter()
        .map(|kind| {
            let key = kind.property();
            let Some(doc) = decode_document::<CheckDocument>(properties, &key, problems) else {
                return CheckSpec::absent(kind);
            };
            check_inputs(kind, &key, &doc.input_params, problems);
            let targeting = Targeting {
                deploy: doc.deploy,
                accounts: doc.accounts,
                regions: doc.regions,
            };
            CheckSpec {
                kind,
                rule_name: kind.rule_name(),
                spec: targeting.resolve(&key, problems),
                input_params: doc.input_params,
            }
        })
        .collect()
}

// Filters

/// CloudTrail metric filters the solution knows how to deploy
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display, strum::EnumString, strum::EnumIter,
)]
pub enum FilterKind {
    #[strum(serialize = "SERVICE-CHANGES")]
    ServiceChanges,
    #[strum(serialize = "BUCKET-CHANGES")]
    BucketChanges,
    #[strum(serialize = "PROMPT-INJECTION")]
    PromptInjection,
    #[strum(serialize = "SENSITIVE-INFO")]
    SensitiveInfo,
}

impl FilterKind {
    pub fn property(self) -> String {
        format!("{FILTER_PREFIX}{self}")
    }

    /// Name of the metric filter (and prefix of its metric and alarm)
    pub fn filter_name(self) -> String {
        self.property().to_lowercase()
    }

    fn needs_input_path(self) -> bool {
        matches!(self, FilterKind::PromptInjection | FilterKind::SensitiveInfo)
    }
}

/// Where a filter listens and what it matches on
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FilterParams {
    pub log_group_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bucket_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_path: Option<String>,
}

/// One filter as requested by the event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterSpec {
    pub kind: FilterKind,
    pub filter_name: String,
    #[serde(flatten)]
    pub spec: ResourceSpec,
    /// `None` when the event does not mention the filter
    pub params: Option<FilterParams>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FilterDocument {
    deploy: Option<Flag>,
    accounts: Option<Vec<String>>,
    regions: Option<Vec<String>>,
    filter_params: Option<FilterParams>,
}

fn check_filter_params(kind: FilterKind, key: &str, params: &FilterParams, problems: &mut Problems) {
    if params.log_group_name.trim().is_empty() {
        problems.push(format!("Parameter '{key}' has an empty log_group_name"));
    }
    match kind {
        FilterKind::BucketChanges if params.bucket_names.is_empty() => {
            problems.push(format!("Parameter '{key}' needs at least one bucket name"));
        }
        k if k.needs_input_path() && params.input_path.as_deref().is_none_or(str::is_empty) => {
            problems.push(format!("Parameter '{key}' needs an input_path"));
        }
        _ => {}
    }
}

/// Every known filter, absent ones as not deployed
pub(super) fn decode_filters(properties: &Map<String, Value>, problems: &mut Problems) -> Vec<FilterSpec> {
    for key in properties.keys() {
        let unknown = key
            .strip_prefix(FILTER_PREFIX)
            .is_some_and(|name| name.parse::<FilterKind>().is_err());
        if unknown {
            problems.push(format!("Parameter '{key}' is not a known filter"));
        }
    }

    FilterKind::iter()
        .map(|kind| {
            let key = kind.property();
            let absent = FilterSpec {
                kind,
                filter_name: kind.filter_name(),
                spec: ResourceSpec::default(),
                params: None,
            };
            let Some(doc) = decode_document::<FilterDocument>(properties, &key, problems) else {
                return absent;
            };
            let Some(params) = doc.filter_params else {
                problems.push(format!("Parameter '{key}' is missing filter_params"));
                return absent;
            };
            check_filter_params(kind, &key, &params, problems);
            let targeting = Targeting {
                deploy: doc.deploy,
                accounts: doc.accounts,
                regions: doc.regions,
            };
            FilterSpec {
                spec: targeting.resolve(&key, problems),
                params: Some(params),
                ..absent
            }
        })
        .collect()
}

// Central observability

/// Cross-account telemetry sharing into the security account
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ObservabilitySpec {
    pub deploy: bool,
    /// Accounts that link to the sink, besides the management account
    pub bedrock_accounts: Vec<String>,
    pub regions: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ObservabilityDocument {
    deploy: Option<Flag>,
    bedrock_accounts: Option<Vec<String>>,
    regions: Option<Vec<String>>,
}

pub(super) fn decode_observability(
    properties: &Map<String, Value>,
    problems: &mut Problems,
) -> ObservabilitySpec {
    let key = OBSERVABILITY_PROPERTY;
    let Some(doc) = decode_document::<ObservabilityDocument>(properties, key, problems) else {
        return ObservabilitySpec::default();
    };
    let spec = Targeting {
        deploy: doc.deploy,
        accounts: doc.bedrock_accounts,
        regions: doc.regions,
    }
    .resolve(key, problems);

    ObservabilitySpec {
        deploy: spec.deploy,
        bedrock_accounts: spec.accounts,
        regions: spec.regions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(entries: &[(&str, Value)]) -> Map<String, Value> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect()
    }

    #[test]
    fn test_rule_names() {
        assert_eq!(CheckKind::Guardrails.rule_name(), "sra-bedrock-check-guardrails");
        assert_eq!(
            FilterKind::PromptInjection.filter_name(),
            "sra-bedrock-filter-prompt-injection"
        );
        assert_eq!(CheckKind::iter().count(), 9);
    }

    #[test]
    fn test_check_decoded_with_inputs() {
        let properties = props(&[(
            "SRA-BEDROCK-CHECK-GUARDRAILS",
            json!({
                "deploy": "true",
                "accounts": ["111111111111"],
                "regions": ["us-east-1"],
                "input_params": {"content_filters": "true", "denied_topics": "false"}
            }),
        )]);
        let mut problems = Problems::default();
        let checks = decode_checks(&properties, &mut problems);
        assert!(problems.is_empty(), "{problems:?}");

        let guardrails = checks.iter().find(|c| c.kind == CheckKind::Guardrails).unwrap();
        assert!(guardrails.spec.deploy);
        assert_eq!(
            guardrails.input_parameters_json(),
            r#"{"content_filters":"true","denied_topics":"false"}"#
        );
        assert!(checks.iter().filter(|c| c.kind != CheckKind::Guardrails).all(|c| !c.spec.deploy));
    }

    #[test]
    fn test_missing_regions_disables_deploy() {
        let properties = props(&[(
            "SRA-BEDROCK-CHECK-S3-ENDPOINTS",
            json!({"deploy": "true", "accounts": []}),
        )]);
        let mut problems = Problems::default();
        let checks = decode_checks(&properties, &mut problems);
        assert!(problems.is_empty());
        assert!(checks.iter().all(|c| !c.spec.deploy));
    }

    #[test]
    fn test_check_input_violations() {
        let properties = props(&[
            (
                "SRA-BEDROCK-CHECK-VPC-ENDPOINTS",
                json!({"deploy": "yes", "accounts": [], "regions": [], "input_params": {"check_bedrock": "maybe", "check_s3": "true"}}),
            ),
            ("SRA-BEDROCK-CHECK-UNHEARD-OF", json!({})),
        ]);
        let mut problems = Problems::default();
        decode_checks(&properties, &mut problems);
        assert_eq!(problems.len(), 4, "{problems:?}");
        assert!(problems.contains("Parameter 'SRA-BEDROCK-CHECK-UNHEARD-OF' is not a known check"));
    }

    #[test]
    fn test_bucket_filter_needs_buckets() {
        let properties = props(&[(
            "SRA-BEDROCK-FILTER-BUCKET-CHANGES",
            json!({"deploy": "true", "accounts": [], "regions": [], "filter_params": {"log_group_name": "aws-controltower/CloudTrailLogs", "bucket_names": []}}),
        )]);
        let mut problems = Problems::default();
        decode_filters(&properties, &mut problems);
        assert!(problems.contains("Parameter 'SRA-BEDROCK-FILTER-BUCKET-CHANGES' needs at least one bucket name"));
    }

    #[test]
    fn test_prompt_filter_decoded() {
        let properties = props(&[(
            "SRA-BEDROCK-FILTER-PROMPT-INJECTION",
            json!({"deploy": true, "accounts": ["111111111111"], "regions": ["us-east-1"], "filter_params": {"log_group_name": "model-invocation-log-group", "input_path": "input.inputBodyJson.messages[0].content"}}),
        )]);
        let mut problems = Problems::default();
        let filters = decode_filters(&properties, &mut problems);
        assert!(problems.is_empty(), "{problems:?}");

        let prompt = filters.iter().find(|f| f.kind == FilterKind::PromptInjection).unwrap();
        assert!(prompt.spec.deploy);
        assert_eq!(
            prompt.params.as_ref().and_then(|p| p.input_path.as_deref()),
            Some("input.inputBodyJson.messages[0].content")
        );
        let service = filters.iter().find(|f| f.kind == FilterKind::ServiceChanges).unwrap();
        assert!(service.params.is_none());
    }

    #[test]
    fn test_observability_decoded() {
        let properties = props(&[(
            OBSERVABILITY_PROPERTY,
            json!({"deploy": "true", "bedrock_accounts": ["222222222222"], "regions": ["us-east-1", "us-west-2"]}),
        )]);
        let mut problems = Problems::default();
        let spec = decode_observability(&properties, &mut problems);
        assert!(spec.deploy);
        assert_eq!(spec.regions.len(), 2);

        let mut problems = Problems::default();
        assert_eq!(decode_observability(&Map::new(), &mut problems), ObservabilitySpec::default());
    }
}
