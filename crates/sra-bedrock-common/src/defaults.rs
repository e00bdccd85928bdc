//! Solution-wide names and fixed resource settings
//!
//! These constants keep resource naming identical between the create and
//! delete paths, which is what lets teardown find everything it made.

/// Solution name every resource and ledger record is grouped under
pub const SOLUTION_NAME: &str = "sra-bedrock-org";

/// Ledger table name
pub const STATE_TABLE: &str = "sra_state";

/// Physical resource id reported back to the stack manager
pub const CFN_RESOURCE_ID: &str = "sra-bedrock-org-function";

/// Region label recorded for global (IAM) resources
pub const GLOBAL_REGION: &str = "Global";

/// Execution role assumed in every governed account
pub const DEFAULT_EXECUTION_ROLE: &str = "sra-execution";

/// Default log level when the event does not carry one
pub const DEFAULT_LOG_LEVEL: &str = "INFO";

/// Subject attached to every fan-out message
pub const FANOUT_SUBJECT: &str = "SRA Bedrock Configuration";

/// Action carried by every fan-out message
pub const FANOUT_ACTION: &str = "configure";

/// Maximum number of entries in one SNS publish batch
pub const PUBLISH_BATCH_LIMIT: usize = 10;

// Alarm plumbing

/// KMS alias of the key encrypting the alarm topic
pub const ALARM_KEY_ALIAS: &str = "alias/sra-alarm-sns-key";

/// Waiting period before a scheduled key deletion completes
pub const KEY_DELETION_WINDOW_DAYS: i32 = 7;

/// CloudWatch namespace for every metric filter
pub const METRIC_NAMESPACE: &str = "sra-bedrock";

/// Value emitted by every metric filter match
pub const METRIC_VALUE: &str = "1";

/// Alarm period in seconds
pub const ALARM_PERIOD_SECS: i32 = 10;

/// Alarm evaluation periods
pub const ALARM_EVALUATION_PERIODS: i32 = 1;

/// Alarm threshold
pub const ALARM_THRESHOLD: f64 = 0.0;

/// Missing-data treatment for every alarm
pub const ALARM_TREAT_MISSING_DATA: &str = "missing";

// Config rules

/// Evaluation frequency of every custom rule
pub const CONFIG_RULE_FREQUENCY: &str = "One_Hour";

/// Runtime of every rule function
pub const RULE_LAMBDA_RUNTIME: &str = "python3.12";

/// Handler of every rule function
pub const RULE_LAMBDA_HANDLER: &str = "app.lambda_handler";

/// Rule function timeout in seconds
pub const RULE_LAMBDA_TIMEOUT_SECS: i32 = 900;

/// Rule function memory in MB
pub const RULE_LAMBDA_MEMORY_MB: i32 = 512;

/// AWS managed policies attached to every rule role
pub const RULE_MANAGED_POLICIES: [&str; 2] = [
    "service-role/AWSConfigRulesExecutionRole",
    "service-role/AWSLambdaBasicExecutionRole",
];

// Central observability

/// Telemetry sink name in the security account
pub const SINK_NAME: &str = "sra-oam-sink";

/// Role that lets the security account read telemetry
pub const CROSS_ACCOUNT_ROLE: &str = "CloudWatch-CrossAccountSharingRole";

/// AWS managed policies attached to the cross-account role
pub const CROSS_ACCOUNT_POLICIES: [&str; 3] = [
    "AWSXrayReadOnlyAccess",
    "CloudWatchAutomaticDashboardsAccess",
    "CloudWatchReadOnlyAccess",
];

/// Label template of every observability link
pub const LINK_LABEL_TEMPLATE: &str = "$AccountName";

/// Telemetry types shared through every link
pub const LINK_RESOURCE_TYPES: [&str; 3] = [
    "AWS::CloudWatch::Metric",
    "AWS::Logs::LogGroup",
    "AWS::XRay::Trace",
];

/// Name of the configuration topic for a solution
pub fn configuration_topic_name(solution: &str) -> String {
    format!("{solution}-configuration")
}

/// Name of the alarm topic for a solution
pub fn alarm_topic_name(solution: &str) -> String {
    format!("{solution}-alarms")
}

/// Name of the basic-execution policy of a rule
pub fn rule_basic_policy_name(rule: &str) -> String {
    // The misspelling is part of the deployed resource names.
    format!("{rule}-lamdba-basic-execution")
}

/// Name of the metric backing a filter
pub fn metric_name(filter: &str) -> String {
    format!("{filter}-metric")
}

/// Name of the alarm watching a filter's metric
pub fn alarm_name(filter: &str) -> String {
    format!("{filter}-alarm")
}
