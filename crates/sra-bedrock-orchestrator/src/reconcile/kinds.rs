//! Desired-state descriptors for every resource kind

use super::capability::Desired;
use sra_bedrock_common::ResourceKind;

/// IAM role with a trust policy
#[derive(Debug, Clone)]
pub struct RoleSpec {
    pub name: String,
    pub trust_policy: String,
    pub description: String,
}

impl Desired for RoleSpec {
    const KIND: ResourceKind = ResourceKind::Role;

    fn key(&self) -> &str {
        &self.name
    }

    fn description(&self) -> String {
        self.description.clone()
    }
}

/// Customer-managed IAM policy
#[derive(Debug, Clone)]
pub struct PolicySpec {
    pub name: String,
    pub document: String,
    pub description: String,
}

impl Desired for PolicySpec {
    const KIND: ResourceKind = ResourceKind::Policy;

    fn key(&self) -> &str {
        &self.name
    }

    fn description(&self) -> String {
        self.description.clone()
    }
}

/// Attachment of a (managed or customer) policy to a role
#[derive(Debug, Clone)]
pub struct AttachmentSpec {
    pub role: String,
    pub policy_arn: String,
    key: String,
}

impl AttachmentSpec {
    pub fn new(role: &str, policy_arn: &str) -> Self {
        let policy_name = policy_arn.rsplit('/').next().unwrap_or(policy_arn);
        Self {
            role: role.to_string(),
            policy_arn: policy_arn.to_string(),
            key: format!("{role}/{policy_name}"),
        }
    }
}

impl Desired for AttachmentSpec {
    const KIND: ResourceKind = ResourceKind::PolicyAttachment;

    fn key(&self) -> &str {
        &self.key
    }

    fn description(&self) -> String {
        format!("{} attached to {}", self.policy_arn, self.role)
    }
}

/// Lambda function packaged in the staging bucket
#[derive(Debug, Clone)]
pub struct FunctionSpec {
    pub name: String,
    pub role_arn: String,
    pub code_bucket: String,
    pub code_key: String,
    pub runtime: String,
    pub handler: String,
    pub timeout_secs: i32,
    pub memory_mb: i32,
    pub description: String,
}

impl Desired for FunctionSpec {
    const KIND: ResourceKind = ResourceKind::Function;

    fn key(&self) -> &str {
        &self.name
    }

    fn description(&self) -> String {
        self.description.clone()
    }
}

/// Resource-policy statement allowing a service to invoke a function
#[derive(Debug, Clone)]
pub struct PermissionSpec {
    pub function: String,
    pub statement_id: String,
    pub principal: String,
    pub source_arn: Option<String>,
    pub source_account: Option<String>,
    key: String,
}

impl PermissionSpec {
    pub fn new(function: &str, statement_id: &str, principal: &str) -> Self {
        Self {
            function: function.to_string(),
            statement_id: statement_id.to_string(),
            principal: principal.to_string(),
            source_arn: None,
            source_account: None,
            key: format!("{function}/{statement_id}"),
        }
    }

    pub fn source_arn(mut self, arn: &str) -> Self {
        self.source_arn = Some(arn.to_string());
        self
    }

    pub fn source_account(mut self, account: &str) -> Self {
        self.source_account = Some(account.to_string());
        self
    }
}

impl Desired for PermissionSpec {
    const KIND: ResourceKind = ResourceKind::FunctionPermission;

    fn key(&self) -> &str {
        &self.key
    }

    fn description(&self) -> String {
        format!("{} may invoke {}", self.principal, self.function)
    }
}

/// Custom AWS Config rule evaluated by a Lambda function
#[derive(Debug, Clone)]
pub struct ConfigRuleSpec {
    pub name: String,
    pub function_arn: String,
    /// JSON object of rule input parameters
    pub input_parameters: String,
    pub frequency: String,
}

impl Desired for ConfigRuleSpec {
    const KIND: ResourceKind = ResourceKind::ConfigRule;

    fn key(&self) -> &str {
        &self.name
    }

    fn body(&self) -> Option<&str> {
        Some(&self.input_parameters)
    }

    fn description(&self) -> String {
        "custom config rule".to_string()
    }
}

/// KMS key identified through its alias
#[derive(Debug, Clone)]
pub struct KeySpec {
    pub alias: String,
    pub policy: String,
    pub description: String,
}

impl Desired for KeySpec {
    const KIND: ResourceKind = ResourceKind::Key;

    fn key(&self) -> &str {
        &self.alias
    }

    fn body(&self) -> Option<&str> {
        Some(&self.policy)
    }

    fn description(&self) -> String {
        self.description.clone()
    }
}

/// KMS alias pointing at a key
#[derive(Debug, Clone)]
pub struct AliasSpec {
    pub alias: String,
    pub target_key_id: String,
}

impl Desired for AliasSpec {
    const KIND: ResourceKind = ResourceKind::Alias;

    fn key(&self) -> &str {
        &self.alias
    }

    /// The alias drifts when it points at any other key
    fn body(&self) -> Option<&str> {
        Some(&self.target_key_id)
    }

    fn description(&self) -> String {
        "alarm topic key alias".to_string()
    }
}

/// SNS topic, optionally encrypted with a KMS key
#[derive(Debug, Clone)]
pub struct TopicSpec {
    pub name: String,
    pub kms_key_id: Option<String>,
    pub description: String,
}

impl Desired for TopicSpec {
    const KIND: ResourceKind = ResourceKind::Topic;

    fn key(&self) -> &str {
        &self.name
    }

    fn description(&self) -> String {
        self.description.clone()
    }
}

/// Access policy of an SNS topic
#[derive(Debug, Clone)]
pub struct TopicPolicySpec {
    pub topic_name: String,
    pub topic_arn: String,
    pub policy: String,
}

impl Desired for TopicPolicySpec {
    const KIND: ResourceKind = ResourceKind::TopicPolicy;

    fn key(&self) -> &str {
        &self.topic_name
    }

    fn body(&self) -> Option<&str> {
        Some(&self.policy)
    }

    fn description(&self) -> String {
        format!("access policy of {}", self.topic_name)
    }
}

/// Subscription of an endpoint to a topic
#[derive(Debug, Clone)]
pub struct SubscriptionSpec {
    pub topic_arn: String,
    pub protocol: String,
    pub endpoint: String,
    key: String,
}

impl SubscriptionSpec {
    pub fn new(topic_name: &str, topic_arn: &str, protocol: &str, endpoint: &str) -> Self {
        Self {
            topic_arn: topic_arn.to_string(),
            protocol: protocol.to_string(),
            endpoint: endpoint.to_string(),
            key: format!("{topic_name}/{protocol}"),
        }
    }
}

impl Desired for SubscriptionSpec {
    const KIND: ResourceKind = ResourceKind::Subscription;

    fn key(&self) -> &str {
        &self.key
    }

    fn description(&self) -> String {
        format!("{} subscription of {}", self.protocol, self.endpoint)
    }
}

/// CloudWatch Logs metric filter
#[derive(Debug, Clone)]
pub struct MetricFilterSpec {
    pub name: String,
    pub log_group: String,
    pub pattern: String,
    pub metric_name: String,
    pub namespace: String,
    pub value: String,
}

impl Desired for MetricFilterSpec {
    const KIND: ResourceKind = ResourceKind::MetricFilter;

    fn key(&self) -> &str {
        &self.name
    }

    fn body(&self) -> Option<&str> {
        Some(&self.pattern)
    }

    fn description(&self) -> String {
        format!("metric filter on {}", self.log_group)
    }
}

/// CloudWatch alarm on a filter's metric
#[derive(Debug, Clone)]
pub struct AlarmSpec {
    pub name: String,
    pub metric_name: String,
    pub namespace: String,
    pub topic_arn: String,
}

impl Desired for AlarmSpec {
    const KIND: ResourceKind = ResourceKind::MetricAlarm;

    fn key(&self) -> &str {
        &self.name
    }

    fn description(&self) -> String {
        format!("alarm on {}", self.metric_name)
    }
}

/// Observability access manager sink
#[derive(Debug, Clone)]
pub struct SinkSpec {
    pub name: String,
}

impl Desired for SinkSpec {
    const KIND: ResourceKind = ResourceKind::Sink;

    fn key(&self) -> &str {
        &self.name
    }

    fn description(&self) -> String {
        "central observability sink".to_string()
    }
}

/// Resource policy of a sink
#[derive(Debug, Clone)]
pub struct SinkPolicySpec {
    pub sink_name: String,
    pub sink_arn: String,
    pub policy: String,
}

impl Desired for SinkPolicySpec {
    const KIND: ResourceKind = ResourceKind::SinkPolicy;

    fn key(&self) -> &str {
        &self.sink_name
    }

    fn body(&self) -> Option<&str> {
        Some(&self.policy)
    }

    fn description(&self) -> String {
        "central observability sink policy".to_string()
    }
}

/// Link from a source account/region to a sink
#[derive(Debug, Clone)]
pub struct LinkSpec {
    pub sink_name: String,
    pub sink_arn: String,
    pub label_template: String,
    pub resource_types: Vec<String>,
}

impl Desired for LinkSpec {
    const KIND: ResourceKind = ResourceKind::Link;

    fn key(&self) -> &str {
        &self.sink_name
    }

    fn description(&self) -> String {
        "central observability link".to_string()
    }
}

/// CloudWatch dashboard
#[derive(Debug, Clone)]
pub struct DashboardSpec {
    pub name: String,
    pub body: String,
}

impl Desired for DashboardSpec {
    const KIND: ResourceKind = ResourceKind::Dashboard;

    fn key(&self) -> &str {
        &self.name
    }

    fn body(&self) -> Option<&str> {
        Some(&self.body)
    }

    fn description(&self) -> String {
        "central observability dashboard".to_string()
    }
}

/// Repository archive staged in the staging bucket
#[derive(Debug, Clone)]
pub struct CodeArchiveSpec {
    pub bucket: String,
    pub object_key: String,
    pub source_url: String,
}

impl Desired for CodeArchiveSpec {
    const KIND: ResourceKind = ResourceKind::CodeArchive;

    fn key(&self) -> &str {
        &self.object_key
    }

    fn description(&self) -> String {
        format!("staged from {}", self.source_url)
    }
}
