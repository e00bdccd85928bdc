//! Resource catalog and teardown ordering
//!
//! Every kind the orchestrator can reconcile is listed here, together with
//! the label used in run-ledger action keys, the ledger classification, and
//! the priority used to tear resources down in dependency order.

use crate::ledger::{AwsService, ComponentType};

/// Kinds of AWS resources managed by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
pub enum ResourceKind {
    /// IAM role (global)
    Role,
    /// Customer-managed IAM policy (global)
    Policy,
    /// Attachment of a policy to a role (global)
    PolicyAttachment,
    /// Lambda function backing a custom config rule
    Function,
    /// Resource policy statement on a Lambda function
    FunctionPermission,
    /// AWS Config custom rule
    ConfigRule,
    /// KMS key
    Key,
    /// KMS alias pointing at a key
    Alias,
    /// SNS topic
    Topic,
    /// SNS topic access policy
    TopicPolicy,
    /// SNS subscription (email or lambda)
    Subscription,
    /// CloudWatch Logs metric filter
    MetricFilter,
    /// CloudWatch metric alarm
    MetricAlarm,
    /// Observability access manager sink
    Sink,
    /// Sink resource policy
    SinkPolicy,
    /// Observability access manager link
    Link,
    /// CloudWatch dashboard
    Dashboard,
    /// Ledger table
    StateTable,
    /// Staged code archive in S3
    CodeArchive,
}

impl ResourceKind {
    /// Label used in run-ledger action keys
    pub fn label(self) -> &'static str {
        match self {
            ResourceKind::Role => "IAMRole",
            ResourceKind::Policy => "IAMPolicy",
            ResourceKind::PolicyAttachment => "IAMPolicyAttach",
            ResourceKind::Function => "Lambda",
            ResourceKind::FunctionPermission => "LambdaPermission",
            ResourceKind::ConfigRule => "Config",
            ResourceKind::Key => "KMSKey",
            ResourceKind::Alias => "KMSAlias",
            ResourceKind::Topic => "SNSTopic",
            ResourceKind::TopicPolicy => "SNSTopicPolicy",
            ResourceKind::Subscription => "SNSSubscription",
            ResourceKind::MetricFilter => "CloudWatch",
            ResourceKind::MetricAlarm => "CloudWatchAlarm",
            ResourceKind::Sink => "OAMSink",
            ResourceKind::SinkPolicy => "OAMSinkPolicy",
            ResourceKind::Link => "OAMLink",
            ResourceKind::Dashboard => "CloudWatchDashboard",
            ResourceKind::StateTable => "StateTable",
            ResourceKind::CodeArchive => "CodeStaging",
        }
    }

    /// IAM resources are account-wide and recorded under the "Global" region
    pub fn is_global(self) -> bool {
        matches!(
            self,
            ResourceKind::Role | ResourceKind::Policy | ResourceKind::PolicyAttachment
        )
    }

    /// Service that owns this kind
    pub fn service(self) -> AwsService {
        match self {
            ResourceKind::Role | ResourceKind::Policy | ResourceKind::PolicyAttachment => {
                AwsService::Iam
            }
            ResourceKind::Function | ResourceKind::FunctionPermission => AwsService::Lambda,
            ResourceKind::ConfigRule => AwsService::Config,
            ResourceKind::Key | ResourceKind::Alias => AwsService::Kms,
            ResourceKind::Topic | ResourceKind::TopicPolicy | ResourceKind::Subscription => {
                AwsService::Sns
            }
            ResourceKind::MetricFilter
            | ResourceKind::MetricAlarm
            | ResourceKind::Sink
            | ResourceKind::SinkPolicy
            | ResourceKind::Link
            | ResourceKind::Dashboard => AwsService::Cloudwatch,
            ResourceKind::StateTable => AwsService::Dynamodb,
            ResourceKind::CodeArchive => AwsService::S3,
        }
    }

    /// Ledger classification, or `None` for kinds that only change the
    /// configuration of another resource and get no record of their own
    pub fn component_type(self) -> Option<ComponentType> {
        match self {
            ResourceKind::Role => Some(ComponentType::Role),
            ResourceKind::Policy => Some(ComponentType::Policy),
            ResourceKind::Function => Some(ComponentType::Lambda),
            ResourceKind::ConfigRule => Some(ComponentType::Rule),
            ResourceKind::Key => Some(ComponentType::Key),
            ResourceKind::Alias => Some(ComponentType::Alias),
            ResourceKind::Topic => Some(ComponentType::Topic),
            ResourceKind::MetricFilter => Some(ComponentType::Filter),
            ResourceKind::MetricAlarm => Some(ComponentType::Alarm),
            ResourceKind::Sink => Some(ComponentType::Sink),
            ResourceKind::Link => Some(ComponentType::Link),
            ResourceKind::Dashboard => Some(ComponentType::Dashboard),
            ResourceKind::StateTable => Some(ComponentType::Table),
            ResourceKind::PolicyAttachment
            | ResourceKind::FunctionPermission
            | ResourceKind::TopicPolicy
            | ResourceKind::Subscription
            | ResourceKind::SinkPolicy
            | ResourceKind::CodeArchive => None,
        }
    }

    /// Whether creating this kind adds a resource identity (as opposed to a
    /// configuration change on an existing one)
    pub fn is_identity(self) -> bool {
        self.component_type().is_some()
    }

    /// Get teardown priority (lower number = removed first)
    ///
    /// - 0: Links, dashboards and resource-policy edits (nothing depends on them)
    /// - 1: Alarms and metric filters
    /// - 2: Config rules (they invoke the functions)
    /// - 3: Functions
    /// - 4: Topics and the sink (links must be gone first)
    /// - 5: Policy attachments
    /// - 6: Policies (must be detached)
    /// - 7: Roles (policies must be detached)
    /// - 8: Key aliases
    /// - 9: Keys (topics encrypted with them must be gone)
    /// - 10: The ledger table and staged code, which are never torn down
    pub fn teardown_priority(self) -> u8 {
        match self {
            ResourceKind::Link
            | ResourceKind::Dashboard
            | ResourceKind::FunctionPermission
            | ResourceKind::TopicPolicy
            | ResourceKind::Subscription
            | ResourceKind::SinkPolicy => 0,
            ResourceKind::MetricAlarm | ResourceKind::MetricFilter => 1,
            ResourceKind::ConfigRule => 2,
            ResourceKind::Function => 3,
            ResourceKind::Topic | ResourceKind::Sink => 4,
            ResourceKind::PolicyAttachment => 5,
            ResourceKind::Policy => 6,
            ResourceKind::Role => 7,
            ResourceKind::Alias => 8,
            ResourceKind::Key => 9,
            ResourceKind::StateTable | ResourceKind::CodeArchive => 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_links_before_sink() {
        assert!(
            ResourceKind::Link.teardown_priority() < ResourceKind::Sink.teardown_priority(),
            "Links must be removed before the sink they point at"
        );
    }

    #[test]
    fn test_attachments_before_policies_before_roles() {
        assert!(
            ResourceKind::PolicyAttachment.teardown_priority()
                < ResourceKind::Policy.teardown_priority()
        );
        assert!(ResourceKind::Policy.teardown_priority() < ResourceKind::Role.teardown_priority());
    }

    #[test]
    fn test_rules_before_functions() {
        assert!(
            ResourceKind::ConfigRule.teardown_priority()
                < ResourceKind::Function.teardown_priority()
        );
    }

    #[test]
    fn test_keys_last() {
        let key = ResourceKind::Key.teardown_priority();
        assert!(ResourceKind::Alias.teardown_priority() < key);
        assert!(ResourceKind::Topic.teardown_priority() < key);
        assert!(ResourceKind::Role.teardown_priority() < key);
    }

    #[test]
    fn test_only_iam_is_global() {
        let global: Vec<_> = ResourceKind::iter().filter(|k| k.is_global()).collect();
        assert_eq!(
            global,
            vec![
                ResourceKind::Role,
                ResourceKind::Policy,
                ResourceKind::PolicyAttachment
            ]
        );
        assert!(global.iter().all(|k| k.service() == AwsService::Iam));
    }

    #[test]
    fn test_labels_unique() {
        let mut labels: Vec<_> = ResourceKind::iter().map(|k| k.label()).collect();
        let total = labels.len();
        labels.sort_unstable();
        labels.dedup();
        assert_eq!(labels.len(), total);
    }

    #[test]
    fn test_configuration_kinds_have_no_record() {
        assert!(!ResourceKind::PolicyAttachment.is_identity());
        assert!(!ResourceKind::TopicPolicy.is_identity());
        assert!(!ResourceKind::SinkPolicy.is_identity());
        assert_eq!(
            ResourceKind::MetricFilter.component_type(),
            Some(ComponentType::Filter)
        );
    }
}
